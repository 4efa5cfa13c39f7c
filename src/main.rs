mod board;
mod cli;
mod config;
mod error;
mod mapper;
mod model;
mod providers;
mod retry;
mod sync;
mod util;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use board::http::HttpBoard;
use cli::Command;
use providers::AdapterRegistry;
use retry::RetryExecutor;
use sync::cursor::FileCursorStore;
use sync::worker::MappingWorker;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = cli::parse_args(&args)?;
    if args.command == Command::Help {
        cli::print_help();
        return Ok(());
    }

    let config = config::load_config(args.config.as_deref())?;
    setup_logging(config.log_level());
    let registry = AdapterRegistry::builtin();

    if args.command == Command::Check {
        return cli::handle_check(&config, &registry);
    }

    let board_config = config
        .board
        .as_ref()
        .context("No [board] section configured")?;
    let board = Arc::new(HttpBoard::new(board_config));
    let cursors = Arc::new(FileCursorStore::new(config.data_dir()));
    let workers = sync::build_workers(&config, &registry, board, cursors, RetryExecutor::default());
    if workers.is_empty() {
        bail!("No usable mappings configured");
    }
    tracing::info!(mappings = workers.len(), "starting lanesync");

    match args.command {
        Command::Once => run_once(&workers).await,
        _ => run(workers).await,
    }
    Ok(())
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_once(workers: &[MappingWorker]) {
    futures::future::join_all(workers.iter().map(|w| w.run_cycle())).await;
}

async fn run(workers: Vec<MappingWorker>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| tokio::spawn(worker.run(shutdown_rx.clone())))
        .collect();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "worker task failed");
        }
    }
}
