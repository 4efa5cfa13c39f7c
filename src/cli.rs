use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::config::{self, AppConfig};
use crate::providers::AdapterRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Poll every mapping until interrupted.
    Run,
    /// One cycle per mapping, then exit.
    Once,
    /// Validate configuration and adapter construction.
    Check,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub command: Command,
    pub config: Option<PathBuf>,
}

/// Parse `lanesync` arguments (without the program name).
///
/// Supported forms:
///   lanesync
///   lanesync run --config ./lanesync.toml
///   lanesync once -c ./lanesync.toml
///   lanesync check
pub fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut command = None;
    let mut config = None;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => config = Some(PathBuf::from(path)),
                    None => bail!("Missing value for --config flag"),
                }
            }
            "-h" | "--help" | "help" => command = Some(Command::Help),
            word => {
                if command.is_some() {
                    bail!("Unexpected argument '{word}'");
                }
                command = Some(match word {
                    "run" => Command::Run,
                    "once" => Command::Once,
                    "check" => Command::Check,
                    other => bail!("Unknown command '{other}'. Run `lanesync help` for usage."),
                });
            }
        }
        i += 1;
    }

    Ok(CliArgs {
        command: command.unwrap_or(Command::Run),
        config,
    })
}

pub fn print_help() {
    println!("lanesync: keep kanban board cards in sync with remote issue trackers\n");
    println!("USAGE:");
    println!("  lanesync [run]    Poll every configured mapping until Ctrl-C");
    println!("  lanesync once     Run a single sync cycle per mapping and exit");
    println!("  lanesync check    Validate the configuration and exit");
    println!();
    println!("OPTIONS:");
    println!(
        "  -c, --config <path>  Config file (default {})",
        config::default_config_path().display()
    );
    println!();
    println!("Log verbosity follows RUST_LOG, falling back to log_level in the config.");
}

/// One line per mapping: its label and whether an adapter could be built.
pub fn check_mappings(config: &AppConfig, registry: &AdapterRegistry) -> Vec<(String, Result<()>)> {
    config
        .mappings
        .iter()
        .map(|mapping| {
            let result = registry.create(config, mapping).map(|_| ());
            (mapping.label(), result)
        })
        .collect()
}

pub fn handle_check(config: &AppConfig, registry: &AdapterRegistry) -> Result<()> {
    if config.board.is_none() {
        bail!("No [board] section configured");
    }
    if config.mappings.is_empty() {
        bail!("No mappings configured. Add [[mappings]] entries to the config file");
    }
    let mut failures = 0;
    for (label, result) in check_mappings(config, registry) {
        match result {
            Ok(()) => println!("ok     {label}"),
            Err(e) => {
                failures += 1;
                println!("error  {label}: {e:#}");
            }
        }
    }
    if failures > 0 {
        bail!("{failures} mapping(s) failed validation");
    }
    Ok(())
}
