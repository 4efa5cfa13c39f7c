pub mod cursor;
pub mod engine;
pub mod transition;
pub mod worker;

use std::sync::Arc;

use crate::board::BoardClient;
use crate::config::{default_date_format, AppConfig};
use crate::model::mapping::MIN_POLLING_SECS;
use crate::providers::AdapterRegistry;
use crate::retry::RetryExecutor;

use cursor::CursorStore;
use engine::SyncEngine;
use worker::MappingWorker;

/// Build a worker per configured mapping. Mappings whose adapter cannot be
/// constructed are logged and left out.
pub fn build_workers(
    config: &AppConfig,
    registry: &AdapterRegistry,
    board: Arc<dyn BoardClient>,
    cursors: Arc<dyn CursorStore>,
    retry: RetryExecutor,
) -> Vec<MappingWorker> {
    let date_format = config
        .board
        .as_ref()
        .map(|b| b.date_format.clone())
        .unwrap_or_else(default_date_format);

    let mut workers = Vec::new();
    for mapping in &config.mappings {
        if mapping.polling_frequency_secs < MIN_POLLING_SECS {
            tracing::warn!(
                mapping = %mapping.label(),
                requested = mapping.polling_frequency_secs,
                floor = MIN_POLLING_SECS,
                "polling frequency below floor, using floor"
            );
        }
        match registry.create(config, mapping) {
            Ok(adapter) => {
                let engine = SyncEngine::new(
                    Arc::from(adapter),
                    board.clone(),
                    mapping.clone(),
                    retry,
                    &date_format,
                );
                workers.push(MappingWorker::new(engine, cursors.clone()));
            }
            Err(e) => {
                tracing::error!(mapping = %mapping.label(), error = %format!("{e:#}"), "skipping mapping");
            }
        }
    }
    workers
}

#[cfg(test)]
mod tests;
