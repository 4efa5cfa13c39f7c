use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::cursor::{CursorStore, SyncCursor};
use super::engine::{ReconcileReport, SyncEngine};

/// Polls one mapping on its own interval until shutdown is signalled.
pub struct MappingWorker {
    engine: SyncEngine,
    cursors: Arc<dyn CursorStore>,
}

impl MappingWorker {
    pub fn new(engine: SyncEngine, cursors: Arc<dyn CursorStore>) -> Self {
        Self { engine, cursors }
    }

    pub fn label(&self) -> String {
        self.engine.mapping().label()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let label = self.label();
        let mut tick = tokio::time::interval(self.engine.mapping().polling_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(mapping = %label, interval = ?self.engine.mapping().polling_interval(), "worker started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(mapping = %label, "worker stopped");
    }

    /// One cycle: handle pending board events, then reconcile remote changes.
    pub async fn run_cycle(&self) -> Option<ReconcileReport> {
        let label = self.label();
        match self.engine.drain_board_events().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(mapping = %label, events = n, "handled board events"),
            Err(e) => tracing::warn!(mapping = %label, error = %format!("{e:#}"), "failed to poll board events"),
        }

        let cursor = self.cursors.load(&label).unwrap_or_else(|e| {
            tracing::warn!(mapping = %label, error = %format!("{e:#}"), "unreadable cursor, starting fresh");
            SyncCursor::default()
        });
        match self.engine.reconcile(&cursor, Utc::now()).await {
            Ok((report, next)) => {
                tracing::info!(mapping = %label, %report, "reconciled");
                if let Err(e) = self.cursors.save(&label, &next) {
                    tracing::warn!(mapping = %label, error = %format!("{e:#}"), "failed to save cursor");
                }
                Some(report)
            }
            Err(e) => {
                tracing::warn!(mapping = %label, error = %format!("{e:#}"), "reconcile failed");
                None
            }
        }
    }
}
