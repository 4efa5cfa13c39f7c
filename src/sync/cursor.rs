use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Last successful poll for one mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_poll: Option<DateTime<Utc>>,
}

impl SyncCursor {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            last_poll: Some(now),
        }
    }

    /// Start of the look-back window: `now - 1.5 * interval`, or the last
    /// poll if that is older (e.g. after downtime).
    pub fn window_start(&self, now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
        let margin = chrono::Duration::from_std(interval.mul_f64(1.5))
            .unwrap_or_else(|_| chrono::Duration::zero());
        let lookback = now - margin;
        match self.last_poll {
            Some(last) if last < lookback => last,
            _ => lookback,
        }
    }
}

/// Persistence for per-mapping cursors between polls.
pub trait CursorStore: Send + Sync {
    fn load(&self, key: &str) -> Result<SyncCursor>;
    fn save(&self, key: &str, cursor: &SyncCursor) -> Result<()>;
}

/// One JSON file per mapping under `<data_dir>/cursors/`.
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            dir: data_dir.join("cursors"),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, key: &str) -> Result<SyncCursor> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(SyncCursor::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cursor {}", path.display()))
    }

    fn save(&self, key: &str, cursor: &SyncCursor) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path(key);
        let json = serde_json::to_string_pretty(cursor)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
