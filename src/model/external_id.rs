use std::fmt;
use std::str::FromStr;

use crate::error::RemoteError;

/// Correlation string stored on a local card.
///
/// Rendered as `{remote_id}` when the remote system has a single natural key,
/// or `{remote_id}|{display_key}` when numeric ids and display keys differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    pub remote_id: String,
    pub display_key: Option<String>,
}

impl ExternalId {
    pub fn simple(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            display_key: None,
        }
    }

    pub fn keyed(remote_id: impl Into<String>, display_key: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            display_key: Some(display_key.into()),
        }
    }

    /// Key to address the item with, preferring the human-facing one.
    pub fn key(&self) -> &str {
        self.display_key.as_deref().unwrap_or(&self.remote_id)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_key {
            Some(key) => write!(f, "{}|{}", self.remote_id, key),
            None => write!(f, "{}", self.remote_id),
        }
    }
}

impl FromStr for ExternalId {
    type Err = RemoteError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || RemoteError::MalformedExternalId(raw.to_string());
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(malformed());
        }
        let mut parts = trimmed.split('|');
        let id = parts.next().map(str::trim).unwrap_or_default();
        let key = parts.next().map(str::trim);
        if parts.next().is_some() || id.is_empty() {
            return Err(malformed());
        }
        match key {
            None => Ok(Self::simple(id)),
            Some("") => Err(malformed()),
            Some(key) => Ok(Self::keyed(id, key)),
        }
    }
}
