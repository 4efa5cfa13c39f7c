use thiserror::Error;

/// Failure kinds reported by every `RemoteAdapter` call.
///
/// Callers branch on the kind: not-found and malformed ids are skipped,
/// transient and validation failures go through the retry executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{system} item {id} not found")]
    NotFound { system: String, id: String },

    #[error("{system} request failed: {message}")]
    Transient { system: String, message: String },

    #[error("{system} rejected request: {message}")]
    Validation { system: String, message: String },

    #[error("malformed external id '{0}'")]
    MalformedExternalId(String),
}

impl RemoteError {
    pub fn not_found(system: &str, id: impl Into<String>) -> Self {
        Self::NotFound {
            system: system.to_string(),
            id: id.into(),
        }
    }

    pub fn transient(system: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            system: system.to_string(),
            message: message.into(),
        }
    }

    pub fn validation(system: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            system: system.to_string(),
            message: message.into(),
        }
    }

    /// Map an HTTP status returned by a remote API onto an error kind.
    pub fn from_status(system: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        match status.as_u16() {
            404 => Self::NotFound {
                system: system.to_string(),
                id: message,
            },
            408 | 409 | 423 | 429 => Self::transient(system, message),
            s if s >= 500 => Self::transient(system, message),
            _ => Self::validation(system, message),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors that the retry executor may attempt again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Validation { .. })
    }
}

impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        true
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
