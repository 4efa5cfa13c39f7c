use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::error::Retryable;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
#[error("{what} failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E: fmt::Display + fmt::Debug + 'static> {
    pub what: String,
    pub attempts: u32,
    pub last: E,
}

/// Attempt an action up to `max_attempts` times with a fixed delay between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Exactly one attempt, no sleeping.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn attempt<T, E, F, Fut>(&self, what: &str, mut action: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display + fmt::Debug + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match action().await {
                Ok(value) => return Ok(value),
                Err(e) if attempts < max && e.is_retryable() => {
                    tracing::debug!(what, attempt = attempts, max, error = %e, "attempt failed, retrying");
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => {
                    return Err(RetryError {
                        what: what.to_string(),
                        attempts,
                        last: e,
                    })
                }
            }
        }
    }
}
