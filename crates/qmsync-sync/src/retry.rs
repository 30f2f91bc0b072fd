//! Bounded retry for remote calls
//!
//! Only errors for which [`RemoteError::is_retryable`] holds are retried
//! (connection failures, timeouts, 408, 429, 5xx). Everything else is
//! returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use qmsync_core::config::{BackoffKind, SyncConfig};
use qmsync_core::ports::RemoteError;

/// Hard ceiling on attempts per request
pub const MAX_ATTEMPTS: u32 = 5;

/// How the delay between attempts evolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base` before every retry
    Fixed,
    /// `base * n` before the n-th retry
    Linear,
}

impl From<BackoffKind> for Backoff {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Linear => Backoff::Linear,
        }
    }
}

/// Attempts and backoff applied to one remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to `1..=MAX_ATTEMPTS`
    pub fn new(max_attempts: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            base_delay,
            backoff,
        }
    }

    /// Policy described by the `sync` configuration section
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_delay(),
            config.backoff.into(),
        )
    }

    /// A single attempt, no retry
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Backoff::Fixed)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay * attempt.max(1),
        }
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or
    /// attempts are exhausted
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts && err.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
