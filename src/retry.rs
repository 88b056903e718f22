//! Bounded exponential backoff for fallible async operations.

use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Retry tuning for [`retry`].
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Backoff before the given attempt (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`. No jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying on failure until `max_attempts` is exhausted, then
/// return the last error.
///
/// Every error counts as transient here; use [`retry_if`] when only some
/// failure kinds are worth re-issuing (see `errors::AuthError::retryable`).
///
/// # Errors
/// Returns the error of the final attempt when all attempts fail.
pub async fn retry<F, Fut, T, E>(config: RetryConfig, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(config, op, |_| true).await
}

/// Like [`retry`], but a failure is only re-issued when `should_retry` says
/// so; anything else is returned immediately without backoff.
///
/// # Errors
/// Returns the first non-retryable error, or the error of the final attempt.
pub async fn retry_if<F, Fut, T, E, P>(
    config: RetryConfig,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && should_retry(&err) => {
                let backoff = config.delay_for(attempt);
                warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Operation failed, backing off: {err}"
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
