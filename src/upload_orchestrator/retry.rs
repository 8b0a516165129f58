//! Bounded retry with linear backoff

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

/// Retry policy for remote calls
///
/// Attempt `n` (0-based) that fails is followed by a sleep of
/// `backoff_step * (n + 1)`; no sleep follows the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt_index`
    pub fn delay_after(&self, attempt_index: u32) -> Duration {
        self.backoff_step * (attempt_index + 1)
    }

    /// Run `operation` until it succeeds or attempts are exhausted.
    /// The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation = %label, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation = %label,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        operation = %label,
                        attempts = attempts,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }
}
