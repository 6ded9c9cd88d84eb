use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::BatchConfig;
use crate::error::{AppError, Result};

/// How often and how patiently a network call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Delay after the `attempt`-th failure (0-based). Rate limits wait twice
    /// as long.
    pub fn delay(&self, attempt: u32, error: &AppError) -> Duration {
        let base = self.initial_backoff * (1u32 << attempt.min(16));
        if matches!(error, AppError::RateLimited(_)) {
            base * 2
        } else {
            base
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt, &e);
                tracing::warn!(
                    call = what,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
