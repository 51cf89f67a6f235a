use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{CoordError, Result};

/// Bounded retry around a whole coordination phase.
///
/// The closure is re-run from the top on each attempt; callers must not use
/// this around a single poll inside a phase. Cancellation and non-retryable
/// errors end the loop immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            retries: config.retries,
            delay: Duration::from_millis(config.delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn backoff(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the retries are used up. The attempt number (starting at 1) is passed in.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(CoordError::Cancelled);
            }

            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt > self.retries {
                return Err(err);
            }

            tracing::warn!(
                attempt,
                retries = self.retries,
                error = %err,
                "Coordination phase failed, retrying from the top"
            );
            attempt += 1;

            let backoff = self.backoff();
            if !backoff.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CoordError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}
