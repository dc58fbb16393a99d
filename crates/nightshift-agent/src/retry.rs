//! Exponential backoff around a single unreliable call

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry configuration for the remote completion call.
///
/// The wait before attempt `n + 1` is `base_delay * 2^n` (`n` zero-indexed).
/// No jitter is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and base delay
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after the failed attempt `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The closure receives the zero-indexed attempt number. The error of the
    /// final attempt is returned unchanged, without a trailing wait.
    pub async fn invoke<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt + 1,
                        max_attempts,
                        e
                    );

                    if attempt + 1 >= max_attempts {
                        tracing::error!("Request failed after {} attempts", max_attempts);
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::info!("Retrying in {:?}...", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
