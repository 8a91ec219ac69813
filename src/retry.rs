//! Retry with configurable backoff for navigation attempts.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub use crate::config::BackoffStrategy;
use crate::config::RetryConfig;

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    /// Navigation default: 3 attempts, fixed 5 s apart.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            strategy: config.strategy,
        }
    }

    /// Same attempts and strategy with no waiting; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Delay after failed attempt `attempt` (1-based). Zero for attempt 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// Run `operation` until it succeeds or `max_attempts` is spent.
    ///
    /// The closure receives the 1-based attempt number. On exhaustion the
    /// last error is returned along with the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, (u32, E)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        warn!("All {} attempts exhausted, giving up: {}", self.max_attempts, e);
                        return Err((attempt, e));
                    }

                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        "Attempt failed ({}), retrying in {:?} with {:?} backoff",
                        e, delay, self.strategy
                    );

                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
