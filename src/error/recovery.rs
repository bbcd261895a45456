//! Bounded retry with exponential backoff for transient failures
//!
//! Only errors reported as recoverable by [`AppError::is_recoverable`] are
//! retried. The cancellation token is checked before every attempt and while
//! sleeping between attempts.

use super::{AppError, Result};
use crate::logging::Logger;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::defaults::DEFAULT_RETRY_ATTEMPTS,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy with the given attempt count and default delays
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-recoverable error,
/// or the attempt budget is spent. Returns the last error on exhaustion.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    logger: &Logger,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled(operation_name.to_string()));
        }

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_recoverable() || attempt >= max_attempts {
            if attempt > 1 {
                logger
                    .warn(&format!("{} failed after {} attempts", operation_name, attempt))
                    .field("operation", operation_name)
                    .field("attempts", attempt)
                    .error_info(&error)
                    .log()
                    .await;
            }
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        logger
            .debug(&format!(
                "{} attempt {} failed, retrying in {}ms: {}",
                operation_name,
                attempt,
                delay.as_millis(),
                error
            ))
            .field("operation", operation_name)
            .field("attempt", attempt)
            .field("delay_ms", delay.as_millis() as u64)
            .log()
            .await;

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AppError::cancelled(operation_name.to_string()));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
