//! Retry utilities with exponential backoff for resilient API calls.
//!
//! Every attempt races the operation against a per-attempt timeout and a
//! cancellation token. Between attempts the loop sleeps for
//! `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`;
//! the sleep itself is also cancellable.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Time limit for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryConfig {
    /// Set the total number of attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the per-attempt timeout
    pub fn attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = limit;
        self
    }

    /// Set the base delay
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay to wait after the `attempt`-th (1-based) failure
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

/// Errors the retry loop knows how to classify and synthesize
pub trait RetryableError: std::fmt::Display + Sized {
    /// Whether another attempt could succeed
    fn is_retryable(&self) -> bool;

    /// Error for an attempt that exceeded its time limit
    fn timed_out(after: Duration) -> Self;

    /// Error for an operation abandoned through its cancellation token
    fn cancelled() -> Self;
}

/// Execute an async operation with retry logic
///
/// Non-retryable errors and cancellation return immediately; retryable ones
/// are retried until `max_attempts` is exhausted, returning the last error.
pub async fn with_retry<T, E, F, Fut>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(E::cancelled()),
            outcome = timeout(config.attempt_timeout, operation(attempt)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(config.attempt_timeout)),
            },
        };

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempt,
                        attempt - 1
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            tracing::debug!("Permanent error on attempt {}: {}", attempt, error);
            return Err(error);
        }

        if attempt >= max_attempts {
            tracing::warn!("Operation failed after {} attempts: {}", attempt, error);
            return Err(error);
        }

        let delay = config.delay_for(attempt);
        tracing::debug!(
            "Transient error on attempt {}/{}: {}, retrying in {:?}",
            attempt,
            max_attempts,
            error,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(E::cancelled()),
            _ = sleep(delay) => {}
        }
    }
}
