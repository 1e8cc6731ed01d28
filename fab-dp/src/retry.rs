//! Shared retry policy with exponential backoff
//!
//! One policy abstraction for every retried operation: external capability
//! calls (seconds-scale base delay) and hot SQLite writes (milliseconds-scale
//! base delay, lock-error classifier). Call sites supply a retryable-error
//! classifier; non-retryable errors abort after the first attempt.

use std::future::Future;
use std::time::Duration;

/// Outcome of a retried operation that did not succeed
#[derive(Debug)]
pub enum RetryError<E> {
    /// All attempts failed with retryable errors
    Exhausted { attempts: u32, last_error: E },
    /// The classifier rejected the error; no further attempts were made
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(e) => e,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => write!(f, "exhausted after {} attempts: {}", attempts, last_error),
            RetryError::NonRetryable(e) => write!(f, "non-retryable: {}", e),
        }
    }
}

/// Bounded exponential-backoff retry policy
///
/// Delay after the n-th failed attempt is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total invocation attempts (not "retries after the first")
    pub max_attempts: u32,
    /// Backoff base delay, doubled after each failed attempt
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        debug_assert!(max_attempts >= 1);
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Policy for external capability calls, from configuration
    pub fn capability(config: &fab_common::config::RetryConfig) -> Self {
        Self::new(
            config.max_attempts.max(1),
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Policy for transient SQLite lock contention on hot writes
    pub fn db_lock() -> Self {
        Self::new(5, Duration::from_millis(10))
    }

    /// Run `operation` under this policy.
    ///
    /// `is_retryable` classifies errors; a non-retryable error is returned
    /// immediately without consuming further attempts. The closure receives
    /// the 1-based attempt number.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        operation_name: &str,
        is_retryable: C,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) if !is_retryable(&err) => {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Non-retryable error, aborting"
                    );
                    return Err(RetryError::NonRetryable(err));
                }
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let backoff = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
