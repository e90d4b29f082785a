//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failed operation with exponential backoff
//! - Stop after `max_retries` retries and surface the last failure
//!
//! # Design Decisions
//! - Attempts are strictly sequential; the next one is scheduled only after
//!   the previous one has failed and its delay has elapsed
//! - `retry_with_backoff_if` lets callers skip errors that retrying cannot
//!   fix, such as an open circuit

use std::future::Future;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::types::ResilienceError;

/// Run `operation`, retrying every failure.
///
/// After `max_retries` retries the call fails with
/// [`ResilienceError::RetriesExhausted`] wrapping the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_if(operation, config, |_| true).await
}

/// Like [`retry_with_backoff`], but only retries errors for which
/// `should_retry` returns `true`. Other errors return at once as
/// [`ResilienceError::Operation`].
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    mut operation: F,
    config: &RetryConfig,
    mut should_retry: P,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !should_retry(&err) {
            tracing::debug!(attempt, "Error is not retryable");
            return Err(ResilienceError::Operation(err));
        }

        let retry = attempt - 1;
        if retry >= config.max_retries {
            tracing::warn!(attempts = attempt, "Retries exhausted");
            return Err(ResilienceError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(ResilienceError::Operation(err)),
            });
        }

        let delay = calculate_backoff(retry, config);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Retrying operation");
        metrics::record_retry(attempt);
        tokio::time::sleep(delay).await;
    }
}
