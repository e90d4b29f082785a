//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race an operation against a deadline
//! - Report a lost race as a distinct [`ResilienceError::Timeout`]
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - [`with_timeout`] drops the operation when the deadline wins, so it
//!   stops at its next await point and its resources are released
//! - [`with_timeout_detached`] spawns the operation instead; the caller
//!   gives up waiting but the operation keeps running to completion

use std::future::Future;
use std::time::Duration;

use crate::observability::metrics;
use crate::resilience::types::ResilienceError;

const DEFAULT_MESSAGE: &str = "Operation timed out";

/// Run `operation` with a deadline, cancelling it if the deadline wins.
pub async fn with_timeout<Fut, T, E>(operation: Fut, timeout: Duration) -> Result<T, ResilienceError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    with_timeout_message(operation, timeout, DEFAULT_MESSAGE).await
}

/// [`with_timeout`] with a caller-supplied error message.
pub async fn with_timeout_message<Fut, T, E>(
    operation: Fut,
    timeout: Duration,
    message: impl Into<String>,
) -> Result<T, ResilienceError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result.map_err(ResilienceError::Operation),
        Err(_) => Err(timed_out(timeout, message.into())),
    }
}

/// Run `operation` on its own task and stop waiting after `timeout`.
///
/// The operation is not cancelled when the deadline wins; its eventual
/// result is discarded.
pub async fn with_timeout_detached<Fut, T, E>(
    operation: Fut,
    timeout: Duration,
) -> Result<T, ResilienceError<E>>
where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let handle = tokio::spawn(operation);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result.map_err(ResilienceError::Operation),
        Ok(Err(join_err)) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
        Ok(Err(_)) => Err(ResilienceError::Timeout {
            after: timeout,
            message: "Operation cancelled by runtime shutdown".to_string(),
        }),
        Err(_) => Err(timed_out(timeout, DEFAULT_MESSAGE.to_string())),
    }
}

fn timed_out<E>(after: Duration, message: String) -> ResilienceError<E> {
    tracing::warn!(timeout_ms = after.as_millis() as u64, message = %message, "Deadline exceeded");
    metrics::record_timeout();
    ResilienceError::Timeout { after, message }
}
