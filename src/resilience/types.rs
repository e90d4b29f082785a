//! Error type shared by every resilience wrapper.

use std::fmt;
use std::time::Duration;

/// Why a wrapped call did not produce a value.
///
/// `E` is the wrapped operation's own error type. Wrappers that nest produce
/// `ResilienceError<ResilienceError<E>>`; [`flatten`](ResilienceError::flatten)
/// collapses that back to a single level.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The breaker is open and its cool-down has not elapsed. The operation
    /// was not invoked.
    CircuitOpen { name: String, retry_after: Duration },

    /// The breaker is half-open and every trial slot is taken. The operation
    /// was not invoked.
    HalfOpenSaturated { name: String, max_calls: u32 },

    /// The deadline won the race.
    Timeout { after: Duration, message: String },

    /// No token became available in time. The operation was not invoked.
    RateLimited { name: String },

    /// Every attempt failed; `last` is the final attempt's failure.
    RetriesExhausted {
        attempts: u32,
        last: Box<ResilienceError<E>>,
    },

    /// The operation itself failed.
    Operation(E),
}

/// Result type for wrapped calls.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E> {
    /// The innermost failure, looking through `RetriesExhausted`.
    pub fn last_error(&self) -> &ResilienceError<E> {
        match self {
            ResilienceError::RetriesExhausted { last, .. } => last.last_error(),
            other => other,
        }
    }

    /// Refused by an open or saturated breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(
            self.last_error(),
            ResilienceError::CircuitOpen { .. } | ResilienceError::HalfOpenSaturated { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.last_error(), ResilienceError::Timeout { .. })
    }

    /// Refused before the operation ran (breaker or rate limiter).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.last_error(),
            ResilienceError::CircuitOpen { .. }
                | ResilienceError::HalfOpenSaturated { .. }
                | ResilienceError::RateLimited { .. }
        )
    }

    /// The operation's own error, if that is what ultimately failed.
    pub fn operation_error(&self) -> Option<&E> {
        match self.last_error() {
            ResilienceError::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Owned form of [`operation_error`](Self::operation_error).
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ResilienceError::Operation(err) => Some(err),
            ResilienceError::RetriesExhausted { last, .. } => (*last).into_operation_error(),
            _ => None,
        }
    }

    /// Convert the operation error, keeping everything else.
    pub fn map_operation<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            ResilienceError::Operation(err) => ResilienceError::Operation(f(err)),
            ResilienceError::RetriesExhausted { attempts, last } => ResilienceError::RetriesExhausted {
                attempts,
                last: Box::new((*last).map_operation(f)),
            },
            ResilienceError::CircuitOpen { name, retry_after } => {
                ResilienceError::CircuitOpen { name, retry_after }
            }
            ResilienceError::HalfOpenSaturated { name, max_calls } => {
                ResilienceError::HalfOpenSaturated { name, max_calls }
            }
            ResilienceError::Timeout { after, message } => ResilienceError::Timeout { after, message },
            ResilienceError::RateLimited { name } => ResilienceError::RateLimited { name },
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>> {
    /// Collapse one level of nesting.
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            ResilienceError::Operation(inner) => inner,
            ResilienceError::RetriesExhausted { attempts, last } => ResilienceError::RetriesExhausted {
                attempts,
                last: Box::new((*last).flatten()),
            },
            ResilienceError::CircuitOpen { name, retry_after } => {
                ResilienceError::CircuitOpen { name, retry_after }
            }
            ResilienceError::HalfOpenSaturated { name, max_calls } => {
                ResilienceError::HalfOpenSaturated { name, max_calls }
            }
            ResilienceError::Timeout { after, message } => ResilienceError::Timeout { after, message },
            ResilienceError::RateLimited { name } => ResilienceError::RateLimited { name },
        }
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResilienceError::CircuitOpen { name, retry_after } => {
                write!(f, "Circuit breaker '{}' is open, retry in {:?}", name, retry_after)
            }
            ResilienceError::HalfOpenSaturated { name, max_calls } => write!(
                f,
                "Circuit breaker '{}' is half-open with {} trial call(s) in flight",
                name, max_calls
            ),
            ResilienceError::Timeout { after, message } => write!(f, "{} after {:?}", message, after),
            ResilienceError::RateLimited { name } => write!(f, "Rate limiter '{}' denied the call", name),
            ResilienceError::RetriesExhausted { attempts, last } => {
                write!(f, "Retries exhausted after {} attempts: {}", attempts, last)
            }
            ResilienceError::Operation(err) => write!(f, "{}", err),
        }
    }
}

impl<E> std::error::Error for ResilienceError<E>
where
    E: fmt::Debug + fmt::Display + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResilienceError::RetriesExhausted { last, .. } => Some(&**last),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhausted(last: ResilienceError<&'static str>) -> ResilienceError<&'static str> {
        ResilienceError::RetriesExhausted {
            attempts: 3,
            last: Box::new(last),
        }
    }

    #[test]
    fn test_inspectors_look_through_retries() {
        let err = exhausted(ResilienceError::Timeout {
            after: Duration::from_millis(100),
            message: "Operation timed out".into(),
        });
        assert!(err.is_timeout());
        assert!(!err.is_rejection());
        assert!(err.operation_error().is_none());

        let err = exhausted(ResilienceError::Operation("boom"));
        assert_eq!(err.operation_error(), Some(&"boom"));
        assert_eq!(err.into_operation_error(), Some("boom"));
    }

    #[test]
    fn test_rejections() {
        let open: ResilienceError<()> = ResilienceError::CircuitOpen {
            name: "b".into(),
            retry_after: Duration::from_secs(1),
        };
        assert!(open.is_circuit_open());
        assert!(open.is_rejection());

        let limited: ResilienceError<()> = ResilienceError::RateLimited { name: "r".into() };
        assert!(!limited.is_circuit_open());
        assert!(limited.is_rejection());
    }

    #[test]
    fn test_flatten_nested() {
        let nested: ResilienceError<ResilienceError<&str>> = ResilienceError::RetriesExhausted {
            attempts: 2,
            last: Box::new(ResilienceError::Operation(ResilienceError::Timeout {
                after: Duration::from_millis(5),
                message: "slow".into(),
            })),
        };

        let flat = nested.flatten();
        assert!(matches!(
            flat,
            ResilienceError::RetriesExhausted { attempts: 2, ref last } if last.is_timeout()
        ));

        let inner: ResilienceError<ResilienceError<&str>> =
            ResilienceError::Operation(ResilienceError::Operation("x"));
        assert!(matches!(inner.flatten(), ResilienceError::Operation("x")));
    }

    #[test]
    fn test_map_operation() {
        let err = exhausted(ResilienceError::Operation("boom")).map_operation(|s| s.len());
        assert_eq!(err.into_operation_error(), Some(4));
    }

    #[test]
    fn test_error_display() {
        let err = exhausted(ResilienceError::Operation("boom"));
        assert_eq!(err.to_string(), "Retries exhausted after 3 attempts: boom");

        let err: ResilienceError<String> = ResilienceError::RateLimited { name: "rpc".into() };
        assert_eq!(err.to_string(), "Rate limiter 'rpc' denied the call");
    }
}
