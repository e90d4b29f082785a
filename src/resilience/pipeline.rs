//! Composed call path.
//!
//! # Data Flow
//! ```text
//! call(operation)
//!     → ConcurrencyLimiter (wait for a slot, FIFO)
//!     → RateLimiter (optional, wait up to acquire_timeout_ms for a token)
//!     → CircuitBreaker (fail fast while open)
//!     → retry_with_backoff (sequential attempts)
//!         → with_timeout (per-attempt deadline)
//!             → operation()
//! ```
//!
//! The breaker sits outside the retry loop, so one logical call counts as
//! one breaker outcome and retries never hammer an open circuit.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::config::validation;
use crate::config::{RetryConfig, ToolkitConfig};
use crate::error::ToolkitResult;
use crate::limits::{ConcurrencyLimiter, LimiterStats, RateLimiter, RateLimiterStats};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitStats};
use crate::resilience::retries::retry_with_backoff_if;
use crate::resilience::timeouts::with_timeout;
use crate::resilience::types::ResilienceError;

/// Snapshot of every gate in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub limiter: LimiterStats,
    pub breaker: CircuitStats,
    pub rate_limiter: Option<RateLimiterStats>,
}

/// Limiter, rate gate, breaker, retries and timeout around one collaborator.
#[derive(Debug)]
pub struct CallPipeline {
    limiter: ConcurrencyLimiter,
    rate_limiter: Option<RateLimiter>,
    rate_wait: Duration,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    timeout: Duration,
}

impl CallPipeline {
    pub fn from_config(config: &ToolkitConfig) -> ToolkitResult<Self> {
        validation::ensure(|errors| {
            validation::check_retries(&config.retries, "retries", errors);
            validation::check_timeouts(&config.timeouts, "timeouts", errors);
        })?;

        let rate_limiter = if config.rate_limit.enabled {
            Some(RateLimiter::new(config.rate_limit.clone())?)
        } else {
            None
        };

        Ok(Self {
            limiter: ConcurrencyLimiter::new(config.concurrency.clone())?,
            rate_limiter,
            rate_wait: Duration::from_millis(config.rate_limit.acquire_timeout_ms),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone())?,
            retry: config.retries.clone(),
            timeout: config.timeouts.operation(),
        })
    }

    /// Run `operation` through every gate.
    ///
    /// `operation` is invoked once per attempt. Rejections never reach it:
    /// the rate gate yields [`ResilienceError::RateLimited`] and the breaker
    /// yields [`ResilienceError::CircuitOpen`] or
    /// [`ResilienceError::HalfOpenSaturated`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.limiter
            .execute(|| async move {
                if let Some(rate) = &self.rate_limiter {
                    if !rate.acquire(1, self.rate_wait).await {
                        return Err(ResilienceError::RateLimited {
                            name: rate.name().to_string(),
                        });
                    }
                }

                self.breaker
                    .execute(|| async move {
                        let mut operation = operation;
                        retry_with_backoff_if(
                            || with_timeout(operation(), self.timeout),
                            &self.retry,
                            |err: &ResilienceError<E>| !err.is_rejection(),
                        )
                        .await
                    })
                    .await
                    .map_err(|err| err.flatten().flatten())
            })
            .await
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            limiter: self.limiter.stats(),
            breaker: self.breaker.stats(),
            rate_limiter: self.rate_limiter.as_ref().map(RateLimiter::stats),
        }
    }
}
