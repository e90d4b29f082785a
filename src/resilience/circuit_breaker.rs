//! Circuit breaker for a flaky collaborator.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: collaborator assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: reset_timeout elapsed since the last failure (checked on the next call)
//! Half-Open → Closed: any trial call succeeds
//! Half-Open → Open: any trial call fails (cool-down restarts)
//! ```
//!
//! # Design Decisions
//! - Fail fast in Open state; the operation is never invoked
//! - Trial slots are RAII: a cancelled trial frees its slot without
//!   counting as success or failure
//! - Every transition starts a new generation. A call settling after the
//!   generation it was admitted in has ended cannot move the state or
//!   free a slot of the current half-open period

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::validation;
use crate::config::CircuitBreakerConfig;
use crate::error::ToolkitResult;
use crate::observability::metrics;
use crate::resilience::types::ResilienceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time breaker counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_in_flight: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
    times_opened: u64,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> ToolkitResult<Self> {
        validation::ensure(|errors| {
            validation::check_circuit_breaker(&config, "circuit_breaker", errors)
        })?;

        Ok(Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: config.reset_timeout(),
            half_open_max_calls: config.half_open_max_calls,
            name: config.name,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                last_failure: None,
                half_open_in_flight: 0,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
                times_opened: 0,
            }),
        })
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// Rejections are returned as [`ResilienceError::CircuitOpen`] or
    /// [`ResilienceError::HalfOpenSaturated`] without invoking `operation`.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let call = self.admit()?;
        let result = operation().await;
        call.settle(result.is_ok());
        result.map_err(ResilienceError::Operation)
    }

    fn admit<E>(&self) -> Result<Call<'_>, ResilienceError<E>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Ok(Call::new(self, false, inner.generation)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(self.reset_timeout, |at| now.saturating_duration_since(at));
                if elapsed >= self.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_in_flight = 1;
                    Ok(Call::new(self, true, inner.generation))
                } else {
                    inner.total_rejections += 1;
                    metrics::record_breaker_rejection(&self.name);
                    Err(ResilienceError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: self.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(Call::new(self, true, inner.generation))
                } else {
                    inner.total_rejections += 1;
                    metrics::record_breaker_rejection(&self.name);
                    Err(ResilienceError::HalfOpenSaturated {
                        name: self.name.clone(),
                        max_calls: self.half_open_max_calls,
                    })
                }
            }
        }
    }

    fn on_success(&self, trial: bool, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.consecutive_failures = 0;
        if trial && inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    fn on_failure(&self, trial: bool, generation: u64) {
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::HalfOpen if trial && inner.generation == generation => {
                self.transition(&mut inner, CircuitState::Open)
            }
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                self.transition(&mut inner, CircuitState::Open)
            }
            _ => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.half_open_in_flight = 0;

        match to {
            CircuitState::Open => {
                inner.times_opened += 1;
                tracing::warn!(
                    breaker = %self.name,
                    from = from.as_str(),
                    consecutive_failures = inner.consecutive_failures,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit half-open, allowing trial calls");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                tracing::info!(breaker = %self.name, from = from.as_str(), "Circuit closed");
            }
        }
        metrics::record_breaker_transition(&self.name, to.as_str());
    }

    /// Current state. An open circuit whose cool-down has elapsed still
    /// reports `Open` until the next call moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Force the circuit closed and forget recent failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = None;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.consecutive_failures = 0;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_in_flight: inner.half_open_in_flight,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            times_opened: inner.times_opened,
        }
    }
}

/// An admitted call, tagged with the generation that admitted it.
/// Dropping it unsettled frees a trial slot.
struct Call<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl<'a> Call<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool, generation: u64) -> Self {
        Self {
            breaker,
            trial,
            generation,
            settled: false,
        }
    }

    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.trial, self.generation);
        } else {
            self.breaker.on_failure(self.trial, self.generation);
        }
    }
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::sync::oneshot;

    fn breaker(failure_threshold: u32, reset_timeout_ms: u64, half_open_max_calls: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            name: "test".to_string(),
            failure_threshold,
            reset_timeout_ms,
            half_open_max_calls,
        })
        .unwrap()
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ResilienceError<&'static str>> {
        breaker.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, ResilienceError<&'static str>> {
        breaker.execute(|| async { Ok::<_, &str>(1) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_cooldown_and_recovery() {
        let cb = breaker(3, 1_000, 1);

        for _ in 0..3 {
            assert!(matches!(fail(&cb).await, Err(ResilienceError::Operation("boom"))));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Fails fast without invoking the operation.
        let invoked = AtomicU32::new(0);
        let rejected = cb
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(succeed(&cb).await.unwrap(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_counts_down() {
        let cb = breaker(1, 1_000, 1);
        let _ = fail(&cb).await;

        tokio::time::advance(Duration::from_millis(400)).await;
        match succeed(&cb).await {
            Err(ResilienceError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_millis(600));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_and_restarts_cooldown() {
        let cb = breaker(2, 1_000, 1);
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(matches!(fail(&cb).await, Err(ResilienceError::Operation(_))));
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(succeed(&cb).await, Err(ResilienceError::CircuitOpen { .. })));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.stats().times_opened, 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2, 1_000, 1);
        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trials() {
        let cb = Arc::new(breaker(1, 100, 1));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release, gate) = oneshot::channel::<()>();
        let trial = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.execute(|| async {
                    let _ = gate.await;
                    Ok::<_, &str>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(matches!(
            succeed(&cb).await,
            Err(ResilienceError::HalfOpenSaturated { max_calls: 1, .. })
        ));

        release.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_frees_slot() {
        let cb = breaker(1, 100, 1);
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            cb.execute(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, &str>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().half_open_in_flight, 0);

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    fn parked_trial(
        cb: &Arc<CircuitBreaker>,
    ) -> (oneshot::Sender<()>, tokio::task::JoinHandle<Result<(), ResilienceError<&'static str>>>) {
        let (release, gate) = oneshot::channel::<()>();
        let cb = cb.clone();
        let handle = tokio::spawn(async move {
            cb.execute(|| async {
                let _ = gate.await;
                Ok::<_, &str>(())
            })
            .await
        });
        (release, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cancelled_trial_keeps_new_budget() {
        let cb = Arc::new(breaker(1, 100, 2));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        let (_stale_release, stale) = parked_trial(&cb);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cb.stats().half_open_in_flight, 1);

        // A second trial fails and reopens while the first is still parked.
        assert!(matches!(fail(&cb).await, Err(ResilienceError::Operation(_))));
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_c, trial_c) = parked_trial(&cb);
        let (release_d, trial_d) = parked_trial(&cb);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().half_open_in_flight, 2);

        stale.abort();
        assert!(stale.await.unwrap_err().is_cancelled());
        assert_eq!(cb.stats().half_open_in_flight, 2);
        assert!(matches!(
            succeed(&cb).await,
            Err(ResilienceError::HalfOpenSaturated { max_calls: 2, .. })
        ));

        release_c.send(()).unwrap();
        release_d.send(()).unwrap();
        assert!(trial_c.await.unwrap().is_ok());
        assert!(trial_d.await.unwrap().is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_trial_success_does_not_close() {
        let cb = Arc::new(breaker(1, 100, 2));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_stale, stale) = parked_trial(&cb);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_fresh, fresh) = parked_trial(&cb);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        release_stale.send(()).unwrap();
        assert!(stale.await.unwrap().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().half_open_in_flight, 1);

        release_fresh.send(()).unwrap();
        assert!(fresh.await.unwrap().is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset() {
        let cb = breaker(1, 60_000, 1);
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    async fn test_stats() {
        let cb = breaker(1, 60_000, 1);
        let _ = succeed(&cb).await;
        let _ = fail(&cb).await;
        let _ = succeed(&cb).await;

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.total_rejections, 1);
        assert_eq!(stats.times_opened, 1);
    }

    #[test]
    fn test_invalid_config() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            half_open_max_calls: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(CircuitBreaker::new(config).is_err());
    }
}
