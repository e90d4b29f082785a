//! Token bucket rate limiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::validation;
use crate::config::RateLimitConfig;
use crate::error::ToolkitResult;
use crate::observability::metrics;

/// Shortest sleep between polls in [`RateLimiter::acquire`].
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A simple token bucket, refilled lazily from elapsed time.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, count: f64, capacity: f64, refill_rate: f64) -> bool {
        self.refill(capacity, refill_rate);
        if self.tokens >= count {
            self.tokens -= count;
            true
        } else {
            false
        }
    }
}

/// Point-in-time limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub tokens: f64,
    pub max_tokens: f64,
    pub refill_rate_per_second: f64,
    pub total_granted: u64,
    pub total_denied: u64,
}

/// Token bucket throughput gate.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_tokens: f64,
    refill_rate: f64,
    bucket: Mutex<TokenBucket>,
    granted: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> ToolkitResult<Self> {
        validation::ensure(|errors| validation::check_rate_limit(&config, "rate_limit", errors))?;

        Ok(Self {
            bucket: Mutex::new(TokenBucket::new(config.max_tokens)),
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate_per_second,
            name: config.name,
            granted: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        })
    }

    /// Shorthand for an unnamed limiter starting with a full bucket.
    pub fn with_rate(max_tokens: f64, refill_rate_per_second: f64) -> ToolkitResult<Self> {
        Self::new(RateLimitConfig {
            max_tokens,
            refill_rate_per_second,
            ..RateLimitConfig::default()
        })
    }

    /// Take `count` tokens if available. Denial has no side effect on the bucket.
    pub fn try_acquire(&self, count: u32) -> bool {
        let granted = self.take(count);
        self.record(granted);
        granted
    }

    /// Wait up to `timeout` for `count` tokens.
    ///
    /// Returns `false` at once if `count` exceeds the bucket capacity. A
    /// timeout too large to represent as a deadline waits without one.
    pub async fn acquire(&self, count: u32, timeout: Duration) -> bool {
        if f64::from(count) > self.max_tokens {
            self.record(false);
            return false;
        }

        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.take(count) {
                self.record(true);
                return true;
            }

            let now = Instant::now();
            let mut wait = self.time_until_available(count);
            if let Some(deadline) = deadline {
                if now >= deadline {
                    self.record(false);
                    return false;
                }
                wait = wait.min(deadline - now);
            }
            let wait = wait.max(MIN_POLL_INTERVAL);
            tokio::time::sleep(wait).await;
        }
    }

    fn take(&self, count: u32) -> bool {
        self.bucket
            .lock()
            .try_take(f64::from(count), self.max_tokens, self.refill_rate)
    }

    fn record(&self, granted: bool) {
        if granted {
            self.granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(limiter = %self.name, "Rate limit exceeded");
            metrics::record_rate_limited(&self.name);
        }
    }

    fn time_until_available(&self, count: u32) -> Duration {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.max_tokens, self.refill_rate);
        let deficit = (f64::from(count) - bucket.tokens).max(0.0);
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// Tokens available right now.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.max_tokens, self.refill_rate);
        bucket.tokens
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            name: self.name.clone(),
            tokens: self.available_tokens(),
            max_tokens: self.max_tokens,
            refill_rate_per_second: self.refill_rate,
            total_granted: self.granted.load(Ordering::Relaxed),
            total_denied: self.denied.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::with_rate(5.0, 1.0).unwrap();
        for _ in 0..5 {
            assert!(limiter.try_acquire(1));
        }
        assert!(!limiter.try_acquire(1));

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(limiter.try_acquire(1));
        assert!(!limiter.try_acquire(1));

        let stats = limiter.stats();
        assert_eq!(stats.total_granted, 6);
        assert_eq!(stats.total_denied, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let limiter = RateLimiter::with_rate(3.0, 10.0).unwrap();
        assert!(limiter.try_acquire(3));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((limiter.available_tokens() - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_has_no_side_effect() {
        let limiter = RateLimiter::with_rate(4.0, 1.0).unwrap();
        assert!(limiter.try_acquire(3));
        assert!(!limiter.try_acquire(2));
        assert!(limiter.try_acquire(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumption_bounded_by_capacity_and_rate() {
        let limiter = RateLimiter::with_rate(5.0, 2.0).unwrap();
        let mut consumed = 0u32;
        for step in 0..200u32 {
            if limiter.try_acquire(1 + step % 2) {
                consumed += 1 + step % 2;
            }
            let tokens = limiter.available_tokens();
            assert!((0.0..=5.0).contains(&tokens));
            tokio::time::advance(Duration::from_millis(50)).await;
        }

        // 200 steps of 50ms is 10s of refill at 2 tokens/s.
        assert!(f64::from(consumed) <= 5.0 + 2.0 * 10.0 + 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::with_rate(1.0, 2.0).unwrap();
        assert!(limiter.try_acquire(1));

        let start = Instant::now();
        assert!(limiter.acquire(1, Duration::from_secs(2)).await);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(500));
        assert!(waited < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let limiter = RateLimiter::with_rate(1.0, 0.5).unwrap();
        assert!(limiter.try_acquire(1));

        let start = Instant::now();
        assert!(!limiter.acquire(1, Duration::from_millis(300)).await);
        assert!(start.elapsed() >= Duration::from_millis(300));

        assert!(!limiter.acquire(2, Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_without_deadline() {
        let limiter = RateLimiter::with_rate(1.0, 1.0).unwrap();
        assert!(limiter.try_acquire(1));

        let start = Instant::now();
        assert!(limiter.acquire(1, Duration::MAX).await);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1_000));
        assert!(waited < Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_negligible_rate_times_out() {
        let limiter = RateLimiter::with_rate(1.0, 1e-20).unwrap();
        assert!(limiter.try_acquire(1));

        let start = Instant::now();
        assert!(!limiter.acquire(1, Duration::from_millis(10)).await);
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(limiter.stats().total_denied, 1);
    }

    #[test]
    fn test_invalid_rates() {
        assert!(RateLimiter::with_rate(0.0, 1.0).is_err());
        assert!(RateLimiter::with_rate(5.0, -1.0).is_err());
        assert!(RateLimiter::with_rate(5.0, f64::NAN).is_err());
    }
}
