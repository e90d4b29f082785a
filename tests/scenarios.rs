//! End-to-end behaviour of the primitives, on a paused clock where time matters.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bounded_resilience::config::{CacheConfig, CircuitBreakerConfig, QueueConfig};
use bounded_resilience::resilience::retry_with_backoff_if;
use bounded_resilience::{
    BoundedCache, BoundedQueue, CallPipeline, CircuitBreaker, CircuitState, ConcurrencyLimiter,
    RateLimiter, ResilienceError,
};

mod common;

#[test]
fn test_cache_evicts_least_recently_set() {
    let cache = BoundedCache::new(CacheConfig::new("scenario", 2, 0)).unwrap();
    cache.set("a", 1);
    cache.set("b", 2);
    cache.set("c", 3);

    assert_eq!(cache.get(&"a"), None);
    assert_eq!(cache.get(&"b"), Some(2));
    assert_eq!(cache.get(&"c"), Some(3));
}

#[test]
fn test_cache_get_refreshes_recency() {
    let cache = BoundedCache::new(CacheConfig::new("scenario", 2, 0)).unwrap();
    cache.set("a", 1);
    cache.set("b", 2);
    assert_eq!(cache.get(&"a"), Some(1));
    cache.set("c", 3);

    assert_eq!(cache.get(&"b"), None);
    assert_eq!(cache.get(&"a"), Some(1));
    assert_eq!(cache.get(&"c"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_boundary() {
    let cache = BoundedCache::new(CacheConfig::new("ttl", 10, 1_000)).unwrap();
    cache.set("quote", 42);

    tokio::time::advance(Duration::from_millis(999)).await;
    assert_eq!(cache.get(&"quote"), Some(42));

    tokio::time::advance(Duration::from_millis(2)).await;
    assert_eq!(cache.get(&"quote"), None);
    cache.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_then_recovers() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        name: "scenario".to_string(),
        failure_threshold: 2,
        reset_timeout_ms: 1_000,
        half_open_max_calls: 1,
    })
    .unwrap();

    for _ in 0..2 {
        let result = breaker.execute(|| async { Err::<(), _>("down") }).await;
        assert!(matches!(result, Err(ResilienceError::Operation("down"))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(500)).await;
    let invoked = AtomicU32::new(0);
    let result = breaker
        .execute(|| async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;
    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(501)).await;
    let result = breaker.execute(|| async { Ok::<_, &str>("fresh") }).await;
    assert_eq!(result.unwrap(), "fresh");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_burst_and_refill() {
    let limiter = RateLimiter::with_rate(5.0, 1.0).unwrap();
    for _ in 0..5 {
        assert!(limiter.try_acquire(1));
    }
    assert!(!limiter.try_acquire(1));

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(limiter.try_acquire(1));
}

#[test]
fn test_queue_backpressure_hysteresis() {
    let config = QueueConfig {
        high_water_mark: Some(3),
        low_water_mark: Some(1),
        ..QueueConfig::new("scenario", 3)
    };
    let queue = BoundedQueue::new(config).unwrap();

    for i in 0..3 {
        queue.enqueue(i);
    }
    assert!(queue.is_backpressured());

    assert_eq!(queue.dequeue(), Some(0));
    assert!(queue.is_backpressured());
    assert_eq!(queue.dequeue(), Some(1));
    assert_eq!(queue.len(), 1);
    assert!(!queue.is_backpressured());
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_rides_out_transient_failures() {
    let pipeline = CallPipeline::from_config(&common::pipeline_config()).unwrap();
    let collaborator = common::Collaborator::new(2, Duration::from_millis(5));

    let result = pipeline.call(|| collaborator.call()).await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(collaborator.calls(), 3);
    assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_fails_fast_once_open() {
    let pipeline = CallPipeline::from_config(&common::pipeline_config()).unwrap();
    let collaborator = common::Collaborator::new(u32::MAX, Duration::from_millis(5));

    for _ in 0..2 {
        let err = pipeline.call(|| collaborator.call()).await.unwrap_err();
        assert!(matches!(err, ResilienceError::RetriesExhausted { attempts: 3, .. }));
    }
    assert_eq!(collaborator.calls(), 6);

    let err = pipeline.call(|| collaborator.call()).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(collaborator.calls(), 6);
    assert_eq!(pipeline.stats().breaker.total_rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_around_breaker_stops_on_rejection() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        reset_timeout_ms: 60_000,
        ..CircuitBreakerConfig::default()
    })
    .unwrap();
    let collaborator = common::Collaborator::new(u32::MAX, Duration::from_millis(1));
    let (breaker, collaborator) = (&breaker, &collaborator);

    let result = retry_with_backoff_if(
        move || breaker.execute(move || collaborator.call()),
        &common::quick_retries(5),
        |err: &ResilienceError<String>| !err.is_rejection(),
    )
    .await;

    // First attempt trips the breaker, the second is refused and not retried.
    let err = result.unwrap_err().flatten();
    assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
    assert_eq!(collaborator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_bounds_parallel_calls() {
    let limiter = Arc::new(ConcurrencyLimiter::with_max(2).unwrap());
    let collaborator = Arc::new(common::Collaborator::new(0, Duration::from_millis(100)));
    let start = tokio::time::Instant::now();

    let calls = (0..6).map(|_| {
        let limiter = limiter.clone();
        let collaborator = collaborator.clone();
        async move { limiter.execute(|| collaborator.call()).await }
    });
    let results = futures_util::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    // Six 100ms calls, two at a time.
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(limiter.stats().running, 0);
}
