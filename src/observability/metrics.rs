//! Metrics collection and exposition.
//!
//! # Metrics
//! - `toolkit_cache_evictions_total` (counter): by cache, reason
//! - `toolkit_queue_events_total` (counter): by queue, event
//! - `toolkit_queue_depth` (gauge): current queue size
//! - `toolkit_breaker_transitions_total` (counter): by breaker, target state
//! - `toolkit_breaker_rejections_total` (counter): fast failures by breaker
//! - `toolkit_rate_limited_total` (counter): denied acquisitions by limiter
//! - `toolkit_retries_total` (counter): retry attempts scheduled
//! - `toolkit_timeouts_total` (counter): deadlines that won the race
//! - `toolkit_limiter_in_flight` (gauge): running operations by limiter

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_cache_eviction(cache: &str, reason: &'static str) {
    metrics::counter!(
        "toolkit_cache_evictions_total",
        "cache" => cache.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_queue_event(queue: &str, event: &'static str) {
    metrics::counter!(
        "toolkit_queue_events_total",
        "queue" => queue.to_string(),
        "event" => event
    )
    .increment(1);
}

pub fn record_queue_depth(queue: &str, size: usize) {
    metrics::gauge!("toolkit_queue_depth", "queue" => queue.to_string()).set(size as f64);
}

pub fn record_breaker_transition(breaker: &str, state: &'static str) {
    metrics::counter!(
        "toolkit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_breaker_rejection(breaker: &str) {
    metrics::counter!("toolkit_breaker_rejections_total", "breaker" => breaker.to_string())
        .increment(1);
}

pub fn record_rate_limited(limiter: &str) {
    metrics::counter!("toolkit_rate_limited_total", "limiter" => limiter.to_string())
        .increment(1);
}

pub fn record_retry(attempt: u32) {
    metrics::counter!("toolkit_retries_total", "attempt" => attempt.to_string()).increment(1);
}

pub fn record_timeout() {
    metrics::counter!("toolkit_timeouts_total").increment(1);
}

pub fn record_in_flight(limiter: &str, running: usize) {
    metrics::gauge!("toolkit_limiter_in_flight", "limiter" => limiter.to_string())
        .set(running as f64);
}
