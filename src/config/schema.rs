//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the toolkit.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for every primitive in the toolkit.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Bounded LRU cache settings.
    pub cache: CacheConfig,

    /// Bounded queue settings.
    pub queue: QueueConfig,

    /// Concurrency gate settings.
    pub concurrency: ConcurrencyConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Token bucket settings.
    pub rate_limit: RateLimitConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Bounded cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Label used in logs and metrics.
    pub name: String,

    /// Hard upper bound on live entries.
    pub max_size: usize,

    /// Absolute time-to-live per entry in milliseconds (0 = no expiry).
    pub ttl_ms: u64,
}

impl CacheConfig {
    /// Shorthand for a named cache with the given bounds.
    pub fn new(name: impl Into<String>, max_size: usize, ttl_ms: u64) -> Self {
        Self {
            name: name.into(),
            max_size,
            ttl_ms,
        }
    }

    /// TTL as a duration, `None` when expiry is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "cache".to_string(),
            max_size: 1_000,
            ttl_ms: 0,
        }
    }
}

/// Overflow policy of a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Drop the oldest item to make room.
    #[default]
    Fifo,
    /// Keep items ordered by priority; drop the oldest arrival on overflow.
    Priority,
    /// Refuse new items while full.
    Reject,
}

/// Bounded queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Label used in logs and metrics.
    pub name: String,

    /// Hard upper bound on queued items.
    pub max_size: usize,

    /// Size at which backpressure switches on (default: 80% of `max_size`).
    pub high_water_mark: Option<usize>,

    /// Size at or below which backpressure switches off (default: 50% of `max_size`).
    pub low_water_mark: Option<usize>,

    /// Item time-to-live in milliseconds (0 = no expiry).
    pub ttl_ms: u64,

    /// What to do when the queue is full.
    pub eviction_policy: EvictionPolicy,
}

impl QueueConfig {
    /// Shorthand for a named FIFO queue with default watermarks.
    pub fn new(name: impl Into<String>, max_size: usize) -> Self {
        Self {
            name: name.into(),
            max_size,
            ..Self::default()
        }
    }

    /// Effective high watermark.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
            .unwrap_or_else(|| (self.max_size * 8 / 10).max(1))
    }

    /// Effective low watermark, kept strictly below the high one.
    pub fn low_water_mark(&self) -> usize {
        self.low_water_mark
            .unwrap_or_else(|| (self.max_size / 2).min(self.high_water_mark().saturating_sub(1)))
    }

    /// TTL as a duration, `None` when expiry is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "queue".to_string(),
            max_size: 10_000,
            high_water_mark: None,
            low_water_mark: None,
            ttl_ms: 0,
            eviction_policy: EvictionPolicy::Fifo,
        }
    }
}

/// Concurrency gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Label used in logs and metrics.
    pub name: String,

    /// Maximum operations in flight at once.
    pub max_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            name: "limiter".to_string(),
            max_concurrency: 10,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Label used in logs and metrics.
    pub name: String,

    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,

    /// Cool-down after the last failure before a trial is allowed, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Trial calls allowed in flight while half-open.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Cool-down as a duration.
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "breaker".to_string(),
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

/// Token bucket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the rate gate in composed pipelines.
    pub enabled: bool,

    /// Label used in logs and metrics.
    pub name: String,

    /// Bucket capacity (burst size).
    pub max_tokens: f64,

    /// Tokens added per second.
    pub refill_rate_per_second: f64,

    /// How long a pipeline call may wait for a token, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "rate".to_string(),
            max_tokens: 100.0,
            refill_rate_per_second: 50.0,
            acquire_timeout_ms: 1_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single attempt in milliseconds.
    pub operation_ms: u64,
}

impl TimeoutConfig {
    /// Per-attempt deadline.
    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { operation_ms: 10_000 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
