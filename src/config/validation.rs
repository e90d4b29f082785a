//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, watermarks ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Each section has its own checker so constructors can validate just
//!   the section they consume

use thiserror::Error;

use crate::config::schema::{
    CacheConfig, CircuitBreakerConfig, ConcurrencyConfig, QueueConfig, RateLimitConfig,
    RetryConfig, TimeoutConfig, ToolkitConfig,
};
use crate::error::ToolkitError;

/// A single rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(section: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            field: format!("{section}.{field}"),
            message: message.into(),
        }
    }
}

/// Validate the whole configuration tree.
pub fn validate_config(config: &ToolkitConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_cache(&config.cache, "cache", &mut errors);
    check_queue(&config.queue, "queue", &mut errors);
    check_concurrency(&config.concurrency, "concurrency", &mut errors);
    check_circuit_breaker(&config.circuit_breaker, "circuit_breaker", &mut errors);
    if config.rate_limit.enabled {
        check_rate_limit(&config.rate_limit, "rate_limit", &mut errors);
    }
    check_retries(&config.retries, "retries", &mut errors);
    check_timeouts(&config.timeouts, "timeouts", &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Run one section checker and turn its findings into a constructor error.
pub(crate) fn ensure<F>(check: F) -> Result<(), ToolkitError>
where
    F: FnOnce(&mut Vec<ValidationError>),
{
    let mut errors = Vec::new();
    check(&mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolkitError::InvalidConfiguration(errors))
    }
}

pub(crate) fn check_cache(config: &CacheConfig, section: &str, errors: &mut Vec<ValidationError>) {
    if config.max_size == 0 {
        errors.push(ValidationError::new(section, "max_size", "must be greater than 0"));
    }
}

pub(crate) fn check_queue(config: &QueueConfig, section: &str, errors: &mut Vec<ValidationError>) {
    if config.max_size == 0 {
        errors.push(ValidationError::new(section, "max_size", "must be greater than 0"));
        return;
    }

    let high = config.high_water_mark();
    let low = config.low_water_mark();
    if high == 0 || high > config.max_size {
        errors.push(ValidationError::new(
            section,
            "high_water_mark",
            format!("must be in 1..={}, got {high}", config.max_size),
        ));
    }
    if low >= high {
        errors.push(ValidationError::new(
            section,
            "low_water_mark",
            format!("must be below high_water_mark ({high}), got {low}"),
        ));
    }
}

pub(crate) fn check_concurrency(
    config: &ConcurrencyConfig,
    section: &str,
    errors: &mut Vec<ValidationError>,
) {
    if config.max_concurrency == 0 {
        errors.push(ValidationError::new(section, "max_concurrency", "must be greater than 0"));
    }
}

pub(crate) fn check_circuit_breaker(
    config: &CircuitBreakerConfig,
    section: &str,
    errors: &mut Vec<ValidationError>,
) {
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(section, "failure_threshold", "must be greater than 0"));
    }
    if config.half_open_max_calls == 0 {
        errors.push(ValidationError::new(section, "half_open_max_calls", "must be greater than 0"));
    }
}

pub(crate) fn check_rate_limit(
    config: &RateLimitConfig,
    section: &str,
    errors: &mut Vec<ValidationError>,
) {
    if !(config.max_tokens.is_finite() && config.max_tokens > 0.0) {
        errors.push(ValidationError::new(section, "max_tokens", "must be a positive number"));
    }
    if !(config.refill_rate_per_second.is_finite() && config.refill_rate_per_second > 0.0) {
        errors.push(ValidationError::new(
            section,
            "refill_rate_per_second",
            "must be a positive number",
        ));
    }
}

pub(crate) fn check_retries(config: &RetryConfig, section: &str, errors: &mut Vec<ValidationError>) {
    if !(config.multiplier.is_finite() && config.multiplier >= 1.0) {
        errors.push(ValidationError::new(section, "multiplier", "must be at least 1.0"));
    }
    if config.base_delay_ms > config.max_delay_ms {
        errors.push(ValidationError::new(
            section,
            "base_delay_ms",
            format!("must not exceed max_delay_ms ({})", config.max_delay_ms),
        ));
    }
}

pub(crate) fn check_timeouts(config: &TimeoutConfig, section: &str, errors: &mut Vec<ValidationError>) {
    if config.operation_ms == 0 {
        errors.push(ValidationError::new(section, "operation_ms", "must be greater than 0"));
    }
}
