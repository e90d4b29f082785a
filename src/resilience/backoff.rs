//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retry number `retry` (0 for the first retry).
///
/// `min(base_delay_ms * multiplier^retry, max_delay_ms)`, plus up to 10% when
/// jitter is enabled.
pub fn calculate_backoff(retry: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let delay_ms = (config.base_delay_ms as f64 * config.multiplier.powi(exponent))
        .min(config.max_delay_ms as f64);
    let capped_delay = if delay_ms.is_finite() && delay_ms > 0.0 {
        delay_ms as u64
    } else {
        0
    };

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if config.jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}
