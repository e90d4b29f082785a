//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bounded_resilience::config::{RetryConfig, ToolkitConfig};

/// A collaborator that fails its first `fail_first` calls, then recovers.
pub struct Collaborator {
    calls: AtomicU32,
    fail_first: u32,
    latency: Duration,
}

#[allow(dead_code)]
impl Collaborator {
    pub fn new(fail_first: u32, latency: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first,
            latency,
        }
    }

    pub async fn call(&self) -> Result<u32, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if n <= self.fail_first {
            Err(format!("upstream unavailable (call {})", n))
        } else {
            Ok(n)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Retries with small, deterministic delays.
#[allow(dead_code)]
pub fn quick_retries(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay_ms: 10,
        max_delay_ms: 100,
        multiplier: 2.0,
        jitter: false,
    }
}

/// A pipeline configuration sized for tests.
#[allow(dead_code)]
pub fn pipeline_config() -> ToolkitConfig {
    let mut config = ToolkitConfig::default();
    config.concurrency.max_concurrency = 4;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.reset_timeout_ms = 1_000;
    config.retries = quick_retries(2);
    config.timeouts.operation_ms = 200;
    config
}
