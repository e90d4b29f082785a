//! Concurrency gate for in-flight operations.
//!
//! # Responsibilities
//! - Start an operation immediately while fewer than `max_concurrency` run
//! - Park excess callers until a slot frees, serving them in arrival order
//!
//! # Design Decisions
//! - Backed by Tokio's fair semaphore, so waiters are strictly FIFO
//! - Slots are RAII permits: a finished, failed, panicked, or cancelled
//!   operation always gives its slot back
//! - The gate never fails; an operation's error belongs to its caller only

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::validation;
use crate::config::ConcurrencyConfig;
use crate::error::ToolkitResult;
use crate::observability::metrics;

/// Point-in-time limiter counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub running: usize,
    pub queued: usize,
    pub max_concurrency: usize,
}

/// Bounds how many operations run at once.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    name: String,
    max_concurrency: usize,
    slots: Semaphore,
    queued: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> ToolkitResult<Self> {
        validation::ensure(|errors| validation::check_concurrency(&config, "concurrency", errors))?;

        Ok(Self {
            slots: Semaphore::new(config.max_concurrency),
            max_concurrency: config.max_concurrency,
            name: config.name,
            queued: AtomicUsize::new(0),
        })
    }

    /// Shorthand for an unnamed limiter.
    pub fn with_max(max_concurrency: usize) -> ToolkitResult<Self> {
        Self::new(ConcurrencyConfig {
            max_concurrency,
            ..ConcurrencyConfig::default()
        })
    }

    /// Run `operation` once a slot is free.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire().await;
        operation().await
    }

    async fn acquire(&self) -> Slot<'_> {
        let permit = match self.slots.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let _waiting = Waiting::enter(&self.queued);
                tracing::trace!(limiter = %self.name, queued = self.queued(), "Waiting for a free slot");
                self.slots
                    .acquire()
                    .await
                    .expect("limiter semaphore is never closed")
            }
        };

        metrics::record_in_flight(&self.name, self.running());
        Slot {
            limiter: self,
            _permit: permit,
        }
    }

    /// Operations currently holding a slot.
    pub fn running(&self) -> usize {
        self.max_concurrency - self.slots.available_permits()
    }

    /// Callers parked waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            running: self.running(),
            queued: self.queued(),
            max_concurrency: self.max_concurrency,
        }
    }
}

/// A held slot; the permit returns to the semaphore on drop.
struct Slot<'a> {
    limiter: &'a ConcurrencyLimiter,
    _permit: SemaphorePermit<'a>,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        // The permit is released right after this body runs.
        let running = self.limiter.running().saturating_sub(1);
        metrics::record_in_flight(&self.limiter.name, running);
    }
}

/// Counts a parked caller for as long as it waits, including if it is cancelled.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
