//! Periodic TTL sweeping.
//!
//! # Responsibilities
//! - Run a purge pass on a fixed interval
//! - Stop on shutdown signal or once the swept container is gone

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Upper bound on the sweep period regardless of TTL.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A container whose expired entries can be purged in one pass.
pub trait Sweep: Send + Sync + 'static {
    /// Remove every expired entry, returning how many were removed.
    fn purge_expired(&self) -> usize;

    /// Label for log events.
    fn label(&self) -> &str;
}

/// Sweep period for a given TTL: `min(ttl, 60s)`.
pub fn sweep_interval(ttl: Duration) -> Duration {
    ttl.min(MAX_SWEEP_INTERVAL)
}

/// Spawn a sweep task on the current runtime.
///
/// Returns `None` when called outside a Tokio runtime.
pub fn spawn_sweeper<S: Sweep>(
    target: Weak<S>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Option<JoinHandle<()>> {
    let handle = Handle::try_current().ok()?;

    Some(handle.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(target) = target.upgrade() else {
                        break;
                    };
                    let purged = target.purge_expired();
                    if purged > 0 {
                        tracing::debug!(container = %target.label(), purged, "Sweep removed expired entries");
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        tracing::debug!(period = ?period, "Sweeper stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::lifecycle::Shutdown;

    struct Counter(AtomicUsize);

    impl Sweep for Counter {
        fn purge_expired(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }

        fn label(&self) -> &str {
            "counter"
        }
    }

    #[test]
    fn test_interval_is_capped() {
        assert_eq!(sweep_interval(Duration::from_millis(500)), Duration::from_millis(500));
        assert_eq!(sweep_interval(Duration::from_secs(3600)), MAX_SWEEP_INTERVAL);
    }

    #[test]
    fn test_no_runtime_no_task() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let shutdown = Shutdown::new();
        let task = spawn_sweeper(Arc::downgrade(&target), Duration::from_secs(1), shutdown.subscribe());
        assert!(task.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_shutdown() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let shutdown = Shutdown::new();
        let task = spawn_sweeper(Arc::downgrade(&target), Duration::from_secs(1), shutdown.subscribe())
            .unwrap();

        time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 3);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_target_dropped() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let shutdown = Shutdown::new();
        let task = spawn_sweeper(Arc::downgrade(&target), Duration::from_secs(1), shutdown.subscribe())
            .unwrap();

        drop(target);
        let stopped = time::timeout(Duration::from_secs(5), task).await;
        assert!(stopped.is_ok());
    }
}
