//! Bounded in-memory containers.
//!
//! # Data Flow
//! ```text
//! Adapter state (request history, short-lived results)
//!     → cache.rs (LRU + TTL, eviction hook)
//!
//! Pending work
//!     → queue.rs (FIFO / priority / reject, backpressure signal)
//!     → consumer drains at its own pace
//! ```
//!
//! # Design Decisions
//! - Hard capacity on every container; growth is never unbounded
//! - Operations never suspend the caller
//! - TTL sweeps run on the Tokio runtime when one is available

pub mod cache;
pub mod queue;

pub use cache::{BoundedCache, CacheEntry, CacheStats, EvictionHook};
pub use queue::{BoundedQueue, QueueEvent, QueueItem, QueueMetrics};
