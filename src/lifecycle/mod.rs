//! Lifecycle management for background work owned by the primitives.
//!
//! # Flow
//! ```text
//! BoundedCache / BoundedQueue with a TTL:
//!     → sweeper.rs spawns a periodic purge task holding a Weak handle
//!     → shutdown.rs signal (destroy) or owner drop ends the task
//! ```
//!
//! # Design Decisions
//! - Sweep tasks never keep their container alive
//! - Without a Tokio runtime no task is spawned; expiry stays lazy

pub mod shutdown;
pub mod sweeper;

pub use shutdown::Shutdown;
pub use sweeper::{spawn_sweeper, sweep_interval, Sweep};
