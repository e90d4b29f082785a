//! Throughput and concurrency limits.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → concurrency.rs (wait for one of max_concurrency slots, FIFO)
//!     → rate_limit.rs (take tokens from the bucket, or wait/deny)
//!     → resilience layer
//! ```
//!
//! # Design Decisions
//! - Refill is computed from elapsed time at acquisition; no refill timer
//! - Both gates are per-instance; nothing is shared across processes

pub mod concurrency;
pub mod rate_limit;

pub use concurrency::{ConcurrencyLimiter, LimiterStats};
pub use rate_limit::{RateLimiter, RateLimiterStats};
