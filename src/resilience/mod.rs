//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a flaky collaborator:
//!     → circuit_breaker.rs (fail fast while the collaborator is known bad)
//!     → retries.rs (re-run failures with backoff.rs delays)
//!     → timeouts.rs (per-attempt deadline)
//!     → pipeline.rs composes all of the above with the limits gates
//! ```
//!
//! # Design Decisions
//! - Every failure is a typed `ResilienceError`, so callers can tell a
//!   rejection from a timeout from the collaborator's own error
//! - Timeouts cancel the losing future; `with_timeout_detached` opts out
//! - Each wrapper owns its own state; composition is explicit

pub mod backoff;
pub mod circuit_breaker;
pub mod pipeline;
pub mod retries;
pub mod timeouts;
pub mod types;

pub use backoff::calculate_backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStats};
pub use pipeline::{CallPipeline, PipelineStats};
pub use retries::{retry_with_backoff, retry_with_backoff_if};
pub use timeouts::{with_timeout, with_timeout_detached, with_timeout_message};
pub use types::{ResilienceError, ResilienceResult};
