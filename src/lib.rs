//! Bounded containers and fault-resilience wrappers for services that talk to
//! flaky collaborators.

pub mod bounded;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod limits;
pub mod observability;
pub mod resilience;

pub use bounded::{BoundedCache, BoundedQueue, QueueEvent};
pub use config::ToolkitConfig;
pub use error::{ToolkitError, ToolkitResult};
pub use limits::{ConcurrencyLimiter, RateLimiter};
pub use resilience::{
    retry_with_backoff, with_timeout, CallPipeline, CircuitBreaker, CircuitState, ResilienceError,
};
