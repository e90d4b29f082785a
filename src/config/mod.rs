//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ToolkitConfig (validated, immutable)
//!     → each section handed to the constructor of its primitive
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Constructors re-validate the section they receive, so primitives built
//!   by hand get the same guarantees as ones built from a file

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CacheConfig, CircuitBreakerConfig, ConcurrencyConfig, EvictionPolicy, ObservabilityConfig,
    QueueConfig, RateLimitConfig, RetryConfig, TimeoutConfig, ToolkitConfig,
};
pub use validation::{validate_config, ValidationError};
