//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All primitives produce:
//!     → tracing events (state transitions, drops, retries, timeouts)
//!     → metrics.rs (counters and gauges through the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Prometheus scrape endpoint (installed by the host binary)
//! ```
//!
//! # Design Decisions
//! - The library only emits; installing subscribers and recorders is left to
//!   the host process
//! - Metric updates are cheap no-ops when no recorder is installed

pub mod logging;
pub mod metrics;
