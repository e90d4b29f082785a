//! Errors raised by the toolkit itself (as opposed to wrapped operations).

use thiserror::Error;

use crate::config::ValidationError;

/// Construction and capacity errors.
#[derive(Debug, Error)]
pub enum ToolkitError {
    /// A constructor received a configuration it cannot honour.
    #[error("Invalid configuration: {}", describe(.0))]
    InvalidConfiguration(Vec<ValidationError>),

    /// A `reject`-policy queue was full.
    #[error("Queue '{queue}' rejected item: at capacity ({max_size})")]
    CapacityRejected { queue: String, max_size: usize },
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for toolkit construction and capacity checks.
pub type ToolkitResult<T> = Result<T, ToolkitError>;
