//! Error types for rule construction

use rudder_selector::SelectorError;
use thiserror::Error;

/// Errors raised while compiling policies into rules
///
/// Evaluation itself never fails; only invalid rule specs are rejected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("Invalid rollout: {0}")]
    InvalidRollout(String),

    #[error("Invalid version selector: {0}")]
    Selector(#[from] SelectorError),
}

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;
