//! Error types for selector validation

use thiserror::Error;

/// Errors raised when a selector is structurally invalid
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Selector nesting depth {depth} exceeds maximum {max}")]
    TooDeep { depth: usize, max: usize },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Metadata condition on '{key}' requires a value")]
    MissingValue { key: String },
}

/// Result type for selector operations
pub type Result<T> = std::result::Result<T, SelectorError>;
