//! Error types for store, queue and mutex operations

use rudder_rules::RuleError;
use rudder_selector::SelectorError;
use rudder_types::TypeError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    InvalidTransition(#[from] TypeError),

    /// Rejected before any write took place
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Datastore or queue temporarily unavailable; safe to redeliver
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the operation may succeed if retried later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<SelectorError> for StoreError {
    fn from(err: SelectorError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<RuleError> for StoreError {
    fn from(err: RuleError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
