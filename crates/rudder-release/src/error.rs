//! Error types for the release pipeline

use rudder_rules::RuleError;
use rudder_store::StoreError;
use thiserror::Error;

/// Release pipeline errors
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Secret handling failed: {0}")]
    Secret(String),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Store(StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReleaseError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the task should be redelivered rather than dropped
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for ReleaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Validation(message) => Self::Validation(message),
            other => Self::Store(other),
        }
    }
}

/// Result type for release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ReleaseError::from(StoreError::Unavailable("timeout".into())).is_retryable());
        assert!(!ReleaseError::from(StoreError::not_found("Deployment", "d1")).is_retryable());
        assert!(matches!(
            ReleaseError::from(StoreError::not_found("Deployment", "d1")),
            ReleaseError::NotFound { entity: "Deployment", .. }
        ));
        assert!(!ReleaseError::Validation("bad".into()).is_retryable());
        assert!(matches!(
            ReleaseError::from(StoreError::Validation("too deep".into())),
            ReleaseError::Validation(_)
        ));
    }
}
