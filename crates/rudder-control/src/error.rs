//! Error types for the control plane

use rudder_dispatch::DispatchError;
use rudder_release::ReleaseError;
use rudder_store::StoreError;
use thiserror::Error;

/// Control plane error type
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Release subsystem error
    #[error("Release error: {0}")]
    Release(ReleaseError),

    /// Dispatch subsystem error
    #[error("Dispatch error: {0}")]
    Dispatch(DispatchError),

    /// Store, queue or lock failure
    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Result type for control plane operations
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

impl ControlPlaneError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", entity, id))
    }

    /// Whether a task that failed with this error should be redelivered
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Release(e) => e.is_retryable(),
            Self::Dispatch(e) => e.is_retryable(),
            Self::Store(e) => e.is_transient(),
            Self::NotFound(_) | Self::InvalidRequest(_) => false,
        }
    }
}

impl From<ReleaseError> for ControlPlaneError {
    fn from(err: ReleaseError) -> Self {
        match err {
            ReleaseError::NotFound { entity, id } => Self::not_found(entity, id),
            ReleaseError::Validation(message) => Self::InvalidRequest(message),
            other => Self::Release(other),
        }
    }
}

impl From<DispatchError> for ControlPlaneError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound { entity, id } => Self::not_found(entity, id),
            DispatchError::Uncorrelated(message) => Self::NotFound(message),
            other => Self::Dispatch(other),
        }
    }
}

impl From<StoreError> for ControlPlaneError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::not_found(entity, id),
            StoreError::Validation(message) => Self::InvalidRequest(message),
            other => Self::Store(other),
        }
    }
}
