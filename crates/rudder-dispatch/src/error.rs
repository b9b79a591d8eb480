//! Error types for job dispatch

use rudder_store::StoreError;
use rudder_types::{JobAgentKind, JobStatus};
use thiserror::Error;

/// Failure reported by an execution backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The merged agent config does not fit the agent kind
    #[error("Invalid job agent config: {0}")]
    InvalidConfig(String),

    /// No credential is available for the integration
    #[error("Missing credentials: {0}")]
    Credentials(String),

    /// The backend answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            Self::InvalidConfig(_) | Self::Credentials(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Dispatch error type
///
/// Backend failures never surface here; they end as a terminal job status.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A status update the job state machine rejects
    #[error("Job cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// No backend registered for this agent kind
    #[error("No execution backend for {0}")]
    UnsupportedKind(JobAgentKind),

    /// Inbound payload cannot be correlated to a job
    #[error("Uncorrelated webhook: {0}")]
    Uncorrelated(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

impl DispatchError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the task should be redelivered
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
