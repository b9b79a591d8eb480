//! Error types for the core model

use crate::JobStatus;
use thiserror::Error;

/// Errors raised by model invariants
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid job status transition: {from} -> {to}")]
    InvalidJobTransition { from: JobStatus, to: JobStatus },
}
