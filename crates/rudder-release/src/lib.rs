//! Rudder Release - from entity graph to immutable releases
//!
//! - [`ReleaseTargetResolver`] keeps the release targets of a system in step
//!   with its environments, deployments and resources
//! - [`VariableResolver`] computes the variable snapshot of a target
//! - [`ReleaseManager`] runs the rule chain and writes releases and jobs
//! - [`WorkspaceCache`] serves per-workspace entity snapshots from the event log

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cache;
pub mod error;
pub mod manager;
pub mod resolver;
pub mod secrets;
pub mod variables;

pub use cache::{WorkspaceCache, WorkspaceSnapshot};
pub use error::{ReleaseError, Result};
pub use manager::{ReleaseConfig, ReleaseEvaluation, ReleaseManager, APPROVAL_GATE};
pub use resolver::{RecomputeOutcome, ReleaseTargetResolver};
pub use secrets::{AesGcmCipher, SecretCipher};
pub use variables::{ResolvedVariable, ResolvedVariables, VariableResolver, VariableSource};
