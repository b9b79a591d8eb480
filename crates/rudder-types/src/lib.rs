//! Rudder Types - Core model for release-target orchestration
//!
//! Rudder continuously computes, for every (deployment, environment, resource)
//! triple, which version should be running there and whether it may be
//! deployed right now.
//!
//! ## Key Concepts
//!
//! - **Resource**: A deployable target, matched into environments by selectors
//! - **ReleaseTarget**: One (deployment, environment, resource) triple
//! - **DeploymentVersion**: An immutable artifact that can be released
//! - **Release**: Immutable "run version X with variables Y" record
//! - **Job**: One dispatch attempt for a release
//! - **Policy**: Rules gating which version may reach which target, and when
//! - **Events**: Durable entity log plus a broadcast lifecycle stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod policy;
pub mod release;
pub mod resource;
pub mod selector;
pub mod task;
pub mod variable;
pub mod version;

// Re-export main types
pub use error::TypeError;
pub use events::{
    EntityEvent, EventSeverity, EventSource, RudderEvent, RudderEventEnvelope, StoredEvent,
};
pub use ids::{
    ApprovalRecordId, DeploymentId, DeploymentVersionId, EnvironmentId, JobAgentId, JobId,
    PolicyId, RelationshipRuleId, ReleaseId, ReleaseTargetId, ResourceId, SystemId,
    VariableSetId, VariableSetReleaseId, VersionReleaseId, WorkspaceId,
};
pub use job::{deep_merge, Job, JobAgent, JobAgentKind, JobReason, JobStatus, JobStatusUpdate};
pub use policy::{
    ApprovalRecord, ApprovalRequirement, ApprovalStatus, CooldownSpec, Frequency, Policy,
    PolicyTarget, RecurrenceSpec, RolloutKind, RolloutSpec,
};
pub use release::{
    Release, ReleaseTarget, ReleaseTargetKey, ReleaseVariable, VariableSetRelease,
    VersionRelease,
};
pub use resource::{Deployment, Environment, Resource, ResourceRelationshipRule, System};
pub use selector::{
    ComparisonOperator, Condition, DateCondition, DateOperator, MetadataCondition,
    MetadataOperator, StringCondition, StringOperator,
};
pub use task::{EnqueueOptions, Task};
pub use variable::{
    DeploymentVariable, DeploymentVariableValue, ResourceVariable, VariableSet, VariableSetValue,
    VariableValue,
};
pub use version::{DeploymentVersion, VersionStatus, REQUIRES_SEQUENTIAL_UPGRADE};
