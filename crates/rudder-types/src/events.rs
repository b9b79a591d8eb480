//! Event types
//!
//! Two streams exist: the durable per-workspace entity log replayed by the
//! workspace cache, and the broadcast stream of platform lifecycle events.

use crate::{
    Deployment, DeploymentId, DeploymentVersionId, Environment, EnvironmentId, JobId, JobStatus,
    ReleaseId, ReleaseTargetId, Resource, ResourceId, SystemId, WorkspaceId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity change recorded in the durable workspace log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityEvent {
    ResourceUpserted(Resource),
    ResourceDeleted { resource_id: ResourceId },
    EnvironmentUpserted(Environment),
    EnvironmentDeleted { environment_id: EnvironmentId },
    DeploymentUpserted(Deployment),
    DeploymentDeleted { deployment_id: DeploymentId },
}

/// Entry of the durable workspace log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Monotonic per store
    pub sequence: u64,
    pub workspace_id: WorkspaceId,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub event: EntityEvent,
}

/// Envelope wrapping all platform events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RudderEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event source
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Owning workspace, when known
    pub workspace_id: Option<WorkspaceId>,

    /// The actual event
    pub event: RudderEvent,
}

impl RudderEventEnvelope {
    pub fn new(event: RudderEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: event.default_severity(),
            workspace_id: None,
            event,
        }
    }

    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Release-target resolver
    Resolver,
    /// Release manager
    Release,
    /// Job dispatch
    Dispatch,
    /// External webhooks
    Webhook,
    /// Task workers
    Worker,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Platform events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RudderEvent {
    // ═══════════════════════════════════════════════════════════════════
    // RELEASE TARGET EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// Release targets of a system were recomputed
    ReleaseTargetsResolved {
        system_id: SystemId,
        created: usize,
        deleted: usize,
    },

    /// A resource no longer matches an environment at all
    ResourceExitedEnvironment {
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    },

    // ═══════════════════════════════════════════════════════════════════
    // RELEASE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A new release was inserted
    ReleaseCreated {
        release_target_id: ReleaseTargetId,
        release_id: ReleaseId,
        version_id: DeploymentVersionId,
    },

    /// Evaluation found no deployable candidate
    EvaluationBlocked {
        release_target_id: ReleaseTargetId,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // JOB EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A job was created for a release
    JobCreated { job_id: JobId, release_id: ReleaseId },

    /// A job changed status
    JobStatusChanged {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    // ═══════════════════════════════════════════════════════════════════
    // WORKER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A task exhausted its delivery attempts
    TaskDeadLettered { task: String, error: String },
}

impl RudderEvent {
    fn default_severity(&self) -> EventSeverity {
        match self {
            Self::EvaluationBlocked { .. } => EventSeverity::Debug,
            Self::JobStatusChanged { to, .. } if to.is_terminal() && *to != JobStatus::Successful => {
                EventSeverity::Warning
            }
            Self::TaskDeadLettered { .. } => EventSeverity::Error,
            _ => EventSeverity::Info,
        }
    }
}
