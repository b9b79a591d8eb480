//! Jobs and job agents
//!
//! A job is one dispatch attempt for a release. Its status only moves forward;
//! once terminal it is never reopened.

use crate::error::TypeError;
use crate::{JobAgentId, JobId, ReleaseId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    ActionRequired,
    Successful,
    Failure,
    Cancelled,
    Skipped,
    InvalidJobAgent,
    InvalidIntegration,
    ExternalRunNotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful
                | Self::Failure
                | Self::Cancelled
                | Self::Skipped
                | Self::InvalidJobAgent
                | Self::InvalidIntegration
                | Self::ExternalRunNotFound
        )
    }

    /// Dispatch-time failures reachable only from `Pending`
    fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidJobAgent | Self::InvalidIntegration | Self::ExternalRunNotFound
        )
    }

    /// Whether moving from `self` to `next` is allowed
    ///
    /// Re-reporting the current non-terminal status is allowed so that
    /// duplicate webhook deliveries are harmless.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::InProgress | Self::ActionRequired => {
                next != Self::Pending && !next.is_dispatch_failure()
            }
            _ => false,
        }
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, TypeError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TypeError::InvalidJobTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::ActionRequired => "action_required",
            Self::Successful => "successful",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
            Self::InvalidJobAgent => "invalid_job_agent",
            Self::InvalidIntegration => "invalid_integration",
            Self::ExternalRunNotFound => "external_run_not_found",
        };
        f.write_str(s)
    }
}

/// Why a job was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobReason {
    PolicyPassing,
    PolicyOverride,
    Redeploy,
}

/// One dispatch attempt for a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub release_id: ReleaseId,
    pub job_agent_id: Option<JobAgentId>,

    /// Agent base config merged with the deployment override
    #[serde(default)]
    pub job_agent_config: serde_json::Value,

    pub status: JobStatus,
    pub message: Option<String>,

    /// Id assigned by the execution backend
    pub external_id: Option<String>,

    pub reason: JobReason,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn pending(
        release_id: ReleaseId,
        job_agent_id: Option<JobAgentId>,
        job_agent_config: serde_json::Value,
        reason: JobReason,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            release_id,
            job_agent_id,
            job_agent_config,
            status: JobStatus::Pending,
            message: None,
            external_id: None,
            reason,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status update, enforcing the state machine
    pub fn apply(&mut self, update: &JobStatusUpdate) -> Result<(), TypeError> {
        let next = self.status.transition(update.status)?;
        let now = Utc::now();

        if next == JobStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(update.started_at.unwrap_or(now));
        }
        if next.is_terminal() {
            self.completed_at = Some(update.completed_at.unwrap_or(now));
            if self.started_at.is_none() {
                self.started_at = update.started_at;
            }
        }
        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
        if let Some(external_id) = &update.external_id {
            self.external_id = Some(external_id.clone());
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// A status change reported for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub message: Option<String>,
    pub external_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            message: None,
            external_id: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// Kind of execution backend a job agent targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobAgentKind {
    GithubApp,
    Kubernetes,
    Webhook,
    Custom(String),
}

impl fmt::Display for JobAgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GithubApp => f.write_str("github-app"),
            Self::Kubernetes => f.write_str("kubernetes"),
            Self::Webhook => f.write_str("webhook"),
            Self::Custom(kind) => write!(f, "custom:{}", kind),
        }
    }
}

/// An execution backend registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAgent {
    pub id: JobAgentId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub kind: JobAgentKind,

    /// Base config; validated against `kind` at dispatch
    #[serde(default)]
    pub config: serde_json::Value,
}

impl JobAgent {
    pub fn new(
        workspace_id: WorkspaceId,
        name: impl Into<String>,
        kind: JobAgentKind,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: JobAgentId::generate(),
            workspace_id,
            name: name.into(),
            kind,
            config,
        }
    }

    /// Base config deep-merged with a deployment-level override
    pub fn merged_config(&self, overrides: &serde_json::Value) -> serde_json::Value {
        let mut merged = self.config.clone();
        deep_merge(&mut merged, overrides);
        merged
    }
}

/// Merge `overlay` into `base`; objects merge recursively, overlay keys win.
/// A null overlay leaves `base` untouched.
pub fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    use serde_json::Value;

    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                deep_merge(base.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
