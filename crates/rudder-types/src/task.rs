//! Task payloads carried by the task queue

use crate::{DeploymentId, EnvironmentId, JobId, ReleaseTargetId, ResourceId, SystemId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One entity-scoped unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Task {
    /// Recompute release targets of a system
    ResolveReleaseTargets { system_id: SystemId },

    /// Run one evaluation pass for a release target
    EvaluateReleaseTarget { release_target_id: ReleaseTargetId },

    /// Hand a pending job to its execution backend
    DispatchJob { job_id: JobId },

    /// Notify integrations that a resource left an environment
    ResourceExitedEnvironment {
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    },
}

impl Task {
    /// Default de-duplication key: one pending delivery per entity and kind
    pub fn dedupe_key(&self) -> String {
        match self {
            Self::ResolveReleaseTargets { system_id } => format!("resolve:{}", system_id),
            Self::EvaluateReleaseTarget { release_target_id } => {
                format!("evaluate:{}", release_target_id)
            }
            Self::DispatchJob { job_id } => format!("dispatch:{}", job_id),
            Self::ResourceExitedEnvironment {
                resource_id,
                environment_id,
                deployment_id,
            } => format!("exit:{}:{}:{}", resource_id, environment_id, deployment_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResolveReleaseTargets { .. } => "resolve-release-targets",
            Self::EvaluateReleaseTarget { .. } => "evaluate-release-target",
            Self::DispatchJob { .. } => "dispatch-job",
            Self::ResourceExitedEnvironment { .. } => "resource-exited-environment",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dedupe_key())
    }
}

/// Options for enqueueing a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,

    /// Overrides [`Task::dedupe_key`]
    pub dedupe_key: Option<String>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            dedupe_key: None,
        }
    }
}
