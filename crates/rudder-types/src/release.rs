//! Release targets and the immutable releases chosen for them

use crate::{
    DeploymentId, DeploymentVersionId, EnvironmentId, ReleaseId, ReleaseTargetId, ResourceId,
    VariableSetReleaseId, VersionReleaseId, WorkspaceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Natural key of a release target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseTargetKey {
    pub deployment_id: DeploymentId,
    pub environment_id: EnvironmentId,
    pub resource_id: ResourceId,
}

impl fmt::Display for ReleaseTargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.deployment_id, self.environment_id, self.resource_id
        )
    }
}

/// "This resource, in this environment, is a candidate for this deployment"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseTarget {
    pub id: ReleaseTargetId,
    pub deployment_id: DeploymentId,
    pub environment_id: EnvironmentId,
    pub resource_id: ResourceId,

    /// Version pinned by an operator, if any
    pub desired_version_id: Option<DeploymentVersionId>,

    /// Release pinned by an operator, if any
    pub desired_release_id: Option<ReleaseId>,

    pub created_at: DateTime<Utc>,
}

impl ReleaseTarget {
    pub fn new(key: ReleaseTargetKey) -> Self {
        Self {
            id: ReleaseTargetId::generate(),
            deployment_id: key.deployment_id,
            environment_id: key.environment_id,
            resource_id: key.resource_id,
            desired_version_id: None,
            desired_release_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ReleaseTargetKey {
        ReleaseTargetKey {
            deployment_id: self.deployment_id,
            environment_id: self.environment_id,
            resource_id: self.resource_id,
        }
    }
}

/// The version chosen for a release target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRelease {
    pub id: VersionReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub version_id: DeploymentVersionId,
    pub created_at: DateTime<Utc>,
}

impl VersionRelease {
    pub fn new(release_target_id: ReleaseTargetId, version_id: DeploymentVersionId) -> Self {
        Self {
            id: VersionReleaseId::generate(),
            release_target_id,
            version_id,
            created_at: Utc::now(),
        }
    }
}

/// One variable captured in a variable snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseVariable {
    pub key: String,

    /// Ciphertext (as a JSON string) when `sensitive`
    pub value: serde_json::Value,

    pub sensitive: bool,
}

/// Content-addressed variable snapshot chosen for a release target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSetRelease {
    pub id: VariableSetReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub variables: Vec<ReleaseVariable>,

    /// SHA-256 over the canonical plaintext snapshot
    pub hash: String,

    pub created_at: DateTime<Utc>,
}

impl VariableSetRelease {
    pub fn new(
        release_target_id: ReleaseTargetId,
        variables: Vec<ReleaseVariable>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            id: VariableSetReleaseId::generate(),
            release_target_id,
            variables,
            hash: hash.into(),
            created_at: Utc::now(),
        }
    }
}

/// Immutable "run version X with variables Y" record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,

    /// Workspace of the target's resource, fixed at creation
    pub workspace_id: WorkspaceId,

    pub release_target_id: ReleaseTargetId,
    pub version_release_id: VersionReleaseId,
    pub variable_release_id: VariableSetReleaseId,
    pub created_at: DateTime<Utc>,
}

impl Release {
    pub fn new(
        workspace_id: WorkspaceId,
        release_target_id: ReleaseTargetId,
        version_release_id: VersionReleaseId,
        variable_release_id: VariableSetReleaseId,
    ) -> Self {
        Self {
            id: ReleaseId::generate(),
            workspace_id,
            release_target_id,
            version_release_id,
            variable_release_id,
            created_at: Utc::now(),
        }
    }
}
