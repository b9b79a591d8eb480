//! Deployment versions
//!
//! Versions are immutable artifact descriptions. Only their status moves.

use crate::{DeploymentId, DeploymentVersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key that forces step-wise upgrades through this version
pub const REQUIRES_SEQUENTIAL_UPGRADE: &str = "requiresSequentialUpgrade";

/// An immutable artifact that can be deployed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVersion {
    pub id: DeploymentVersionId,
    pub deployment_id: DeploymentId,
    pub tag: String,
    pub name: String,

    #[serde(default)]
    pub config: serde_json::Value,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
}

impl DeploymentVersion {
    pub fn new(deployment_id: DeploymentId, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            id: DeploymentVersionId::generate(),
            deployment_id,
            name: tag.clone(),
            tag,
            config: serde_json::Value::Object(Default::default()),
            metadata: BTreeMap::new(),
            status: VersionStatus::Ready,
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn requires_sequential_upgrade(&self) -> bool {
        self.metadata
            .get(REQUIRES_SEQUENTIAL_UPGRADE)
            .is_some_and(|v| v == "true")
    }
}

/// Build/readiness status of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Building,
    Ready,
    Failed,
    Rejected,
}

impl VersionStatus {
    pub fn is_deployable(&self) -> bool {
        matches!(self, Self::Ready)
    }
}
