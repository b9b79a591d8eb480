//! Resources and the system graph they are matched into
//!
//! Resources are deployable targets. Environments and deployments live in a
//! system and select resources through [`Condition`] trees.

use crate::selector::Condition;
use crate::{
    DeploymentId, EnvironmentId, JobAgentId, RelationshipRuleId, ResourceId, SystemId,
    VariableSetId, WorkspaceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A deployable target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub workspace_id: WorkspaceId,
    pub kind: String,

    /// Schema version of the resource, not a deployment version
    pub version: String,

    pub name: String,

    /// Unique per workspace
    pub identifier: String,

    /// Opaque provider payload
    #[serde(default)]
    pub config: serde_json::Value,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,

    /// Soft delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(
        workspace_id: WorkspaceId,
        kind: impl Into<String>,
        name: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::generate(),
            workspace_id,
            kind: kind.into(),
            version: "v1".into(),
            name: name.into(),
            identifier: identifier.into(),
            config: serde_json::Value::Object(Default::default()),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            locked_at: None,
            deleted_at: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Groups environments and deployments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub slug: String,
}

impl System {
    pub fn new(workspace_id: WorkspaceId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: SystemId::generate(),
            workspace_id,
            slug: name.to_lowercase().replace(' ', "-"),
            name,
        }
    }
}

/// A named grouping of resources inside a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub system_id: SystemId,
    pub name: String,

    /// `None` matches nothing
    pub resource_selector: Option<Condition>,

    /// Variable sets attached to this environment, in precedence order
    #[serde(default)]
    pub variable_set_ids: Vec<VariableSetId>,

    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn new(system_id: SystemId, name: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::generate(),
            system_id,
            name: name.into(),
            resource_selector: None,
            variable_set_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_selector(mut self, selector: Condition) -> Self {
        self.resource_selector = Some(selector);
        self
    }
}

/// A thing to deploy inside a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub system_id: SystemId,
    pub name: String,
    pub slug: String,

    /// Narrowing filter; `None` inherits environment membership unfiltered
    pub resource_selector: Option<Condition>,

    pub job_agent_id: Option<JobAgentId>,

    /// Deployment-level override merged over the job agent's base config
    #[serde(default)]
    pub job_agent_config: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(system_id: SystemId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: DeploymentId::generate(),
            system_id,
            slug: name.to_lowercase().replace(' ', "-"),
            name,
            resource_selector: None,
            job_agent_id: None,
            job_agent_config: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_selector(mut self, selector: Condition) -> Self {
        self.resource_selector = Some(selector);
        self
    }

    pub fn with_job_agent(mut self, job_agent_id: JobAgentId, config: serde_json::Value) -> Self {
        self.job_agent_id = Some(job_agent_id);
        self.job_agent_config = config;
        self
    }
}

/// Declares how resources of one kind relate to resources of another
///
/// A source resource is related to a target resource when kinds and versions
/// line up and every metadata predicate holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRelationshipRule {
    pub id: RelationshipRuleId,
    pub workspace_id: WorkspaceId,

    /// Name used by reference-type variables to walk this relationship
    pub reference: String,

    pub source_kind: String,
    pub source_version: String,
    pub target_kind: Option<String>,
    pub target_version: Option<String>,

    /// Keys whose value must be equal on source and target
    #[serde(default)]
    pub metadata_keys_match: Vec<String>,

    /// Target key must equal a literal value
    #[serde(default)]
    pub target_metadata_equals: BTreeMap<String, String>,
}

impl ResourceRelationshipRule {
    pub fn new(
        workspace_id: WorkspaceId,
        reference: impl Into<String>,
        source_kind: impl Into<String>,
        source_version: impl Into<String>,
    ) -> Self {
        Self {
            id: RelationshipRuleId::generate(),
            workspace_id,
            reference: reference.into(),
            source_kind: source_kind.into(),
            source_version: source_version.into(),
            target_kind: None,
            target_version: None,
            metadata_keys_match: Vec::new(),
            target_metadata_equals: BTreeMap::new(),
        }
    }

    /// Whether `source` and `target` satisfy this rule
    pub fn relates(&self, source: &Resource, target: &Resource) -> bool {
        if source.id == target.id || source.workspace_id != target.workspace_id {
            return false;
        }
        if source.kind != self.source_kind || source.version != self.source_version {
            return false;
        }
        if let Some(kind) = &self.target_kind {
            if &target.kind != kind {
                return false;
            }
        }
        if let Some(version) = &self.target_version {
            if &target.version != version {
                return false;
            }
        }
        let keys_match = self.metadata_keys_match.iter().all(|key| {
            match (source.metadata.get(key), target.metadata.get(key)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        });
        let literals_match = self
            .target_metadata_equals
            .iter()
            .all(|(key, value)| target.metadata.get(key) == Some(value));
        keys_match && literals_match
    }
}
