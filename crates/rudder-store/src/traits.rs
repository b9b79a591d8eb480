//! Storage trait definitions

use crate::error::StoreResult;
use async_trait::async_trait;
use rudder_types::{
    ApprovalRecord, Condition, Deployment, DeploymentId, DeploymentVariable, DeploymentVersion,
    DeploymentVersionId, Environment, EnvironmentId, Job, JobAgent, JobAgentId, JobId, JobStatus,
    JobStatusUpdate, Policy, PolicyId, Release, ReleaseId, ReleaseTarget, ReleaseTargetId,
    ReleaseTargetKey, ReleaseVariable, Resource, ResourceId, ResourceRelationshipRule,
    ResourceVariable, StoredEvent, System, SystemId, VariableSet, VariableSetId,
    VariableSetRelease, VersionRelease, VersionStatus, WorkspaceId,
};
use serde::{Deserialize, Serialize};

/// Combined storage trait
#[async_trait]
pub trait Store:
    GraphStore + VariableStore + PolicyStore + ReleaseStore + JobStore + EventLog + Send + Sync
{
}

impl<T> Store for T where
    T: GraphStore + VariableStore + PolicyStore + ReleaseStore + JobStore + EventLog + Send + Sync
{
}

/// Systems, resources, environments, deployments, versions and job agents
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_system(&self, system: System) -> StoreResult<()>;

    async fn get_system(&self, id: &SystemId) -> StoreResult<Option<System>>;

    /// Create or update a resource; appends to the workspace event log
    async fn upsert_resource(&self, resource: Resource) -> StoreResult<()>;

    /// Get a resource, soft-deleted ones included
    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>>;

    /// Mark a resource deleted; returns false if it was unknown or already deleted
    async fn soft_delete_resource(&self, id: &ResourceId) -> StoreResult<bool>;

    /// Live resources of a workspace matching `selector`
    async fn resources_matching(
        &self,
        workspace_id: &WorkspaceId,
        selector: &Condition,
    ) -> StoreResult<Vec<Resource>>;

    /// Fails with `Validation` when the selector is too deep or malformed
    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()>;

    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>>;

    async fn list_environments(&self, system_id: &SystemId) -> StoreResult<Vec<Environment>>;

    async fn delete_environment(&self, id: &EnvironmentId) -> StoreResult<bool>;

    async fn upsert_deployment(&self, deployment: Deployment) -> StoreResult<()>;

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>>;

    async fn list_deployments(&self, system_id: &SystemId) -> StoreResult<Vec<Deployment>>;

    async fn delete_deployment(&self, id: &DeploymentId) -> StoreResult<bool>;

    /// Insert a version; versions are never overwritten
    async fn insert_version(&self, version: DeploymentVersion) -> StoreResult<()>;

    async fn set_version_status(
        &self,
        id: &DeploymentVersionId,
        status: VersionStatus,
    ) -> StoreResult<()>;

    async fn get_version(&self, id: &DeploymentVersionId) -> StoreResult<Option<DeploymentVersion>>;

    /// Versions of a deployment with the given status, newest first, at most `limit`
    async fn list_versions(
        &self,
        deployment_id: &DeploymentId,
        status: VersionStatus,
        limit: usize,
    ) -> StoreResult<Vec<DeploymentVersion>>;

    async fn upsert_job_agent(&self, agent: JobAgent) -> StoreResult<()>;

    async fn get_job_agent(&self, id: &JobAgentId) -> StoreResult<Option<JobAgent>>;

    async fn upsert_relationship_rule(&self, rule: ResourceRelationshipRule) -> StoreResult<()>;

    /// Resources `source` points at through rules named `reference`,
    /// soft-deleted targets included
    async fn related_targets(
        &self,
        source: &ResourceId,
        reference: &str,
    ) -> StoreResult<Vec<Resource>>;

    /// Resources pointing at `target` through any rule
    async fn related_sources(&self, target: &ResourceId) -> StoreResult<Vec<Resource>>;
}

/// Variables at the three precedence layers
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn upsert_resource_variable(&self, variable: ResourceVariable) -> StoreResult<()>;

    async fn list_resource_variables(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ResourceVariable>>;

    async fn upsert_deployment_variable(&self, variable: DeploymentVariable) -> StoreResult<()>;

    async fn list_deployment_variables(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<DeploymentVariable>>;

    async fn upsert_variable_set(&self, set: VariableSet) -> StoreResult<()>;

    async fn get_variable_set(&self, id: &VariableSetId) -> StoreResult<Option<VariableSet>>;
}

/// Policies and approval records
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Rejects policies whose selectors or rule specs do not compile
    async fn upsert_policy(&self, policy: Policy) -> StoreResult<()>;

    async fn get_policy(&self, id: &PolicyId) -> StoreResult<Option<Policy>>;

    async fn list_policies(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Policy>>;

    async fn record_approval(&self, record: ApprovalRecord) -> StoreResult<()>;

    async fn list_approvals(
        &self,
        environment_id: &EnvironmentId,
    ) -> StoreResult<Vec<ApprovalRecord>>;
}

/// Release targets actually inserted and deleted by a diff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseTargetDiff {
    pub created: Vec<ReleaseTarget>,
    pub deleted: Vec<ReleaseTarget>,
}

impl ReleaseTargetDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// A release with the version and variable choices it references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub release: Release,
    pub version: VersionRelease,
    pub variables: VariableSetRelease,
}

/// Outcome of a compare-then-insert on releases
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseInsert {
    Created(ReleaseRecord),
    Unchanged(ReleaseRecord),
}

/// Release targets and immutable releases
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn get_release_target(&self, id: &ReleaseTargetId)
        -> StoreResult<Option<ReleaseTarget>>;

    async fn find_release_target(
        &self,
        key: &ReleaseTargetKey,
    ) -> StoreResult<Option<ReleaseTarget>>;

    /// Release targets whose deployment belongs to `system_id`
    async fn list_release_targets(&self, system_id: &SystemId) -> StoreResult<Vec<ReleaseTarget>>;

    /// Release targets of one environment × deployment
    async fn list_release_targets_for(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>>;

    /// Delete and insert in one atomic step
    ///
    /// Inserts whose key already exists and deletes of unknown ids are
    /// skipped; the returned diff lists only what actually changed.
    async fn apply_release_target_diff(
        &self,
        delete: Vec<ReleaseTargetId>,
        insert: Vec<ReleaseTarget>,
    ) -> StoreResult<ReleaseTargetDiff>;

    async fn set_desired_version(
        &self,
        id: &ReleaseTargetId,
        version_id: Option<DeploymentVersionId>,
    ) -> StoreResult<()>;

    /// Most recent release of a target
    async fn latest_release(&self, target: &ReleaseTargetId) -> StoreResult<Option<ReleaseRecord>>;

    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<ReleaseRecord>>;

    /// Insert a release unless the latest one already has this version and
    /// variable hash; compare and insert happen atomically
    async fn insert_release_if_changed(
        &self,
        target: &ReleaseTargetId,
        version_id: &DeploymentVersionId,
        variables: Vec<ReleaseVariable>,
        variables_hash: &str,
    ) -> StoreResult<ReleaseInsert>;
}

/// Jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `job` unless its release already has one
    ///
    /// Returns the stored job and whether it was created by this call.
    async fn create_job_for_release_if_absent(&self, job: Job) -> StoreResult<(Job, bool)>;

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>>;

    async fn jobs_for_release(&self, release_id: &ReleaseId) -> StoreResult<Vec<Job>>;

    /// Apply a status update through the job state machine
    ///
    /// Returns the updated job and its previous status.
    async fn apply_job_update(
        &self,
        id: &JobId,
        update: &JobStatusUpdate,
    ) -> StoreResult<(Job, JobStatus)>;

    /// Most recent successful job of a release target, by completion time
    async fn last_successful_job(&self, target: &ReleaseTargetId) -> StoreResult<Option<Job>>;

    /// Workspace owning a job, recorded on its release
    ///
    /// Stays resolvable after the release target is deleted.
    async fn job_workspace(&self, id: &JobId) -> StoreResult<Option<WorkspaceId>>;
}

/// Durable per-workspace entity log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Events of a workspace with sequence greater than `after`
    async fn events_since(
        &self,
        workspace_id: &WorkspaceId,
        after: u64,
    ) -> StoreResult<Vec<StoredEvent>>;
}
