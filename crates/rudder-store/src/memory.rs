//! In-memory storage implementation
//!
//! All collections sit behind one lock so that every multi-step operation
//! (release-target diff, release compare-then-insert, job check-then-insert)
//! is atomic, matching what a transactional datastore provides.
//!
//! The workspace event log is compacted on append: an event carrying an
//! entity's full state supersedes every older entry for that entity, so the
//! log grows with the number of entities rather than the number of writes.

use crate::error::{StoreError, StoreResult};
use crate::traits::*;
use async_trait::async_trait;
use chrono::Utc;
use rudder_rules::validate_policy;
use rudder_selector::{matches, validate};
use rudder_types::{
    ApprovalRecord, Condition, Deployment, DeploymentId, DeploymentVariable, DeploymentVersion,
    DeploymentVersionId, EntityEvent, Environment, EnvironmentId, Job, JobAgent, JobAgentId, JobId,
    JobStatus, JobStatusUpdate, Policy, PolicyId, RelationshipRuleId, Release, ReleaseId,
    ReleaseTarget, ReleaseTargetId, ReleaseTargetKey, ReleaseVariable, Resource, ResourceId,
    ResourceRelationshipRule, ResourceVariable, StoredEvent, System, SystemId, VariableSet,
    VariableSetId, VariableSetRelease, VariableSetReleaseId, VersionRelease, VersionReleaseId,
    VersionStatus, WorkspaceId,
};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct StoreState {
    systems: HashMap<SystemId, System>,
    resources: HashMap<ResourceId, Resource>,
    environments: HashMap<EnvironmentId, Environment>,
    deployments: HashMap<DeploymentId, Deployment>,
    versions: HashMap<DeploymentVersionId, DeploymentVersion>,
    job_agents: HashMap<JobAgentId, JobAgent>,
    relationship_rules: HashMap<RelationshipRuleId, ResourceRelationshipRule>,

    resource_variables: HashMap<ResourceId, Vec<ResourceVariable>>,
    deployment_variables: HashMap<DeploymentId, Vec<DeploymentVariable>>,
    variable_sets: HashMap<VariableSetId, VariableSet>,

    policies: HashMap<PolicyId, Policy>,
    approvals: Vec<ApprovalRecord>,

    release_targets: HashMap<ReleaseTargetId, ReleaseTarget>,
    target_keys: HashMap<ReleaseTargetKey, ReleaseTargetId>,
    version_releases: HashMap<VersionReleaseId, VersionRelease>,
    variable_releases: HashMap<VariableSetReleaseId, VariableSetRelease>,
    releases: HashMap<ReleaseId, Release>,
    /// Creation order per target
    releases_by_target: HashMap<ReleaseTargetId, Vec<ReleaseId>>,

    jobs: HashMap<JobId, Job>,
    jobs_by_release: HashMap<ReleaseId, Vec<JobId>>,

    events: BTreeMap<u64, StoredEvent>,
    event_index: HashMap<EntityKey, Vec<u64>>,
    sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntityKey {
    Resource(ResourceId),
    Environment(EnvironmentId),
    Deployment(DeploymentId),
}

/// Entity an event refers to, and whether it carries the entity's full state
fn entity_key(event: &EntityEvent) -> (EntityKey, bool) {
    match event {
        EntityEvent::ResourceUpserted(r) => (EntityKey::Resource(r.id), true),
        EntityEvent::ResourceDeleted { resource_id } => (EntityKey::Resource(*resource_id), false),
        EntityEvent::EnvironmentUpserted(e) => (EntityKey::Environment(e.id), true),
        EntityEvent::EnvironmentDeleted { environment_id } => {
            (EntityKey::Environment(*environment_id), true)
        }
        EntityEvent::DeploymentUpserted(d) => (EntityKey::Deployment(d.id), true),
        EntityEvent::DeploymentDeleted { deployment_id } => {
            (EntityKey::Deployment(*deployment_id), true)
        }
    }
}

impl StoreState {
    fn append(&mut self, workspace_id: WorkspaceId, event: EntityEvent) {
        self.sequence += 1;
        let sequence = self.sequence;

        let (key, full_state) = entity_key(&event);
        let entries = self.event_index.entry(key).or_default();
        if full_state {
            for superseded in entries.drain(..) {
                self.events.remove(&superseded);
            }
        }
        entries.push(sequence);

        self.events.insert(
            sequence,
            StoredEvent {
                sequence,
                workspace_id,
                recorded_at: Utc::now(),
                event,
            },
        );
    }

    fn system_workspace(&self, system_id: &SystemId) -> StoreResult<WorkspaceId> {
        self.systems
            .get(system_id)
            .map(|s| s.workspace_id)
            .ok_or_else(|| StoreError::not_found("System", system_id))
    }

    fn release_record(&self, id: &ReleaseId) -> Option<ReleaseRecord> {
        let release = self.releases.get(id)?;
        Some(ReleaseRecord {
            release: release.clone(),
            version: self.version_releases.get(&release.version_release_id)?.clone(),
            variables: self
                .variable_releases
                .get(&release.variable_release_id)?
                .clone(),
        })
    }

    fn latest_release(&self, target: &ReleaseTargetId) -> Option<ReleaseRecord> {
        let id = self.releases_by_target.get(target)?.last()?;
        self.release_record(id)
    }
}

/// In-memory store for development and testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn validate_selector(selector: Option<&Condition>) -> StoreResult<()> {
    selector.map_or(Ok(()), |s| validate(s).map_err(StoreError::from))
}

fn upsert_by<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> K) {
    let k = key(&item);
    match items.iter_mut().find(|existing| key(existing) == k) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn upsert_system(&self, system: System) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.systems.insert(system.id, system);
        Ok(())
    }

    async fn get_system(&self, id: &SystemId) -> StoreResult<Option<System>> {
        Ok(self.state.read().await.systems.get(id).cloned())
    }

    async fn upsert_resource(&self, resource: Resource) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let workspace_id = resource.workspace_id;
        state.append(workspace_id, EntityEvent::ResourceUpserted(resource.clone()));
        state.resources.insert(resource.id, resource);
        Ok(())
    }

    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        Ok(self.state.read().await.resources.get(id).cloned())
    }

    async fn soft_delete_resource(&self, id: &ResourceId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(resource) = state.resources.get_mut(id) else {
            return Ok(false);
        };
        if resource.deleted_at.is_some() {
            return Ok(false);
        }
        let now = Utc::now();
        resource.deleted_at = Some(now);
        resource.updated_at = now;
        let workspace_id = resource.workspace_id;
        state.append(workspace_id, EntityEvent::ResourceDeleted { resource_id: *id });
        Ok(true)
    }

    async fn resources_matching(
        &self,
        workspace_id: &WorkspaceId,
        selector: &Condition,
    ) -> StoreResult<Vec<Resource>> {
        let state = self.state.read().await;
        let mut matched: Vec<Resource> = state
            .resources
            .values()
            .filter(|r| &r.workspace_id == workspace_id && matches(*r, selector))
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.id);
        Ok(matched)
    }

    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()> {
        validate_selector(environment.resource_selector.as_ref())?;
        let mut state = self.state.write().await;
        let workspace_id = state.system_workspace(&environment.system_id)?;
        state.append(
            workspace_id,
            EntityEvent::EnvironmentUpserted(environment.clone()),
        );
        state.environments.insert(environment.id, environment);
        Ok(())
    }

    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        Ok(self.state.read().await.environments.get(id).cloned())
    }

    async fn list_environments(&self, system_id: &SystemId) -> StoreResult<Vec<Environment>> {
        let state = self.state.read().await;
        let mut environments: Vec<Environment> = state
            .environments
            .values()
            .filter(|e| &e.system_id == system_id)
            .cloned()
            .collect();
        environments.sort_by_key(|e| e.id);
        Ok(environments)
    }

    async fn delete_environment(&self, id: &EnvironmentId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(environment) = state.environments.remove(id) else {
            return Ok(false);
        };
        if let Ok(workspace_id) = state.system_workspace(&environment.system_id) {
            state.append(
                workspace_id,
                EntityEvent::EnvironmentDeleted { environment_id: *id },
            );
        }
        Ok(true)
    }

    async fn upsert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        validate_selector(deployment.resource_selector.as_ref())?;
        let mut state = self.state.write().await;
        let workspace_id = state.system_workspace(&deployment.system_id)?;
        state.append(
            workspace_id,
            EntityEvent::DeploymentUpserted(deployment.clone()),
        );
        state.deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>> {
        Ok(self.state.read().await.deployments.get(id).cloned())
    }

    async fn list_deployments(&self, system_id: &SystemId) -> StoreResult<Vec<Deployment>> {
        let state = self.state.read().await;
        let mut deployments: Vec<Deployment> = state
            .deployments
            .values()
            .filter(|d| &d.system_id == system_id)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.id);
        Ok(deployments)
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(deployment) = state.deployments.remove(id) else {
            return Ok(false);
        };
        if let Ok(workspace_id) = state.system_workspace(&deployment.system_id) {
            state.append(
                workspace_id,
                EntityEvent::DeploymentDeleted { deployment_id: *id },
            );
        }
        Ok(true)
    }

    async fn insert_version(&self, version: DeploymentVersion) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.versions.contains_key(&version.id) {
            return Err(StoreError::Conflict(format!(
                "Version {} already exists",
                version.id
            )));
        }
        state.versions.insert(version.id, version);
        Ok(())
    }

    async fn set_version_status(
        &self,
        id: &DeploymentVersionId,
        status: VersionStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let version = state
            .versions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("DeploymentVersion", id))?;
        version.status = status;
        Ok(())
    }

    async fn get_version(&self, id: &DeploymentVersionId) -> StoreResult<Option<DeploymentVersion>> {
        Ok(self.state.read().await.versions.get(id).cloned())
    }

    async fn list_versions(
        &self,
        deployment_id: &DeploymentId,
        status: VersionStatus,
        limit: usize,
    ) -> StoreResult<Vec<DeploymentVersion>> {
        let state = self.state.read().await;
        let mut versions: Vec<DeploymentVersion> = state
            .versions
            .values()
            .filter(|v| &v.deployment_id == deployment_id && v.status == status)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        versions.truncate(limit);
        Ok(versions)
    }

    async fn upsert_job_agent(&self, agent: JobAgent) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.job_agents.insert(agent.id, agent);
        Ok(())
    }

    async fn get_job_agent(&self, id: &JobAgentId) -> StoreResult<Option<JobAgent>> {
        Ok(self.state.read().await.job_agents.get(id).cloned())
    }

    async fn upsert_relationship_rule(&self, rule: ResourceRelationshipRule) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.relationship_rules.insert(rule.id, rule);
        Ok(())
    }

    async fn related_targets(
        &self,
        source: &ResourceId,
        reference: &str,
    ) -> StoreResult<Vec<Resource>> {
        let state = self.state.read().await;
        let Some(source) = state.resources.get(source) else {
            return Ok(Vec::new());
        };
        let rules: Vec<&ResourceRelationshipRule> = state
            .relationship_rules
            .values()
            .filter(|r| r.reference == reference && r.workspace_id == source.workspace_id)
            .collect();

        let mut related: Vec<Resource> = state
            .resources
            .values()
            .filter(|target| rules.iter().any(|rule| rule.relates(source, target)))
            .cloned()
            .collect();
        related.sort_by_key(|r| r.id);
        Ok(related)
    }

    async fn related_sources(&self, target: &ResourceId) -> StoreResult<Vec<Resource>> {
        let state = self.state.read().await;
        let Some(target) = state.resources.get(target) else {
            return Ok(Vec::new());
        };
        let mut sources: Vec<Resource> = state
            .resources
            .values()
            .filter(|source| !source.is_deleted())
            .filter(|source| {
                state
                    .relationship_rules
                    .values()
                    .any(|rule| rule.relates(source, target))
            })
            .cloned()
            .collect();
        sources.sort_by_key(|r| r.id);
        Ok(sources)
    }
}

#[async_trait]
impl VariableStore for InMemoryStore {
    async fn upsert_resource_variable(&self, variable: ResourceVariable) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let vars = state.resource_variables.entry(variable.resource_id).or_default();
        upsert_by(vars, variable, |v| v.key.clone());
        Ok(())
    }

    async fn list_resource_variables(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ResourceVariable>> {
        let state = self.state.read().await;
        Ok(state
            .resource_variables
            .get(resource_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_deployment_variable(&self, variable: DeploymentVariable) -> StoreResult<()> {
        for value in &variable.values {
            validate_selector(value.resource_selector.as_ref())?;
        }
        let mut state = self.state.write().await;
        let vars = state
            .deployment_variables
            .entry(variable.deployment_id)
            .or_default();
        upsert_by(vars, variable, |v| v.key.clone());
        Ok(())
    }

    async fn list_deployment_variables(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<DeploymentVariable>> {
        let state = self.state.read().await;
        Ok(state
            .deployment_variables
            .get(deployment_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_variable_set(&self, set: VariableSet) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.variable_sets.insert(set.id, set);
        Ok(())
    }

    async fn get_variable_set(&self, id: &VariableSetId) -> StoreResult<Option<VariableSet>> {
        Ok(self.state.read().await.variable_sets.get(id).cloned())
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn upsert_policy(&self, policy: Policy) -> StoreResult<()> {
        validate_policy(&policy)?;
        let mut state = self.state.write().await;
        state.policies.insert(policy.id, policy);
        Ok(())
    }

    async fn get_policy(&self, id: &PolicyId) -> StoreResult<Option<Policy>> {
        Ok(self.state.read().await.policies.get(id).cloned())
    }

    async fn list_policies(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Policy>> {
        let state = self.state.read().await;
        Ok(state
            .policies
            .values()
            .filter(|p| &p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn record_approval(&self, record: ApprovalRecord) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.approvals.push(record);
        Ok(())
    }

    async fn list_approvals(
        &self,
        environment_id: &EnvironmentId,
    ) -> StoreResult<Vec<ApprovalRecord>> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .iter()
            .filter(|r| &r.environment_id == environment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReleaseStore for InMemoryStore {
    async fn get_release_target(
        &self,
        id: &ReleaseTargetId,
    ) -> StoreResult<Option<ReleaseTarget>> {
        Ok(self.state.read().await.release_targets.get(id).cloned())
    }

    async fn find_release_target(
        &self,
        key: &ReleaseTargetKey,
    ) -> StoreResult<Option<ReleaseTarget>> {
        let state = self.state.read().await;
        Ok(state
            .target_keys
            .get(key)
            .and_then(|id| state.release_targets.get(id))
            .cloned())
    }

    async fn list_release_targets(&self, system_id: &SystemId) -> StoreResult<Vec<ReleaseTarget>> {
        let state = self.state.read().await;
        let mut targets: Vec<ReleaseTarget> = state
            .release_targets
            .values()
            .filter(|t| {
                state
                    .deployments
                    .get(&t.deployment_id)
                    .is_some_and(|d| &d.system_id == system_id)
            })
            .cloned()
            .collect();
        targets.sort_by_key(|t| t.key());
        Ok(targets)
    }

    async fn list_release_targets_for(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let state = self.state.read().await;
        let mut targets: Vec<ReleaseTarget> = state
            .release_targets
            .values()
            .filter(|t| &t.environment_id == environment_id && &t.deployment_id == deployment_id)
            .cloned()
            .collect();
        targets.sort_by_key(|t| t.key());
        Ok(targets)
    }

    async fn apply_release_target_diff(
        &self,
        delete: Vec<ReleaseTargetId>,
        insert: Vec<ReleaseTarget>,
    ) -> StoreResult<ReleaseTargetDiff> {
        let mut state = self.state.write().await;
        let mut diff = ReleaseTargetDiff::default();

        for id in delete {
            if let Some(target) = state.release_targets.remove(&id) {
                state.target_keys.remove(&target.key());
                diff.deleted.push(target);
            }
        }
        for target in insert {
            let key = target.key();
            if state.target_keys.contains_key(&key) {
                debug!(key = %key, "Release target already exists, skipping insert");
                continue;
            }
            state.target_keys.insert(key, target.id);
            state.release_targets.insert(target.id, target.clone());
            diff.created.push(target);
        }

        Ok(diff)
    }

    async fn set_desired_version(
        &self,
        id: &ReleaseTargetId,
        version_id: Option<DeploymentVersionId>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let target = state
            .release_targets
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("ReleaseTarget", id))?;
        target.desired_version_id = version_id;
        Ok(())
    }

    async fn latest_release(&self, target: &ReleaseTargetId) -> StoreResult<Option<ReleaseRecord>> {
        Ok(self.state.read().await.latest_release(target))
    }

    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<ReleaseRecord>> {
        Ok(self.state.read().await.release_record(id))
    }

    async fn insert_release_if_changed(
        &self,
        target: &ReleaseTargetId,
        version_id: &DeploymentVersionId,
        variables: Vec<ReleaseVariable>,
        variables_hash: &str,
    ) -> StoreResult<ReleaseInsert> {
        let mut state = self.state.write().await;
        let resource_id = state
            .release_targets
            .get(target)
            .map(|t| t.resource_id)
            .ok_or_else(|| StoreError::not_found("ReleaseTarget", target))?;
        let workspace_id = state
            .resources
            .get(&resource_id)
            .map(|r| r.workspace_id)
            .ok_or_else(|| StoreError::not_found("Resource", resource_id))?;

        let latest = state.latest_release(target);
        if let Some(latest) = &latest {
            if &latest.version.version_id == version_id && latest.variables.hash == variables_hash
            {
                return Ok(ReleaseInsert::Unchanged(latest.clone()));
            }
        }

        // Reuse whichever half of the latest release is unchanged
        let version = match &latest {
            Some(l) if &l.version.version_id == version_id => l.version.clone(),
            _ => {
                let vr = VersionRelease::new(*target, *version_id);
                state.version_releases.insert(vr.id, vr.clone());
                vr
            }
        };
        let variable_release = match &latest {
            Some(l) if l.variables.hash == variables_hash => l.variables.clone(),
            _ => {
                let vsr = VariableSetRelease::new(*target, variables, variables_hash);
                state.variable_releases.insert(vsr.id, vsr.clone());
                vsr
            }
        };

        let release = Release::new(workspace_id, *target, version.id, variable_release.id);
        state.releases.insert(release.id, release.clone());
        state
            .releases_by_target
            .entry(*target)
            .or_default()
            .push(release.id);

        Ok(ReleaseInsert::Created(ReleaseRecord {
            release,
            version,
            variables: variable_release,
        }))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job_for_release_if_absent(&self, job: Job) -> StoreResult<(Job, bool)> {
        let mut state = self.state.write().await;
        if !state.releases.contains_key(&job.release_id) {
            return Err(StoreError::not_found("Release", job.release_id));
        }
        let existing = state
            .jobs_by_release
            .get(&job.release_id)
            .and_then(|ids| ids.first())
            .and_then(|id| state.jobs.get(id))
            .cloned();
        if let Some(existing) = existing {
            return Ok((existing, false));
        }

        state
            .jobs_by_release
            .entry(job.release_id)
            .or_default()
            .push(job.id);
        state.jobs.insert(job.id, job.clone());
        Ok((job, true))
    }

    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(id).cloned())
    }

    async fn jobs_for_release(&self, release_id: &ReleaseId) -> StoreResult<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state
            .jobs_by_release
            .get(release_id)
            .map(|ids| ids.iter().filter_map(|id| state.jobs.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_job_update(
        &self,
        id: &JobId,
        update: &JobStatusUpdate,
    ) -> StoreResult<(Job, JobStatus)> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("Job", id))?;
        let previous = job.status;
        job.apply(update)?;
        Ok((job.clone(), previous))
    }

    async fn last_successful_job(&self, target: &ReleaseTargetId) -> StoreResult<Option<Job>> {
        let state = self.state.read().await;
        let Some(release_ids) = state.releases_by_target.get(target) else {
            return Ok(None);
        };
        Ok(release_ids
            .iter()
            .filter_map(|rid| state.jobs_by_release.get(rid))
            .flatten()
            .filter_map(|jid| state.jobs.get(jid))
            .filter(|job| job.status == JobStatus::Successful)
            .max_by_key(|job| job.completed_at)
            .cloned())
    }

    async fn job_workspace(&self, id: &JobId) -> StoreResult<Option<WorkspaceId>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .get(id)
            .and_then(|job| state.releases.get(&job.release_id))
            .map(|release| release.workspace_id))
    }
}

#[async_trait]
impl EventLog for InMemoryStore {
    async fn events_since(
        &self,
        workspace_id: &WorkspaceId,
        after: u64,
    ) -> StoreResult<Vec<StoredEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, e)| e)
            .filter(|e| &e.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_selector::MAX_DEPTH;
    use rudder_types::{
        DeploymentVariableValue, Frequency, JobReason, PolicyTarget, RecurrenceSpec,
        ReleaseTargetKey, StringOperator, VariableValue,
    };

    struct Fixture {
        store: InMemoryStore,
        workspace: WorkspaceId,
        system: System,
        environment: Environment,
        deployment: Deployment,
        resource: Resource,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let workspace = WorkspaceId::generate();
        let system = System::new(workspace, "payments");
        let environment =
            Environment::new(system.id, "production").with_selector(Condition::kind("web"));
        let deployment = Deployment::new(system.id, "api");
        let resource = Resource::new(workspace, "web", "web-1", "web/1");

        store.upsert_system(system.clone()).await.unwrap();
        store.upsert_environment(environment.clone()).await.unwrap();
        store.upsert_deployment(deployment.clone()).await.unwrap();
        store.upsert_resource(resource.clone()).await.unwrap();

        Fixture {
            store,
            workspace,
            system,
            environment,
            deployment,
            resource,
        }
    }

    fn key(f: &Fixture) -> ReleaseTargetKey {
        ReleaseTargetKey {
            deployment_id: f.deployment.id,
            environment_id: f.environment.id,
            resource_id: f.resource.id,
        }
    }

    #[tokio::test]
    async fn test_release_target_diff_skips_duplicates() {
        let f = fixture().await;
        let first = ReleaseTarget::new(key(&f));
        let duplicate = ReleaseTarget::new(key(&f));

        let diff = f
            .store
            .apply_release_target_diff(vec![], vec![first.clone(), duplicate])
            .await
            .unwrap();
        assert_eq!(diff.created, vec![first.clone()]);

        let targets = f.store.list_release_targets(&f.system.id).await.unwrap();
        assert_eq!(targets.len(), 1);

        let diff = f
            .store
            .apply_release_target_diff(vec![first.id, ReleaseTargetId::generate()], vec![])
            .await
            .unwrap();
        assert_eq!(diff.deleted.len(), 1);
        assert!(f.store.find_release_target(&key(&f)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_compare_then_insert() {
        let f = fixture().await;
        let target = ReleaseTarget::new(key(&f));
        f.store
            .apply_release_target_diff(vec![], vec![target.clone()])
            .await
            .unwrap();
        let v1 = DeploymentVersionId::generate();
        let v2 = DeploymentVersionId::generate();

        let first = f
            .store
            .insert_release_if_changed(&target.id, &v1, vec![], "h1")
            .await
            .unwrap();
        let ReleaseInsert::Created(first) = first else {
            panic!("expected a new release");
        };

        let again = f
            .store
            .insert_release_if_changed(&target.id, &v1, vec![], "h1")
            .await
            .unwrap();
        assert_eq!(again, ReleaseInsert::Unchanged(first.clone()));

        // Only the variables changed: the version release is reused
        let ReleaseInsert::Created(second) = f
            .store
            .insert_release_if_changed(&target.id, &v1, vec![], "h2")
            .await
            .unwrap()
        else {
            panic!("expected a new release");
        };
        assert_eq!(second.version.id, first.version.id);
        assert_ne!(second.variables.id, first.variables.id);

        let ReleaseInsert::Created(third) = f
            .store
            .insert_release_if_changed(&target.id, &v2, vec![], "h2")
            .await
            .unwrap()
        else {
            panic!("expected a new release");
        };
        assert_eq!(third.variables.id, second.variables.id);

        let latest = f.store.latest_release(&target.id).await.unwrap().unwrap();
        assert_eq!(latest.release.id, third.release.id);
    }

    #[tokio::test]
    async fn test_one_job_per_release() {
        let f = fixture().await;
        let target = ReleaseTarget::new(key(&f));
        f.store
            .apply_release_target_diff(vec![], vec![target.clone()])
            .await
            .unwrap();
        let ReleaseInsert::Created(record) = f
            .store
            .insert_release_if_changed(&target.id, &DeploymentVersionId::generate(), vec![], "h")
            .await
            .unwrap()
        else {
            panic!("expected a new release");
        };

        let job = Job::pending(record.release.id, None, serde_json::json!({}), JobReason::PolicyPassing);
        let (stored, created) = f.store.create_job_for_release_if_absent(job.clone()).await.unwrap();
        assert!(created);
        assert_eq!(stored.id, job.id);

        let other = Job::pending(record.release.id, None, serde_json::json!({}), JobReason::PolicyPassing);
        let (stored, created) = f.store.create_job_for_release_if_absent(other).await.unwrap();
        assert!(!created);
        assert_eq!(stored.id, job.id);

        assert_eq!(f.store.job_workspace(&job.id).await.unwrap(), Some(f.workspace));
    }

    fn nested(depth: usize) -> Condition {
        (0..depth).fold(Condition::kind("web"), |inner, _| Condition::and(vec![inner]))
    }

    fn bad_regex() -> Condition {
        Condition::name(StringOperator::Regex, "([a-z")
    }

    #[tokio::test]
    async fn test_selector_writes_are_validated() {
        let f = fixture().await;
        let too_deep = nested(MAX_DEPTH + 1);

        for selector in [too_deep.clone(), bad_regex()] {
            let environment =
                Environment::new(f.system.id, "staging").with_selector(selector.clone());
            let err = f.store.upsert_environment(environment.clone()).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
            assert!(f.store.get_environment(&environment.id).await.unwrap().is_none());

            let deployment = Deployment::new(f.system.id, "worker").with_selector(selector.clone());
            let err = f.store.upsert_deployment(deployment.clone()).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
            assert!(f.store.get_deployment(&deployment.id).await.unwrap().is_none());

            let variable = DeploymentVariable::new(f.deployment.id, "region").with_value(
                DeploymentVariableValue::new(VariableValue::direct(serde_json::json!("eu")))
                    .with_selector(selector.clone()),
            );
            let err = f.store.upsert_deployment_variable(variable).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
            assert!(f
                .store
                .list_deployment_variables(&f.deployment.id)
                .await
                .unwrap()
                .is_empty());

            let policy = Policy::new(f.workspace, "scoped").with_target(PolicyTarget {
                environment_selector: Some(selector),
                ..Default::default()
            });
            let err = f.store.upsert_policy(policy.clone()).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
            assert!(f.store.get_policy(&policy.id).await.unwrap().is_none());
        }

        // Rejected writes leave nothing in the event log
        assert_eq!(f.store.events_since(&f.workspace, 0).await.unwrap().len(), 3);

        let at_limit = Environment::new(f.system.id, "edge").with_selector(nested(MAX_DEPTH));
        assert!(f.store.upsert_environment(at_limit).await.is_ok());
    }

    #[tokio::test]
    async fn test_policy_with_bad_rule_spec_is_rejected() {
        let f = fixture().await;
        let mut policy = Policy::new(f.workspace, "freeze").with_target(PolicyTarget::all());
        policy.deny_windows.push(
            RecurrenceSpec::new(Frequency::Weekly, Utc::now().naive_utc())
                .with_timezone("Europe/Atlantis"),
        );
        let err = f.store.upsert_policy(policy.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(ref m) if m.contains("Europe/Atlantis")));

        policy.deny_windows.clear();
        policy.version_selector = Some(Condition::tag(StringOperator::Regex, "(v1"));
        assert!(matches!(
            f.store.upsert_policy(policy.clone()).await,
            Err(StoreError::Validation(_))
        ));
        assert!(f.store.list_policies(&f.workspace).await.unwrap().is_empty());

        policy.version_selector = Some(Condition::tag(StringOperator::StartsWith, "v1"));
        f.store.upsert_policy(policy.clone()).await.unwrap();
        assert_eq!(f.store.get_policy(&policy.id).await.unwrap(), Some(policy));
    }

    #[tokio::test]
    async fn test_job_workspace_survives_target_deletion() {
        let f = fixture().await;
        let target = ReleaseTarget::new(key(&f));
        f.store
            .apply_release_target_diff(vec![], vec![target.clone()])
            .await
            .unwrap();
        let ReleaseInsert::Created(record) = f
            .store
            .insert_release_if_changed(&target.id, &DeploymentVersionId::generate(), vec![], "h")
            .await
            .unwrap()
        else {
            panic!("expected a new release");
        };
        assert_eq!(record.release.workspace_id, f.workspace);
        let job = Job::pending(record.release.id, None, serde_json::json!({}), JobReason::PolicyPassing);
        f.store.create_job_for_release_if_absent(job.clone()).await.unwrap();

        f.store.soft_delete_resource(&f.resource.id).await.unwrap();
        f.store
            .apply_release_target_diff(vec![target.id], vec![])
            .await
            .unwrap();

        assert!(f.store.get_release_target(&target.id).await.unwrap().is_none());
        assert_eq!(f.store.job_workspace(&job.id).await.unwrap(), Some(f.workspace));
        assert_eq!(f.store.job_workspace(&JobId::generate()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_job_updates_follow_state_machine() {
        let f = fixture().await;
        let target = ReleaseTarget::new(key(&f));
        f.store
            .apply_release_target_diff(vec![], vec![target.clone()])
            .await
            .unwrap();
        let ReleaseInsert::Created(record) = f
            .store
            .insert_release_if_changed(&target.id, &DeploymentVersionId::generate(), vec![], "h")
            .await
            .unwrap()
        else {
            panic!("expected a new release");
        };
        let job = Job::pending(record.release.id, None, serde_json::json!({}), JobReason::PolicyPassing);
        f.store.create_job_for_release_if_absent(job.clone()).await.unwrap();

        let (updated, previous) = f
            .store
            .apply_job_update(&job.id, &JobStatusUpdate::new(JobStatus::Successful))
            .await
            .unwrap();
        assert_eq!(previous, JobStatus::Pending);
        assert!(updated.completed_at.is_some());

        let last = f.store.last_successful_job(&target.id).await.unwrap();
        assert_eq!(last.map(|j| j.id), Some(job.id));

        let err = f
            .store
            .apply_job_update(&job.id, &JobStatusUpdate::new(JobStatus::InProgress))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_soft_delete_and_event_log() {
        let f = fixture().await;
        let events = f.store.events_since(&f.workspace, 0).await.unwrap();
        assert_eq!(events.len(), 3);
        let last_seq = events.last().unwrap().sequence;

        assert!(f.store.soft_delete_resource(&f.resource.id).await.unwrap());
        assert!(!f.store.soft_delete_resource(&f.resource.id).await.unwrap());

        let newer = f.store.events_since(&f.workspace, last_seq).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert!(matches!(
            newer[0].event,
            EntityEvent::ResourceDeleted { resource_id } if resource_id == f.resource.id
        ));

        // Deleted resources leave selector queries but stay addressable
        let live = f
            .store
            .resources_matching(&f.workspace, &Condition::kind("web"))
            .await
            .unwrap();
        assert!(live.is_empty());
        assert!(f.store.get_resource(&f.resource.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_event_log_compacts_superseded_entries() {
        let f = fixture().await;
        let before = f.store.events_since(&f.workspace, 0).await.unwrap();
        assert_eq!(before.len(), 3);

        for tier in ["a", "b", "c"] {
            let updated = f.resource.clone().with_metadata("tier", tier);
            f.store.upsert_resource(updated).await.unwrap();
        }
        let events = f.store.events_since(&f.workspace, 0).await.unwrap();
        assert_eq!(events.len(), 3);
        let resource_events: Vec<&StoredEvent> = events
            .iter()
            .filter(|e| matches!(e.event, EntityEvent::ResourceUpserted(_)))
            .collect();
        assert_eq!(resource_events.len(), 1);
        assert!(matches!(
            &resource_events[0].event,
            EntityEvent::ResourceUpserted(r) if r.metadata.get("tier").map(String::as_str) == Some("c")
        ));

        // A soft delete keeps the upsert it refers to
        f.store.soft_delete_resource(&f.resource.id).await.unwrap();
        assert_eq!(f.store.events_since(&f.workspace, 0).await.unwrap().len(), 4);

        // Readers part-way through the log still see every later change
        let checkpoint = before.last().unwrap().sequence;
        let newer = f.store.events_since(&f.workspace, checkpoint).await.unwrap();
        assert_eq!(newer.len(), 2);

        f.store.delete_environment(&f.environment.id).await.unwrap();
        let events = f.store.events_since(&f.workspace, 0).await.unwrap();
        assert!(!events
            .iter()
            .any(|e| matches!(e.event, EntityEvent::EnvironmentUpserted(_))));
    }

    #[tokio::test]
    async fn test_related_targets_include_deleted() {
        let f = fixture().await;
        let cluster = Resource::new(f.workspace, "cluster", "c1", "clusters/c1")
            .with_metadata("cluster", "c1");
        let pod = Resource::new(f.workspace, "pod", "p1", "pods/p1").with_metadata("cluster", "c1");
        f.store.upsert_resource(cluster.clone()).await.unwrap();
        f.store.upsert_resource(pod.clone()).await.unwrap();

        let mut rule = ResourceRelationshipRule::new(f.workspace, "cluster", "pod", "v1");
        rule.target_kind = Some("cluster".into());
        rule.metadata_keys_match = vec!["cluster".into()];
        f.store.upsert_relationship_rule(rule).await.unwrap();

        f.store.soft_delete_resource(&cluster.id).await.unwrap();

        let targets = f.store.related_targets(&pod.id, "cluster").await.unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_deleted());
        assert!(f.store.related_targets(&pod.id, "vpc").await.unwrap().is_empty());

        let sources = f.store.related_sources(&cluster.id).await.unwrap();
        assert_eq!(sources.iter().map(|r| r.id).collect::<Vec<_>>(), vec![pod.id]);
    }
}
