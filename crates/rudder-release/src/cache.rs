//! Per-workspace read-through projection of the entity graph
//!
//! A snapshot is built by replaying the workspace event log and then kept
//! current by applying only the events recorded since its last sequence.
//! Snapshots older than the TTL are rebuilt from scratch. The cache is
//! advisory; the store remains the source of truth.

use crate::error::Result;
use dashmap::DashMap;
use rudder_store::Store;
use rudder_types::{
    Deployment, DeploymentId, EntityEvent, Environment, EnvironmentId, Resource, ResourceId,
    StoredEvent, SystemId, WorkspaceId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Entities of one workspace as of `sequence`
#[derive(Debug, Clone)]
pub struct WorkspaceSnapshot {
    pub workspace_id: WorkspaceId,
    pub sequence: u64,
    resources: HashMap<ResourceId, Resource>,
    environments: HashMap<EnvironmentId, Environment>,
    deployments: HashMap<DeploymentId, Deployment>,
    loaded_at: Instant,
}

impl WorkspaceSnapshot {
    fn empty(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            sequence: 0,
            resources: HashMap::new(),
            environments: HashMap::new(),
            deployments: HashMap::new(),
            loaded_at: Instant::now(),
        }
    }

    fn apply(&mut self, stored: &StoredEvent) {
        match &stored.event {
            EntityEvent::ResourceUpserted(resource) => {
                self.resources.insert(resource.id, resource.clone());
            }
            EntityEvent::ResourceDeleted { resource_id } => {
                if let Some(resource) = self.resources.get_mut(resource_id) {
                    resource.deleted_at.get_or_insert(stored.recorded_at);
                }
            }
            EntityEvent::EnvironmentUpserted(environment) => {
                self.environments
                    .insert(environment.id, environment.clone());
            }
            EntityEvent::EnvironmentDeleted { environment_id } => {
                self.environments.remove(environment_id);
            }
            EntityEvent::DeploymentUpserted(deployment) => {
                self.deployments.insert(deployment.id, deployment.clone());
            }
            EntityEvent::DeploymentDeleted { deployment_id } => {
                self.deployments.remove(deployment_id);
            }
        }
        self.sequence = self.sequence.max(stored.sequence);
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Resources that are not soft-deleted, ordered by id
    pub fn live_resources(&self) -> Vec<&Resource> {
        let mut live: Vec<&Resource> = self
            .resources
            .values()
            .filter(|r| !r.is_deleted())
            .collect();
        live.sort_by_key(|r| r.id);
        live
    }

    pub fn environments_of(&self, system_id: &SystemId) -> Vec<&Environment> {
        let mut environments: Vec<&Environment> = self
            .environments
            .values()
            .filter(|e| &e.system_id == system_id)
            .collect();
        environments.sort_by_key(|e| e.id);
        environments
    }

    pub fn deployments_of(&self, system_id: &SystemId) -> Vec<&Deployment> {
        let mut deployments: Vec<&Deployment> = self
            .deployments
            .values()
            .filter(|d| &d.system_id == system_id)
            .collect();
        deployments.sort_by_key(|d| d.id);
        deployments
    }
}

/// Cache of workspace snapshots with TTL-based rebuilds
pub struct WorkspaceCache {
    store: Arc<dyn Store>,
    ttl: Duration,
    snapshots: DashMap<WorkspaceId, Arc<WorkspaceSnapshot>>,
}

impl WorkspaceCache {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            snapshots: DashMap::new(),
        }
    }

    /// Current snapshot of a workspace, loading or catching up as needed
    pub async fn get_or_load(&self, workspace_id: &WorkspaceId) -> Result<Arc<WorkspaceSnapshot>> {
        let cached = self
            .snapshots
            .get(workspace_id)
            .map(|entry| entry.value().clone())
            .filter(|snapshot| snapshot.loaded_at.elapsed() < self.ttl);

        let (mut snapshot, after) = match cached {
            Some(snapshot) => {
                let sequence = snapshot.sequence;
                (snapshot, sequence)
            }
            None => {
                debug!(workspace_id = %workspace_id, "Replaying workspace event log");
                (Arc::new(WorkspaceSnapshot::empty(*workspace_id)), 0)
            }
        };

        let events = self.store.events_since(workspace_id, after).await?;
        if !events.is_empty() {
            let updated = Arc::make_mut(&mut snapshot);
            for event in &events {
                updated.apply(event);
            }
        }

        self.snapshots.insert(*workspace_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Drop a workspace so the next read replays the log
    pub fn invalidate(&self, workspace_id: &WorkspaceId) {
        self.snapshots.remove(workspace_id);
    }

    pub fn invalidate_all(&self) {
        self.snapshots.clear();
    }
}
