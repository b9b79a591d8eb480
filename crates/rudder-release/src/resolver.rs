//! Release-target resolution
//!
//! Keeps the release targets of a system equal to the join of environment
//! membership and deployment selectors. One recompute runs per system at a
//! time; a request that finds the system lock held is re-enqueued with a
//! delay instead of waiting.

use crate::cache::WorkspaceCache;
use crate::error::{ReleaseError, Result};
use rudder_selector::{deployment_matches, environment_matches};
use rudder_store::{system_lock_key, DistributedMutex, ReleaseTargetDiff, Store, TaskQueue};
use rudder_types::{
    EnqueueOptions, EnvironmentId, EventSource, ReleaseTarget, ReleaseTargetKey, ResourceId,
    RudderEvent, RudderEventEnvelope, SystemId, Task, WorkspaceId,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

/// Result of a recompute request
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    /// The diff that was applied (possibly empty)
    Applied(ReleaseTargetDiff),

    /// Another recompute held the system lock; the request was re-enqueued
    Requeued,
}

/// Recomputes release targets per system
pub struct ReleaseTargetResolver {
    store: Arc<dyn Store>,
    cache: Arc<WorkspaceCache>,
    mutex: Arc<dyn DistributedMutex>,
    queue: Arc<dyn TaskQueue>,
    requeue_delay: Duration,
    event_tx: broadcast::Sender<RudderEventEnvelope>,
}

impl ReleaseTargetResolver {
    pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_millis(500);

    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<WorkspaceCache>,
        mutex: Arc<dyn DistributedMutex>,
        queue: Arc<dyn TaskQueue>,
        event_tx: broadcast::Sender<RudderEventEnvelope>,
    ) -> Self {
        Self {
            store,
            cache,
            mutex,
            queue,
            requeue_delay: Self::DEFAULT_REQUEUE_DELAY,
            event_tx,
        }
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Recompute the release targets of a system
    #[instrument(skip(self), fields(system_id = %system_id))]
    pub async fn resolve(&self, system_id: &SystemId) -> Result<RecomputeOutcome> {
        let Some(_guard) = self.mutex.try_acquire(&system_lock_key(system_id)).await? else {
            let task = Task::ResolveReleaseTargets {
                system_id: *system_id,
            };
            self.queue
                .enqueue(task, EnqueueOptions::delayed(self.requeue_delay))
                .await?;
            debug!("Recompute already running, re-enqueued");
            return Ok(RecomputeOutcome::Requeued);
        };

        let system = self
            .store
            .get_system(system_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("System", system_id))?;
        let snapshot = self.cache.get_or_load(&system.workspace_id).await?;
        let resources = snapshot.live_resources();
        let deployments = snapshot.deployments_of(system_id);

        // Current environment membership, used for both targets and exit hooks
        let mut membership: HashMap<EnvironmentId, BTreeSet<ResourceId>> = HashMap::new();
        let mut desired: BTreeSet<ReleaseTargetKey> = BTreeSet::new();
        for environment in snapshot.environments_of(system_id) {
            let members = membership.entry(environment.id).or_default();
            for resource in resources.iter().filter(|r| environment_matches(environment, r)) {
                members.insert(resource.id);
                for deployment in deployments.iter().filter(|d| deployment_matches(d, resource)) {
                    desired.insert(ReleaseTargetKey {
                        deployment_id: deployment.id,
                        environment_id: environment.id,
                        resource_id: resource.id,
                    });
                }
            }
        }

        let existing = self.store.list_release_targets(system_id).await?;
        let existing_keys: BTreeSet<ReleaseTargetKey> = existing.iter().map(|t| t.key()).collect();

        let delete = existing
            .iter()
            .filter(|t| !desired.contains(&t.key()))
            .map(|t| t.id)
            .collect();
        let insert = desired
            .difference(&existing_keys)
            .map(|key| ReleaseTarget::new(*key))
            .collect();

        let diff = self.store.apply_release_target_diff(delete, insert).await?;
        if diff.is_empty() {
            debug!("Release targets unchanged");
            return Ok(RecomputeOutcome::Applied(diff));
        }

        for target in &diff.created {
            let task = Task::EvaluateReleaseTarget {
                release_target_id: target.id,
            };
            self.queue.enqueue(task, EnqueueOptions::default()).await?;
        }

        // Full exits only: the resource left the environment, not just a deployment
        let exits: BTreeSet<(ResourceId, EnvironmentId)> = diff
            .deleted
            .iter()
            .filter(|t| {
                membership
                    .get(&t.environment_id)
                    .map_or(true, |members| !members.contains(&t.resource_id))
            })
            .map(|t| (t.resource_id, t.environment_id))
            .collect();
        let all_deployments = self.store.list_deployments(system_id).await?;
        for (resource_id, environment_id) in &exits {
            for deployment in &all_deployments {
                let task = Task::ResourceExitedEnvironment {
                    resource_id: *resource_id,
                    environment_id: *environment_id,
                    deployment_id: deployment.id,
                };
                self.queue.enqueue(task, EnqueueOptions::default()).await?;
            }
        }

        info!(
            created = diff.created.len(),
            deleted = diff.deleted.len(),
            exits = exits.len(),
            "Release targets recomputed"
        );
        self.emit(
            RudderEvent::ReleaseTargetsResolved {
                system_id: *system_id,
                created: diff.created.len(),
                deleted: diff.deleted.len(),
            },
            system.workspace_id,
        );

        Ok(RecomputeOutcome::Applied(diff))
    }

    fn emit(&self, event: RudderEvent, workspace_id: WorkspaceId) {
        let envelope =
            RudderEventEnvelope::new(event, EventSource::Resolver).with_workspace(workspace_id);
        let _ = self.event_tx.send(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_store::{GraphStore, InMemoryMutex, InMemoryStore, InMemoryTaskQueue};
    use rudder_types::{Condition, Deployment, Environment, Resource, System};

    struct Fixture {
        store: Arc<InMemoryStore>,
        mutex: Arc<InMemoryMutex>,
        queue: Arc<InMemoryTaskQueue>,
        resolver: ReleaseTargetResolver,
        ws: WorkspaceId,
        system: System,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let mutex = Arc::new(InMemoryMutex::new());
        let queue = Arc::new(InMemoryTaskQueue::default());
        let cache = Arc::new(WorkspaceCache::new(store.clone(), Duration::from_secs(60)));
        let (event_tx, _) = broadcast::channel(64);
        let ws = WorkspaceId::generate();
        let system = System::new(ws, "shop");
        store.upsert_system(system.clone()).await.unwrap();

        Fixture {
            resolver: ReleaseTargetResolver::new(
                store.clone(),
                cache,
                mutex.clone(),
                queue.clone(),
                event_tx,
            ),
            store,
            mutex,
            queue,
            ws,
            system,
        }
    }

    fn applied(outcome: RecomputeOutcome) -> ReleaseTargetDiff {
        match outcome {
            RecomputeOutcome::Applied(diff) => diff,
            RecomputeOutcome::Requeued => panic!("expected an applied diff"),
        }
    }

    async fn drain(queue: &InMemoryTaskQueue) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Some(delivery) = queue.dequeue().await.unwrap() {
            queue.ack(delivery.id).await.unwrap();
            tasks.push(delivery.task);
        }
        tasks
    }

    #[tokio::test]
    async fn test_diff_is_symmetric_difference() {
        let f = fixture().await;
        let env = Environment::new(f.system.id, "prod").with_selector(Condition::kind("web"));
        let api = Deployment::new(f.system.id, "api");
        let eu_only = Deployment::new(f.system.id, "eu-worker")
            .with_selector(Condition::metadata_equals("region", "eu"));
        let web_eu = Resource::new(f.ws, "web", "web-eu", "web/eu").with_metadata("region", "eu");
        let web_us = Resource::new(f.ws, "web", "web-us", "web/us").with_metadata("region", "us");
        let db = Resource::new(f.ws, "db", "db-1", "db/1");
        f.store.upsert_environment(env.clone()).await.unwrap();
        f.store.upsert_deployment(api.clone()).await.unwrap();
        f.store.upsert_deployment(eu_only.clone()).await.unwrap();
        for r in [&web_eu, &web_us, &db] {
            f.store.upsert_resource(r.clone()).await.unwrap();
        }

        let diff = applied(f.resolver.resolve(&f.system.id).await.unwrap());
        let keys: BTreeSet<(String, String)> = diff
            .created
            .iter()
            .map(|t| (t.deployment_id.to_string(), t.resource_id.to_string()))
            .collect();
        assert_eq!(
            keys,
            BTreeSet::from([
                (api.id.to_string(), web_eu.id.to_string()),
                (api.id.to_string(), web_us.id.to_string()),
                (eu_only.id.to_string(), web_eu.id.to_string()),
            ])
        );
        assert!(diff.deleted.is_empty());

        let evaluations = drain(&f.queue).await;
        assert_eq!(evaluations.len(), 3);
        assert!(evaluations
            .iter()
            .all(|t| matches!(t, Task::EvaluateReleaseTarget { .. })));

        // Unchanged input: empty diff
        assert!(applied(f.resolver.resolve(&f.system.id).await.unwrap()).is_empty());

        // web-eu moves to us: only the eu-worker target goes, no full exit
        f.store
            .upsert_resource(web_eu.clone().with_metadata("region", "us"))
            .await
            .unwrap();
        let diff = applied(f.resolver.resolve(&f.system.id).await.unwrap());
        assert!(diff.created.is_empty());
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].deployment_id, eu_only.id);
        assert!(drain(&f.queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_exit_notifies_every_deployment() {
        let f = fixture().await;
        let env = Environment::new(f.system.id, "prod").with_selector(Condition::kind("web"));
        let api = Deployment::new(f.system.id, "api");
        let worker = Deployment::new(f.system.id, "worker");
        let web = Resource::new(f.ws, "web", "web-1", "web/1");
        f.store.upsert_environment(env.clone()).await.unwrap();
        f.store.upsert_deployment(api).await.unwrap();
        f.store.upsert_deployment(worker).await.unwrap();
        f.store.upsert_resource(web.clone()).await.unwrap();

        applied(f.resolver.resolve(&f.system.id).await.unwrap());
        drain(&f.queue).await;

        f.store.soft_delete_resource(&web.id).await.unwrap();
        let diff = applied(f.resolver.resolve(&f.system.id).await.unwrap());
        assert_eq!(diff.deleted.len(), 2);

        let exits = drain(&f.queue).await;
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|t| matches!(
            t,
            Task::ResourceExitedEnvironment { resource_id, environment_id, .. }
                if *resource_id == web.id && *environment_id == env.id
        )));
    }

    #[tokio::test]
    async fn test_soft_deleted_resources_get_no_targets() {
        let f = fixture().await;
        let env = Environment::new(f.system.id, "prod").with_selector(Condition::kind("web"));
        let api = Deployment::new(f.system.id, "api");
        let live = Resource::new(f.ws, "web", "web-1", "web/1");
        let retired = Resource::new(f.ws, "web", "web-2", "web/2");
        f.store.upsert_environment(env).await.unwrap();
        f.store.upsert_deployment(api).await.unwrap();
        f.store.upsert_resource(live.clone()).await.unwrap();
        f.store.upsert_resource(retired.clone()).await.unwrap();
        f.store.soft_delete_resource(&retired.id).await.unwrap();

        let diff = applied(f.resolver.resolve(&f.system.id).await.unwrap());
        let resources: Vec<ResourceId> = diff.created.iter().map(|t| t.resource_id).collect();
        assert_eq!(resources, vec![live.id]);
        assert!(diff.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_contended_recompute_is_requeued() {
        let f = fixture().await;
        let _held = f
            .mutex
            .try_acquire(&system_lock_key(&f.system.id))
            .await
            .unwrap()
            .unwrap();

        let outcome = f.resolver.resolve(&f.system.id).await.unwrap();
        assert_eq!(outcome, RecomputeOutcome::Requeued);
        assert_eq!(f.queue.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_environment_without_selector_matches_nothing() {
        let f = fixture().await;
        f.store
            .upsert_environment(Environment::new(f.system.id, "empty"))
            .await
            .unwrap();
        f.store
            .upsert_deployment(Deployment::new(f.system.id, "api"))
            .await
            .unwrap();
        f.store
            .upsert_resource(Resource::new(f.ws, "web", "web-1", "web/1"))
            .await
            .unwrap();

        assert!(applied(f.resolver.resolve(&f.system.id).await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_system() {
        let f = fixture().await;
        let err = f.resolver.resolve(&SystemId::generate()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound { entity: "System", .. }));
    }
}
