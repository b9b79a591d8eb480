//! Resolve, evaluate, dispatch and complete a release through the facade

use async_trait::async_trait;
use rudder_control::{ControlPlane, ControlPlaneBuilder, ControlPlaneError};
use rudder_dispatch::{BackendError, DispatchReceipt, ExecutionBackend, JobAgentConfig};
use rudder_release::ReleaseEvaluation;
use rudder_store::{
    GraphStore, InMemoryStore, InMemoryTaskQueue, JobStore, ReleaseStore, TaskQueue,
};
use rudder_types::{
    Condition, Deployment, DeploymentVersion, Environment, Job, JobAgent, JobAgentKind,
    JobStatus, JobStatusUpdate, ReleaseTarget, Resource, RudderEvent, System, Task, WorkspaceId,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Accepts every job and counts deliveries
#[derive(Default)]
struct RecordingBackend {
    dispatched: AtomicUsize,
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    fn kind(&self) -> JobAgentKind {
        JobAgentKind::Webhook
    }

    async fn dispatch(
        &self,
        job: &Job,
        _config: &JobAgentConfig,
    ) -> Result<DispatchReceipt, BackendError> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(DispatchReceipt::in_progress("accepted").with_external_id(format!("run-{}", job.id)))
    }
}

struct Harness {
    control: Arc<ControlPlane>,
    store: Arc<InMemoryStore>,
    queue: Arc<InMemoryTaskQueue>,
    backend: Arc<RecordingBackend>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryTaskQueue::default());
        let backend = Arc::new(RecordingBackend::default());
        let control = ControlPlaneBuilder::new()
            .with_store(store.clone())
            .with_queue(queue.clone())
            .with_backend(backend.clone())
            .build();
        Self {
            control: Arc::new(control),
            store,
            queue,
            backend,
        }
    }

    /// One system with a `prod` environment over `web` resources and an
    /// `api` deployment driven by a webhook agent
    async fn system(&self) -> (System, Deployment) {
        let ws = WorkspaceId::generate();
        let system = System::new(ws, "shop");
        let agent = JobAgent::new(
            ws,
            "hooks",
            JobAgentKind::Webhook,
            json!({ "url": "https://hooks.example.test/deploy" }),
        );
        let environment =
            Environment::new(system.id, "prod").with_selector(Condition::kind("web"));
        let deployment =
            Deployment::new(system.id, "api").with_job_agent(agent.id, json!({ "replicas": 2 }));

        self.store.upsert_system(system.clone()).await.unwrap();
        self.store.upsert_job_agent(agent).await.unwrap();
        self.store.upsert_environment(environment).await.unwrap();
        self.store.upsert_deployment(deployment.clone()).await.unwrap();
        self.store
            .upsert_resource(Resource::new(ws, "web", "web-1", "web/1"))
            .await
            .unwrap();
        (system, deployment)
    }

    async fn only_target(&self, system: &System) -> ReleaseTarget {
        let targets = self.store.list_release_targets(&system.id).await.unwrap();
        assert_eq!(targets.len(), 1);
        targets[0].clone()
    }

    async fn drain_tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Some(delivery) = self.queue.dequeue().await.unwrap() {
            self.queue.ack(delivery.id).await.unwrap();
            tasks.push(delivery.task);
        }
        tasks
    }
}

#[tokio::test]
async fn test_release_flows_from_version_to_successful_job() {
    let h = Harness::new();
    let mut events = h.control.subscribe_events();
    let (system, deployment) = h.system().await;

    h.control.resolve_release_targets(&system.id).await.unwrap();
    let target = h.only_target(&system).await;

    // No versions yet
    let evaluation = h.control.evaluate(&target.id).await.unwrap();
    assert!(matches!(evaluation, ReleaseEvaluation::Blocked { .. }));

    let v1 = DeploymentVersion::new(deployment.id, "v1");
    h.store.insert_version(v1.clone()).await.unwrap();
    let release = h
        .control
        .evaluate_release_target(&target.id)
        .await
        .unwrap()
        .expect("v1 should be released");
    assert_eq!(release.version.version_id, v1.id);

    let jobs = h.store.jobs_for_release(&release.release.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.job_agent_config["replicas"], 2);
    assert_eq!(job.job_agent_config["url"], "https://hooks.example.test/deploy");

    let dispatched = h.control.dispatch_job(&job.id).await.unwrap();
    assert_eq!(dispatched.status, JobStatus::InProgress);
    assert_eq!(
        dispatched.external_id.as_deref(),
        Some(format!("run-{}", job.id).as_str())
    );

    let done = h
        .control
        .update_job_status(&job.id, &JobStatusUpdate::new(JobStatus::Successful))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Successful);
    assert_eq!(h.control.get_job(&job.id).await.unwrap().status, JobStatus::Successful);
    assert_eq!(
        h.store.last_successful_job(&target.id).await.unwrap().map(|j| j.id),
        Some(job.id)
    );

    // A later status cannot reopen a terminal job
    let err = h
        .control
        .update_job_status(&job.id, &JobStatusUpdate::new(JobStatus::InProgress))
        .await
        .unwrap_err();
    assert!(matches!(err, ControlPlaneError::Dispatch(_)));

    let mut seen = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        seen.push(envelope.event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, RudderEvent::ReleaseTargetsResolved { .. })));
    assert!(seen.iter().any(|e| matches!(e, RudderEvent::JobCreated { .. })));
}

#[tokio::test]
async fn test_repeated_evaluations_yield_one_release_one_job_one_dispatch() {
    let h = Harness::new();
    let (system, deployment) = h.system().await;
    h.control.resolve_release_targets(&system.id).await.unwrap();
    let target = h.only_target(&system).await;
    h.store
        .insert_version(DeploymentVersion::new(deployment.id, "v1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let control = h.control.clone();
        let id = target.id;
        handles.push(tokio::spawn(async move { control.evaluate(&id).await }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().created_release().is_some() {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let release = h.store.latest_release(&target.id).await.unwrap().unwrap();
    assert_eq!(h.store.jobs_for_release(&release.release.id).await.unwrap().len(), 1);

    let dispatch_tasks = h
        .drain_tasks()
        .await
        .into_iter()
        .filter(|t| matches!(t, Task::DispatchJob { .. }))
        .count();
    assert_eq!(dispatch_tasks, 1);
}

#[tokio::test]
async fn test_queued_work_runs_to_dispatch() {
    let h = Harness::new();
    let (system, deployment) = h.system().await;
    h.store
        .insert_version(DeploymentVersion::new(deployment.id, "v1"))
        .await
        .unwrap();
    h.queue
        .enqueue(
            Task::ResolveReleaseTargets {
                system_id: system.id,
            },
            Default::default(),
        )
        .await
        .unwrap();

    while let Some(delivery) = h.queue.dequeue().await.unwrap() {
        h.control.handle_task(&delivery.task).await.unwrap();
        h.queue.ack(delivery.id).await.unwrap();
    }

    assert_eq!(h.backend.dispatched.load(Ordering::SeqCst), 1);
    let target = h.only_target(&system).await;
    let release = h.store.latest_release(&target.id).await.unwrap().unwrap();
    let jobs = h.store.jobs_for_release(&release.release.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::InProgress);

    // Redelivered dispatch is a no-op
    h.control
        .handle_task(&Task::DispatchJob { job_id: jobs[0].id })
        .await
        .unwrap();
    assert_eq!(h.backend.dispatched.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_webhook_updates_touch_only_owning_workspace() {
    let h = Harness::new();
    let (shop, shop_api) = h.system().await;
    let (blog, blog_api) = h.system().await;
    assert_ne!(shop.workspace_id, blog.workspace_id);

    let mut jobs = Vec::new();
    for (system, deployment) in [(&shop, &shop_api), (&blog, &blog_api)] {
        h.control.resolve_release_targets(&system.id).await.unwrap();
        let target = h.only_target(system).await;
        h.store
            .insert_version(DeploymentVersion::new(deployment.id, "v1"))
            .await
            .unwrap();
        let job = h
            .control
            .evaluate(&target.id)
            .await
            .unwrap()
            .new_job()
            .cloned()
            .unwrap();
        h.control.dispatch_job(&job.id).await.unwrap();
        jobs.push(job);
    }

    let payload: rudder_dispatch::WorkflowRunEvent = serde_json::from_value(json!({
        "action": "completed",
        "workflow_run": {
            "id": 4242,
            "name": format!("deploy {}", jobs[1].id),
            "status": "completed",
            "conclusion": "failure"
        }
    }))
    .unwrap();
    let outcome = h
        .control
        .on_external_status_update(&payload.workflow_run)
        .await
        .unwrap();

    assert_eq!(outcome.workspace_id, blog.workspace_id);
    assert_eq!(outcome.job.status, JobStatus::Failure);
    assert_eq!(
        h.control.get_job(&jobs[0].id).await.unwrap().status,
        JobStatus::InProgress
    );
}
