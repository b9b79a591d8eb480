//! Main ControlPlane implementation
//!
//! The ControlPlane is the single entry point for API handlers and task
//! workers. It composes the resolver, release manager and dispatcher over
//! one store, one task queue and one keyed mutex, and chains their work
//! through the queue: created targets are evaluated, new jobs are dispatched.

use crate::error::{ControlPlaneError, Result};
use crate::events::EventAggregator;
use rudder_dispatch::{JobDispatcher, WorkflowRun};
use rudder_release::{
    RecomputeOutcome, ReleaseEvaluation, ReleaseManager, ReleaseTargetResolver, WorkspaceCache,
};
use rudder_rules::RolloutInfo;
use rudder_store::{DeadLetter, ReleaseRecord, Store, TaskQueue};
use rudder_types::{
    DeploymentVersionId, EnqueueOptions, EventSource, Job, JobId, JobStatusUpdate, PolicyId,
    ReleaseTargetId, RudderEvent, SystemId, Task, WorkspaceId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Job updated from an external status report
#[derive(Debug, Clone, Serialize)]
pub struct ExternalUpdateOutcome {
    /// The one workspace that owns the job
    pub workspace_id: WorkspaceId,
    pub job: Job,
}

/// Unified control plane
pub struct ControlPlane {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) cache: Arc<WorkspaceCache>,
    pub(crate) resolver: ReleaseTargetResolver,
    pub(crate) manager: ReleaseManager,
    pub(crate) dispatcher: JobDispatcher,
    pub(crate) events: EventAggregator,
}

impl ControlPlane {
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<WorkspaceCache> {
        &self.cache
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<rudder_types::RudderEventEnvelope> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    // ========== Release Targets ==========

    /// Recompute the release targets of a system
    ///
    /// Newly created targets are queued for evaluation by the resolver.
    pub async fn resolve_release_targets(&self, system_id: &SystemId) -> Result<RecomputeOutcome> {
        Ok(self.resolver.resolve(system_id).await?)
    }

    // ========== Releases ==========

    /// Run one evaluation pass and queue dispatch of any job it created
    #[instrument(skip(self), fields(release_target_id = %release_target_id))]
    pub async fn evaluate(&self, release_target_id: &ReleaseTargetId) -> Result<ReleaseEvaluation> {
        let evaluation = self.manager.evaluate(release_target_id).await?;
        if let Some(job) = evaluation.new_job() {
            let task = Task::DispatchJob { job_id: job.id };
            self.queue.enqueue(task, EnqueueOptions::default()).await?;
        }
        Ok(evaluation)
    }

    /// The release created by one evaluation pass, or `None` when nothing
    /// changed or no candidate passed
    pub async fn evaluate_release_target(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> Result<Option<ReleaseRecord>> {
        Ok(self
            .evaluate(release_target_id)
            .await?
            .created_release()
            .cloned())
    }

    pub async fn get_rollout_info(
        &self,
        release_target_id: &ReleaseTargetId,
        policy_id: &PolicyId,
        version_id: &DeploymentVersionId,
    ) -> Result<RolloutInfo> {
        Ok(self
            .manager
            .rollout_info(release_target_id, policy_id, version_id)
            .await?)
    }

    // ========== Jobs ==========

    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("Job", job_id))
    }

    pub async fn dispatch_job(&self, job_id: &JobId) -> Result<Job> {
        Ok(self.dispatcher.dispatch(job_id).await?)
    }

    pub async fn update_job_status(&self, job_id: &JobId, update: &JobStatusUpdate) -> Result<Job> {
        Ok(self.dispatcher.update_job_status(job_id, update).await?)
    }

    /// Apply a GitHub workflow run report to the job named in its run name
    ///
    /// Only the workspace owning that job is touched; a run that names no
    /// known job is a not-found error.
    #[instrument(skip(self, run), fields(run_id = run.id))]
    pub async fn on_external_status_update(&self, run: &WorkflowRun) -> Result<ExternalUpdateOutcome> {
        let correlated = run.correlate().ok_or_else(|| {
            ControlPlaneError::NotFound(format!("No job id in workflow run {}", run.id))
        })?;
        let workspace_id = self
            .store
            .job_workspace(&correlated.job_id)
            .await?
            .ok_or_else(|| ControlPlaneError::not_found("Job", correlated.job_id))?;

        let job = self
            .dispatcher
            .update_job_status(&correlated.job_id, &correlated.update)
            .await?;
        info!(
            workspace_id = %workspace_id,
            job_id = %job.id,
            status = ?job.status,
            "External status applied"
        );
        Ok(ExternalUpdateOutcome { workspace_id, job })
    }

    // ========== Tasks ==========

    /// Run one queued task
    #[instrument(skip(self), fields(task = task.kind()))]
    pub async fn handle_task(&self, task: &Task) -> Result<()> {
        match task {
            Task::ResolveReleaseTargets { system_id } => {
                self.resolve_release_targets(system_id).await?;
            }
            Task::EvaluateReleaseTarget { release_target_id } => {
                self.evaluate(release_target_id).await?;
            }
            Task::DispatchJob { job_id } => {
                self.dispatch_job(job_id).await?;
            }
            Task::ResourceExitedEnvironment {
                resource_id,
                environment_id,
                deployment_id,
            } => {
                let workspace_id = self
                    .store
                    .get_resource(resource_id)
                    .await?
                    .map(|r| r.workspace_id);
                if workspace_id.is_none() {
                    warn!(resource_id = %resource_id, "Exited resource no longer stored");
                }
                info!(
                    resource_id = %resource_id,
                    environment_id = %environment_id,
                    deployment_id = %deployment_id,
                    "Resource exited environment"
                );
                self.events.emit(
                    RudderEvent::ResourceExitedEnvironment {
                        resource_id: *resource_id,
                        environment_id: *environment_id,
                        deployment_id: *deployment_id,
                    },
                    EventSource::Worker,
                    workspace_id,
                );
            }
        }
        Ok(())
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.queue.dead_letters().await?)
    }
}
