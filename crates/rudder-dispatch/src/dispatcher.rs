//! Job dispatcher
//!
//! Hands pending jobs to the backend registered for their agent kind. Every
//! business or integration failure ends as a terminal job status with the
//! error recorded; only store failures propagate, so the queue can redeliver.

use crate::backend::ExecutionBackend;
use crate::config::JobAgentConfig;
use crate::error::{DispatchError, Result};
use rudder_store::{Store, StoreError};
use rudder_types::{
    EventSource, Job, JobAgentKind, JobId, JobStatus, JobStatusUpdate, RudderEvent,
    RudderEventEnvelope,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Backend and typed config for a job, or why its agent is unusable
enum Preparation {
    Ready(Arc<dyn ExecutionBackend>, JobAgentConfig),
    Invalid(String),
}

pub struct JobDispatcher {
    store: Arc<dyn Store>,
    backends: HashMap<JobAgentKind, Arc<dyn ExecutionBackend>>,
    event_tx: broadcast::Sender<RudderEventEnvelope>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn Store>, event_tx: broadcast::Sender<RudderEventEnvelope>) -> Self {
        Self {
            store,
            backends: HashMap::new(),
            event_tx,
        }
    }

    /// Register a backend for the agent kind it serves
    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn supports(&self, kind: &JobAgentKind) -> bool {
        self.backends.contains_key(kind)
    }

    /// Dispatch a pending job
    ///
    /// A job that already left `Pending` is returned unchanged, so redelivered
    /// dispatch tasks are harmless.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn dispatch(&self, job_id: &JobId) -> Result<Job> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("Job", job_id))?;
        if job.status != JobStatus::Pending {
            info!(status = ?job.status, "Job already dispatched");
            return Ok(job);
        }

        let (backend, config) = match self.prepare(&job).await? {
            Preparation::Ready(backend, config) => (backend, config),
            Preparation::Invalid(message) => {
                warn!(error = %message, "Invalid job agent");
                let update = JobStatusUpdate::new(JobStatus::InvalidJobAgent).with_message(message);
                return self.update_job_status(job_id, &update).await;
            }
        };

        let update = match backend.dispatch(&job, &config).await {
            Ok(receipt) => receipt.to_update(),
            Err(err) => {
                warn!(error = %err, kind = %config.kind(), "Dispatch failed");
                JobStatusUpdate::new(JobStatus::InvalidIntegration).with_message(err.to_string())
            }
        };
        self.update_job_status(job_id, &update).await
    }

    async fn prepare(&self, job: &Job) -> Result<Preparation> {
        let Some(agent_id) = job.job_agent_id else {
            return Ok(Preparation::Invalid(
                "No job agent configured for deployment".to_string(),
            ));
        };
        let Some(agent) = self.store.get_job_agent(&agent_id).await? else {
            return Ok(Preparation::Invalid(format!(
                "Job agent {} not found",
                agent_id
            )));
        };
        let Some(backend) = self.backends.get(&agent.kind).cloned() else {
            return Ok(Preparation::Invalid(
                DispatchError::UnsupportedKind(agent.kind).to_string(),
            ));
        };

        // The job snapshot already holds the merged config; merging again
        // only fills keys the agent gained since
        let merged = agent.merged_config(&job.job_agent_config);
        Ok(match JobAgentConfig::parse(&agent.kind, &merged) {
            Ok(config) => Preparation::Ready(backend, config),
            Err(err) => Preparation::Invalid(err.to_string()),
        })
    }

    /// Apply a status update through the job state machine
    #[instrument(skip(self, update), fields(job_id = %job_id, status = ?update.status))]
    pub async fn update_job_status(&self, job_id: &JobId, update: &JobStatusUpdate) -> Result<Job> {
        let (job, previous) = match self.store.apply_job_update(job_id, update).await {
            Ok(applied) => applied,
            Err(StoreError::InvalidTransition(_)) => {
                let from = self
                    .store
                    .get_job(job_id)
                    .await?
                    .map(|job| job.status)
                    .unwrap_or(JobStatus::Pending);
                return Err(DispatchError::InvalidTransition {
                    from,
                    to: update.status,
                });
            }
            Err(err) => return Err(err.into()),
        };

        if previous != job.status {
            info!(from = ?previous, to = ?job.status, "Job status changed");
            let mut envelope = RudderEventEnvelope::new(
                RudderEvent::JobStatusChanged {
                    job_id: job.id,
                    from: previous,
                    to: job.status,
                },
                EventSource::Dispatch,
            );
            if let Some(workspace_id) = self.store.job_workspace(job_id).await? {
                envelope = envelope.with_workspace(workspace_id);
            }
            let _ = self.event_tx.send(envelope);
        }
        Ok(job)
    }
}
