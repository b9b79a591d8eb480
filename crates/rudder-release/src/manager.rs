//! Release Manager - one evaluation pass per release target
//!
//! Decide first, then write only if the decision differs from the current
//! release:
//!
//! 1. load the target with its deployment, environment and resource
//! 2. gather `Ready` candidate versions, newest first, plus a pinned version
//! 3. run the rule chain of every applicable policy, then the approval gate
//! 4. resolve the variable snapshot and hash it
//! 5. compare-then-insert the release, and create its job if absent
//!
//! The pass runs under the release target's mutex, and both inserts are
//! atomic existence checks, so duplicate or concurrent deliveries converge
//! on one release and one job.

use crate::error::{ReleaseError, Result};
use crate::secrets::SecretCipher;
use crate::variables::VariableResolver;
use chrono::{DateTime, Utc};
use rudder_rules::engine::NO_CANDIDATES;
use rudder_rules::{
    applicable_policies, build_rule_chain, evaluate_approvals, PolicyInputs, RejectionReason,
    RolloutInfo, RolloutRule, RuleContext, RuleEngine,
};
use rudder_store::{release_target_lock_key, DistributedMutex, ReleaseInsert, ReleaseRecord, Store};
use rudder_types::{
    ApprovalRequirement, Deployment, DeploymentVersion, DeploymentVersionId, Environment,
    EventSource, Job, JobReason, PolicyId, ReleaseTarget, ReleaseTargetId, Resource, RudderEvent,
    RudderEventEnvelope, VersionStatus, WorkspaceId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

/// Rule name attached to approval-gate rejections
pub const APPROVAL_GATE: &str = "approval";

/// Release manager configuration
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    /// Newest `Ready` versions considered per evaluation
    pub candidate_limit: usize,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 100,
        }
    }
}

/// Outcome of one evaluation pass
#[derive(Debug, Clone)]
pub enum ReleaseEvaluation {
    /// A new release was inserted and its job created
    Created { release: ReleaseRecord, job: Job },

    /// The current release already matches the decision
    Unchanged {
        release: ReleaseRecord,

        /// Set when the release had no job and one was created now
        recovered_job: Option<Job>,
    },

    /// No candidate may be deployed
    Blocked {
        reason: String,
        rejections: BTreeMap<DeploymentVersionId, RejectionReason>,
    },
}

impl ReleaseEvaluation {
    /// The release inserted by this pass, if any
    pub fn created_release(&self) -> Option<&ReleaseRecord> {
        match self {
            Self::Created { release, .. } => Some(release),
            _ => None,
        }
    }

    /// The job this pass created and that still needs dispatching
    pub fn new_job(&self) -> Option<&Job> {
        match self {
            Self::Created { job, .. } => Some(job),
            Self::Unchanged { recovered_job, .. } => recovered_job.as_ref(),
            Self::Blocked { .. } => None,
        }
    }
}

struct TargetContext {
    target: ReleaseTarget,
    deployment: Deployment,
    environment: Environment,
    resource: Resource,
}

/// Orchestrates evaluation passes
pub struct ReleaseManager {
    store: Arc<dyn Store>,
    mutex: Arc<dyn DistributedMutex>,
    variables: VariableResolver,
    cipher: Arc<dyn SecretCipher>,
    config: ReleaseConfig,
    event_tx: broadcast::Sender<RudderEventEnvelope>,
}

impl ReleaseManager {
    pub fn new(
        store: Arc<dyn Store>,
        mutex: Arc<dyn DistributedMutex>,
        cipher: Arc<dyn SecretCipher>,
        config: ReleaseConfig,
        event_tx: broadcast::Sender<RudderEventEnvelope>,
    ) -> Self {
        Self {
            variables: VariableResolver::new(store.clone(), cipher.clone()),
            store,
            mutex,
            cipher,
            config,
            event_tx,
        }
    }

    /// Run one evaluation pass now
    pub async fn evaluate(&self, release_target_id: &ReleaseTargetId) -> Result<ReleaseEvaluation> {
        self.evaluate_at(release_target_id, Utc::now()).await
    }

    /// Run one evaluation pass as of `now`
    #[instrument(skip(self, now), fields(release_target_id = %release_target_id))]
    pub async fn evaluate_at(
        &self,
        release_target_id: &ReleaseTargetId,
        now: DateTime<Utc>,
    ) -> Result<ReleaseEvaluation> {
        let _guard = self
            .mutex
            .acquire(&release_target_lock_key(release_target_id))
            .await?;
        let ctx = self.load(release_target_id).await?;
        let workspace_id = ctx.resource.workspace_id;

        let candidates = self.candidates(&ctx.target).await?;
        let policies = self.store.list_policies(&workspace_id).await?;
        let applicable =
            applicable_policies(&policies, &ctx.deployment, &ctx.environment, &ctx.resource);

        let last_successful_deploy = self
            .store
            .last_successful_job(release_target_id)
            .await?
            .and_then(|job| job.completed_at);
        let peers = self.peers(&ctx.target).await?;
        let approval_records = self.store.list_approvals(&ctx.environment.id).await?;

        let inputs = PolicyInputs {
            release_target_id: *release_target_id,
            environment_id: ctx.environment.id,
            last_successful_deploy,
            rollout_peers: &peers,
            approval_records: &approval_records,
        };
        let engine = RuleEngine::new(build_rule_chain(&applicable, &inputs)?);
        let rule_ctx =
            RuleContext::new(*release_target_id, now).with_desired(ctx.target.desired_version_id);
        let decision = engine.evaluate(&rule_ctx, candidates);

        let Some(version) = decision.chosen else {
            let reason = decision
                .reason
                .unwrap_or_else(|| NO_CANDIDATES.to_string());
            return Ok(self.blocked(&ctx, reason, decision.rejections));
        };

        let requirements: Vec<ApprovalRequirement> = applicable
            .iter()
            .flat_map(|p| p.approvals.iter().cloned())
            .collect();
        let approval = evaluate_approvals(
            &requirements,
            &approval_records,
            version.id,
            ctx.environment.id,
        );
        if !approval.passing {
            let reason = approval
                .rejections
                .iter()
                .chain(&approval.outstanding)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");
            let mut rejections = decision.rejections;
            rejections.insert(version.id, RejectionReason::new(APPROVAL_GATE, reason.clone()));
            return Ok(self.blocked(&ctx, reason, rejections));
        }

        let variables = self
            .variables
            .resolve(&ctx.resource, &ctx.deployment, &ctx.environment)
            .await?;
        let hash = variables.content_hash()?;
        let rows = variables.to_release_variables(self.cipher.as_ref())?;

        match self
            .store
            .insert_release_if_changed(release_target_id, &version.id, rows, &hash)
            .await?
        {
            ReleaseInsert::Unchanged(release) => {
                let (job, created) = self.ensure_job(&ctx, &release).await?;
                debug!(release_id = %release.release.id, "Release unchanged");
                Ok(ReleaseEvaluation::Unchanged {
                    release,
                    recovered_job: created.then_some(job),
                })
            }
            ReleaseInsert::Created(release) => {
                info!(
                    release_id = %release.release.id,
                    version_id = %version.id,
                    tag = %version.tag,
                    variables = variables.len(),
                    "Release created"
                );
                self.emit(
                    RudderEvent::ReleaseCreated {
                        release_target_id: *release_target_id,
                        release_id: release.release.id,
                        version_id: version.id,
                    },
                    workspace_id,
                );
                let (job, _) = self.ensure_job(&ctx, &release).await?;
                Ok(ReleaseEvaluation::Created { release, job })
            }
        }
    }

    /// Rollout state of a target for one version under one policy
    #[instrument(skip(self))]
    pub async fn rollout_info(
        &self,
        release_target_id: &ReleaseTargetId,
        policy_id: &PolicyId,
        version_id: &DeploymentVersionId,
    ) -> Result<RolloutInfo> {
        let ctx = self.load(release_target_id).await?;
        let policy = self
            .store
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("Policy", policy_id))?;
        let spec = policy.rollout.ok_or_else(|| {
            ReleaseError::Validation(format!("Policy {} has no rollout", policy_id))
        })?;
        let version = self
            .store
            .get_version(version_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("DeploymentVersion", version_id))?;

        let peers = self.peers(&ctx.target).await?;
        let records = self.store.list_approvals(&ctx.environment.id).await?;
        let rule = RolloutRule::new(spec, ctx.target.id, ctx.environment.id, peers)?
            .with_approvals(policy.approvals.clone(), records);
        Ok(rule.info(&version, Utc::now()))
    }

    async fn load(&self, id: &ReleaseTargetId) -> Result<TargetContext> {
        let target = self
            .store
            .get_release_target(id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("ReleaseTarget", id))?;
        let deployment = self
            .store
            .get_deployment(&target.deployment_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("Deployment", target.deployment_id))?;
        let environment = self
            .store
            .get_environment(&target.environment_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("Environment", target.environment_id))?;
        let resource = self
            .store
            .get_resource(&target.resource_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("Resource", target.resource_id))?;

        Ok(TargetContext {
            target,
            deployment,
            environment,
            resource,
        })
    }

    async fn candidates(&self, target: &ReleaseTarget) -> Result<Vec<DeploymentVersion>> {
        let mut versions = self
            .store
            .list_versions(
                &target.deployment_id,
                VersionStatus::Ready,
                self.config.candidate_limit,
            )
            .await?;

        // A pinned version outside the recency window still competes
        if let Some(pinned) = target.desired_version_id {
            if !versions.iter().any(|v| v.id == pinned) {
                if let Some(version) = self.store.get_version(&pinned).await? {
                    if version.deployment_id == target.deployment_id
                        && version.status == VersionStatus::Ready
                    {
                        versions.push(version);
                    }
                }
            }
        }
        Ok(versions)
    }

    async fn peers(&self, target: &ReleaseTarget) -> Result<Vec<ReleaseTargetId>> {
        Ok(self
            .store
            .list_release_targets_for(&target.environment_id, &target.deployment_id)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    async fn ensure_job(&self, ctx: &TargetContext, release: &ReleaseRecord) -> Result<(Job, bool)> {
        let overrides = &ctx.deployment.job_agent_config;
        let config = match ctx.deployment.job_agent_id {
            Some(agent_id) => match self.store.get_job_agent(&agent_id).await? {
                Some(agent) => agent.merged_config(overrides),
                None => overrides.clone(),
            },
            None => overrides.clone(),
        };

        let job = Job::pending(
            release.release.id,
            ctx.deployment.job_agent_id,
            config,
            JobReason::PolicyPassing,
        );
        let (job, created) = self.store.create_job_for_release_if_absent(job).await?;
        if created {
            info!(job_id = %job.id, release_id = %release.release.id, "Job created");
            self.emit(
                RudderEvent::JobCreated {
                    job_id: job.id,
                    release_id: release.release.id,
                },
                ctx.resource.workspace_id,
            );
        }
        Ok((job, created))
    }

    fn blocked(
        &self,
        ctx: &TargetContext,
        reason: String,
        rejections: BTreeMap<DeploymentVersionId, RejectionReason>,
    ) -> ReleaseEvaluation {
        debug!(reason = %reason, rejected = rejections.len(), "Evaluation blocked");
        self.emit(
            RudderEvent::EvaluationBlocked {
                release_target_id: ctx.target.id,
                reason: reason.clone(),
            },
            ctx.resource.workspace_id,
        );
        ReleaseEvaluation::Blocked { reason, rejections }
    }

    fn emit(&self, event: RudderEvent, workspace_id: WorkspaceId) {
        let envelope =
            RudderEventEnvelope::new(event, EventSource::Release).with_workspace(workspace_id);
        let _ = self.event_tx.send(envelope);
    }
}
