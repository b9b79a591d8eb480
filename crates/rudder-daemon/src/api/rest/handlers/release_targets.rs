//! Release-target handlers

use super::parse_id;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use rudder_release::{RecomputeOutcome, ReleaseEvaluation};
use rudder_rules::{RejectionReason, RolloutInfo};
use rudder_types::{
    DeploymentVersionId, JobId, PolicyId, ReleaseId, ReleaseTargetId, SystemId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolve response
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolveResponse {
    Applied {
        created: Vec<ReleaseTargetId>,
        deleted: Vec<ReleaseTargetId>,
    },
    /// Another recompute was running; this one was queued behind it
    Requeued,
}

/// Recompute the release targets of a system
pub async fn resolve_release_targets(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResolveResponse>> {
    let system_id: SystemId = parse_id("system", &id)?;
    let response = match state.control.resolve_release_targets(&system_id).await? {
        RecomputeOutcome::Applied(diff) => ResolveResponse::Applied {
            created: diff.created.iter().map(|t| t.id).collect(),
            deleted: diff.deleted.iter().map(|t| t.id).collect(),
        },
        RecomputeOutcome::Requeued => ResolveResponse::Requeued,
    };
    Ok(Json(response))
}

/// Evaluate response
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluateResponse {
    Created {
        release_id: ReleaseId,
        version_id: DeploymentVersionId,
        job_id: JobId,
    },
    Unchanged {
        release_id: ReleaseId,
        version_id: DeploymentVersionId,
        job_id: Option<JobId>,
    },
    Blocked {
        reason: String,
        rejections: BTreeMap<DeploymentVersionId, RejectionReason>,
    },
}

impl From<ReleaseEvaluation> for EvaluateResponse {
    fn from(evaluation: ReleaseEvaluation) -> Self {
        match evaluation {
            ReleaseEvaluation::Created { release, job } => Self::Created {
                release_id: release.release.id,
                version_id: release.version.version_id,
                job_id: job.id,
            },
            ReleaseEvaluation::Unchanged {
                release,
                recovered_job,
            } => Self::Unchanged {
                release_id: release.release.id,
                version_id: release.version.version_id,
                job_id: recovered_job.map(|j| j.id),
            },
            ReleaseEvaluation::Blocked { reason, rejections } => {
                Self::Blocked { reason, rejections }
            }
        }
    }
}

/// Run one evaluation pass for a release target
pub async fn evaluate_release_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EvaluateResponse>> {
    let target_id: ReleaseTargetId = parse_id("release target", &id)?;
    let evaluation = state.control.evaluate(&target_id).await?;
    Ok(Json(evaluation.into()))
}

/// Rollout query parameters
#[derive(Debug, Deserialize)]
pub struct RolloutQuery {
    pub policy_id: String,
    pub version_id: String,
}

/// Rollout position and start of a target for one version
pub async fn get_rollout_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RolloutQuery>,
) -> ApiResult<Json<RolloutInfo>> {
    let target_id: ReleaseTargetId = parse_id("release target", &id)?;
    let policy_id: PolicyId = parse_id("policy", &query.policy_id)?;
    let version_id: DeploymentVersionId = parse_id("version", &query.version_id)?;
    let info = state
        .control
        .get_rollout_info(&target_id, &policy_id, &version_id)
        .await?;
    Ok(Json(info))
}
