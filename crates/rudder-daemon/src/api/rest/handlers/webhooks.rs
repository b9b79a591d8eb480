//! Inbound webhook handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use rudder_control::ExternalUpdateOutcome;
use rudder_dispatch::WorkflowRunEvent;

/// GitHub `workflow_run` webhook
///
/// Updates the one job named by the run; an unknown job is a 404.
pub async fn github_workflow_run(
    State(state): State<AppState>,
    Json(event): Json<WorkflowRunEvent>,
) -> ApiResult<Json<ExternalUpdateOutcome>> {
    let outcome = state
        .control
        .on_external_status_update(&event.workflow_run)
        .await?;

    tracing::info!(
        run_id = event.workflow_run.id,
        action = event.action.as_deref().unwrap_or("-"),
        job_id = %outcome.job.id,
        "Workflow run applied"
    );
    Ok(Json(outcome))
}
