//! Job handlers

use super::parse_id;
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    Json,
};
use rudder_types::{Job, JobId};

/// Get a job
pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    let job_id: JobId = parse_id("job", &id)?;
    Ok(Json(state.control.get_job(&job_id).await?))
}
