//! Health handler

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,

    /// `None` when the queue could not be read
    pub pending_tasks: Option<usize>,
    pub dead_letters: Option<usize>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let pending_tasks = state.control.queue().pending().await.ok();
    let dead_letters = state.control.dead_letters().await.ok().map(|d| d.len());
    let status = if pending_tasks.is_some() && dead_letters.is_some() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthCheckResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        pending_tasks,
        dead_letters,
    })
}
