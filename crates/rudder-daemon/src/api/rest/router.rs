//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Release targets
        .route(
            "/systems/:id/release-targets/resolve",
            post(handlers::resolve_release_targets),
        )
        .route(
            "/release-targets/:id/evaluate",
            post(handlers::evaluate_release_target),
        )
        .route("/release-targets/:id/rollout", get(handlers::get_rollout_info))
        // Jobs
        .route("/jobs/:id", get(handlers::get_job))
        // Webhooks
        .route(
            "/webhooks/github/workflow-run",
            post(handlers::github_workflow_run),
        );

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http());

    let router = if server.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
