use axum::routing::{delete, get, post};
use axum::Router;

use crate::AppState;

pub mod auth;
pub mod health;
pub mod scheduled_jobs;
pub mod workers;

/// Worker-facing routes run behind the `X-API-KEY` middleware;
/// `/api/v1/health` does not, since it is a public liveness surface.
pub fn router(state: AppState) -> Router {
    let worker_routes = Router::new()
        .route("/api/v1/workers", post(workers::register))
        .route("/api/v1/workers/:name", delete(workers::unregister))
        .route("/api/v1/workers/:name/health", post(workers::heartbeat))
        .route("/api/v1/scheduledJobs", post(scheduled_jobs::create))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/api/v1/health", get(health::get))
        .merge(worker_routes)
        .with_state(state)
}
