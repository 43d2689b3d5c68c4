use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub server_up_since: DateTime<Utc>,
    pub workers_healthy: usize,
    pub db_healthy: bool,
}

/// `GET /api/v1/health`.
pub async fn get(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        server_up_since: state.registry.up_since(),
        workers_healthy: state.registry.active_workers().await,
        db_healthy: state.registry.db_ok().await,
    })
}
