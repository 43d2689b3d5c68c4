use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub partition: i32,
}

/// `POST /api/v1/workers`.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    let partition = state.registry.register(&body.name).await;
    Json(RegisterResponse { partition })
}

/// `DELETE /api/v1/workers/:name`.
pub async fn unregister(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    state.registry.unregister(&name).await;
    StatusCode::OK
}

/// `POST /api/v1/workers/:name/health`.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.heartbeat(&name).await?;
    Ok(StatusCode::OK)
}
