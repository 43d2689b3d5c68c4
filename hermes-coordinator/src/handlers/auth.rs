//! Worker-facing routes require `X-API-KEY`: a plain
//! `axum::middleware::from_fn_with_state` over the request, no framework
//! beyond a header-equality check. Key hashing/generation lives elsewhere.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::AppState;

const API_KEY_HEADER: &str = "x-api-key";

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if key == state.api_key.as_str() => Ok(next.run(request).await),
        _ => Err(ApiError::Auth),
    }
}
