use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

/// Membership-registry errors, independent of any HTTP framing.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MembershipError {
    #[error("worker {0} is not registered")]
    NotFound(String),
}

/// Errors surfaced by the HTTP handlers, mapped to status codes: typed
/// validation/not-found/auth errors become their HTTP status, anything
/// else becomes an opaque 500.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("missing or invalid X-API-KEY")]
    Auth,
    #[error("{0}")]
    NotFound(String),
    #[error("internal error")]
    Internal(#[from] hermes_common::store::StoreError),
}

impl From<MembershipError> for ApiError {
    fn from(error: MembershipError) -> Self {
        match error {
            MembershipError::NotFound(name) => ApiError::NotFound(name),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Auth => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Internal(error) => {
                tracing::error!("internal error handling request: {}", error);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
