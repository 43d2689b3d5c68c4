use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hermes_common::model::NewScheduledJob;

use crate::error::ApiError;
use crate::{jobs, AppState};

/// Body of `POST /api/v1/scheduledJobs`. Payload validation lives with the
/// caller; this handler trusts its input and focuses on the submission
/// protocol itself.
#[derive(Deserialize)]
pub struct ScheduledJobRequest {
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    #[serde(default)]
    pub signature: Option<String>,
    pub run_at: DateTime<Utc>,
    #[serde(default)]
    pub max_retries: i16,
}

#[derive(Serialize)]
pub struct ScheduledJobResponse {
    pub uuid: Uuid,
}

/// `POST /api/v1/scheduledJobs`.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<ScheduledJobRequest>,
) -> Result<(StatusCode, Json<ScheduledJobResponse>), ApiError> {
    let job = NewScheduledJob {
        owner_id: body.owner_id,
        name: body.name,
        description: body.description,
        url: body.url,
        payload: body.payload,
        content_type: body.content_type,
        signature: body.signature,
        run_at: body.run_at,
        max_retries: body.max_retries,
    };

    let persisted = jobs::submit(&state.registry, &state.store, job).await?;

    Ok((
        StatusCode::CREATED,
        Json(ScheduledJobResponse { uuid: persisted.id }),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{self, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::handlers::router;
    use crate::AppState;

    use super::*;

    #[sqlx::test(migrations = "../migrations")]
    async fn submit_persists_job_and_returns_its_uuid(pool: sqlx::PgPool) {
        let state = AppState::for_test(pool.clone());
        let app = router(state);

        let body = serde_json::json!({
            "owner_id": Uuid::new_v4(),
            "name": "example-hook",
            "url": "https://example.test/hook",
            "payload": [1, 2, 3],
            "content_type": "application/json",
            "run_at": Utc::now().to_rfc3339(),
            "max_retries": 1,
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/api/v1/scheduledJobs")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .header("x-api-key", "test-key")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: ScheduledJobResponse = serde_json::from_slice(&body).unwrap();

        let row: (String, i32) =
            sqlx::query_as("SELECT status::text, partition FROM scheduled_jobs WHERE id = $1")
                .bind(parsed.uuid)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(row.0, "scheduled");
        assert_eq!(row.1, 0, "no workers registered, so it lands on the orphan partition");
    }
}
