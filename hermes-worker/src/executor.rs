//! Executor: delivers claimed jobs as webhooks.
//!
//! Bounded-concurrency delivery of claimed jobs: each job gets up to
//! `max_retries + 1` attempts, backing off `2^i` seconds between them, and
//! retries only on transport failure or a server-error response. The
//! outcome is always recorded, win or lose.

use std::sync::Arc;

use health::HealthHandle;
use hermes_common::model::{Outcome, ScheduledJob};
use hermes_common::retry::RetryPolicy;
use hermes_common::store::Store;
use hermes_common::webhook::{build_request, is_retryable_status};
use tokio::sync::{mpsc, Semaphore};
use tracing::error;

use crate::error::WebhookError;

/// Drain claimed jobs off `job_rx` until the channel closes, dispatching up
/// to `concurrency` deliveries at once.
pub async fn run(
    store: Store,
    client: reqwest::Client,
    concurrency: usize,
    mut job_rx: mpsc::Receiver<ScheduledJob>,
    liveness: HealthHandle,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let policy = RetryPolicy::default();

    while let Some(job) = job_rx.recv().await {
        liveness.report_healthy().await;

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("executor semaphore is never closed");
        let store = store.clone();
        let client = client.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let outcome = deliver(&client, &job, policy).await;
            if let Err(error) = store.record_outcome(job.id, outcome).await {
                error!(job_id = %job.id, %error, "failed to record execution outcome");
            }
        });
    }

    // The monitor closed the channel (shutdown). Wait for every in-flight
    // delivery to finish recording its outcome before returning.
    let _ = semaphore.acquire_many(concurrency as u32).await;
}

async fn deliver(client: &reqwest::Client, job: &ScheduledJob, policy: RetryPolicy) -> Outcome {
    let attempts = job.max_retries.max(0) as u32 + 1;
    let mut last_status_code = 0;
    let mut last_message = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
        }

        let request = match build_request(client, job) {
            Ok(request) => request,
            Err(error) => return Outcome::fail(0, WebhookError::from(error).to_string()),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                last_status_code = status.as_u16() as i32;

                if !is_retryable_status(status) {
                    // Any non-retryable response is terminal Success,
                    // including 4xx — the system records the attempt rather
                    // than interpreting semantics.
                    return Outcome::success(last_status_code);
                }
                last_message = format!("server responded with {status}");
            }
            Err(error) => {
                last_status_code = 0;
                last_message = WebhookError::from(error).to_string();
            }
        }
    }

    Outcome::fail(last_status_code, last_message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn job_with_retries(max_retries: i16) -> ScheduledJob {
        ScheduledJob {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "job".into(),
            description: String::new(),
            url: "https://example.invalid/hook".into(),
            payload: b"{}".to_vec(),
            content_type: "application/json".into(),
            signature: None,
            run_at: Utc::now(),
            max_retries,
            status: hermes_common::model::JobStatus::Pending,
            partition: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn attempt_count_is_max_retries_plus_one() {
        let job = job_with_retries(2);
        assert_eq!(job.max_retries.max(0) as u32 + 1, 3);
    }

    #[test]
    fn negative_max_retries_still_attempts_once() {
        let job = job_with_retries(-1);
        assert_eq!(job.max_retries.max(0) as u32 + 1, 1);
    }
}
