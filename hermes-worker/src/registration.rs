//! HTTP client for registering with, and heartbeating, the coordinator.
//!
//! A small wrapper around a shared `reqwest::Client`, retrying transient
//! failures with the same exponential backoff the executor uses for
//! webhooks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RegistrationError;

const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct CoordinatorClient {
    client: reqwest::Client,
    node: String,
    api_key: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    partition: i32,
}

impl CoordinatorClient {
    pub fn new(client: reqwest::Client, node: String, api_key: String) -> Self {
        Self {
            client,
            node,
            api_key,
        }
    }

    /// `POST /api/v1/workers`, returning the partition assigned.
    pub async fn register(&self, worker_name: &str) -> Result<i32, RegistrationError> {
        let body = RegisterRequest { name: worker_name };
        let response = self
            .send_with_retry(|| {
                self.client
                    .post(format!("{}/api/v1/workers", self.node))
                    .header("x-api-key", &self.api_key)
                    .json(&body)
            })
            .await?;

        let parsed: RegisterResponse = response
            .json()
            .await
            .map_err(RegistrationError::Transport)?;
        Ok(parsed.partition)
    }

    /// `DELETE /api/v1/workers/:name`.
    pub async fn unregister(&self, worker_name: &str) -> Result<(), RegistrationError> {
        self.send_with_retry(|| {
            self.client
                .delete(format!("{}/api/v1/workers/{}", self.node, worker_name))
                .header("x-api-key", &self.api_key)
        })
        .await?;
        Ok(())
    }

    /// `POST /api/v1/workers/:name/health`.
    pub async fn heartbeat(&self, worker_name: &str) -> Result<(), RegistrationError> {
        self.send_with_retry(|| {
            self.client
                .post(format!("{}/api/v1/workers/{}/health", self.node, worker_name))
                .header("x-api-key", &self.api_key)
        })
        .await?;
        Ok(())
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RegistrationError> {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }

            match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    warn!(%status, attempt, "coordinator rejected request");
                    let retryable = status.is_server_error();
                    last_error = Some(RegistrationError::Rejected(status));
                    if !retryable {
                        break;
                    }
                }
                Err(error) => {
                    warn!(%error, attempt, "failed to reach coordinator");
                    last_error = Some(RegistrationError::Transport(error));
                }
            }
        }

        Err(last_error.expect("loop runs at least once"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_stores_node_and_key() {
        let client = CoordinatorClient::new(
            reqwest::Client::new(),
            "http://localhost:3300".to_string(),
            "dev-key".to_string(),
        );
        assert_eq!(client.node, "http://localhost:3300");
        assert_eq!(client.api_key, "dev-key");
    }
}
