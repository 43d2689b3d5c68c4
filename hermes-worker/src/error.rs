use hermes_common::store::StoreError;
use hermes_common::webhook::WebhookBuildError;
use thiserror::Error;

/// Errors related to delivering one webhook attempt.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("could not build request: {0}")]
    Build(#[from] WebhookBuildError),
    #[error("transport error sending request: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors related to registering with, and heartbeating, the coordinator.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("coordinator rejected registration: {0}")]
    Rejected(reqwest::StatusCode),
    #[error("request to coordinator failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Fatal worker-process errors: any of these
/// terminate the worker non-zero, relying on external supervision to
/// restart it and on the coordinator's heartbeat check to reclaim the
/// lost partition's jobs.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a store error occurred")]
    Store(#[from] StoreError),
    #[error("failed to register with the coordinator: {0}")]
    Registration(#[from] RegistrationError),
    #[error("lost the change-listener subscription: {0}")]
    Listener(StoreError),
}
