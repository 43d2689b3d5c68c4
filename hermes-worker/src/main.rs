//! The worker: claims due jobs for its assigned partition and delivers them
//! as webhooks, listening for rebalance pulses and
//! heartbeating the coordinator the whole time it runs.

use std::future::ready;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use health::HealthRegistry;
use hermes_common::metrics::{serve, setup_metrics_router};
use hermes_common::store::Store;
use tokio_util::sync::CancellationToken;

use tracing_subscriber::EnvFilter;

use config::Config;
use error::WorkerError;
use registration::CoordinatorClient;

mod config;
mod error;
mod executor;
mod listener;
mod monitor;
mod registration;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let config = Config::init_from_env().expect("invalid configuration");
    let worker_name = config.worker_name();

    let default_directive = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    let store = Store::new(&config.dsn, config.max_pg_connections).await?;

    let http_client = reqwest::Client::builder()
        .timeout(config.request_timeout.0)
        .build()
        .expect("failed to build HTTP client");

    let coordinator = CoordinatorClient::new(
        http_client.clone(),
        config.node.clone(),
        config.internal_api_key.as_str().to_owned(),
    );

    let partition = coordinator.register(&worker_name).await?;
    tracing::info!(worker_name = worker_name.as_str(), partition, "registered with coordinator");

    let liveness = HealthRegistry::new("liveness");
    let monitor_liveness = liveness
        .register("worker-monitor".to_owned(), time::Duration::seconds(60))
        .await;
    let executor_liveness = liveness
        .register("worker-executor".to_owned(), time::Duration::seconds(60))
        .await;

    let shutdown = CancellationToken::new();

    let (pulse_tx, pulse_rx) = listener::channel();
    let (job_tx, job_rx) = tokio::sync::mpsc::channel(config.batch_size as usize);

    {
        let store = store.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                result = listener::run(&store, partition, pulse_tx) => {
                    if let Err(error) = result {
                        let error = WorkerError::Listener(error);
                        tracing::error!(%error, "lost the change-listener subscription, exiting");
                        std::process::exit(1);
                    }
                }
            }
        });
    }

    let monitor_handle = tokio::spawn(monitor::run(
        store.clone(),
        partition,
        config.batch_size,
        config.poll_default_wait.0,
        pulse_rx,
        job_tx,
        shutdown.clone(),
        monitor_liveness,
    ));

    let executor_handle = tokio::spawn(executor::run(
        store.clone(),
        http_client.clone(),
        config.worker_threads,
        job_rx,
        executor_liveness,
    ));

    {
        let coordinator = coordinator.clone();
        let worker_name = worker_name.clone();
        let heartbeat_interval = config.heartbeat_interval.0;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(error) = coordinator.heartbeat(&worker_name).await {
                            tracing::warn!(%error, "heartbeat to coordinator failed");
                        }
                    }
                }
            }
        });
    }

    let app = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let app = setup_metrics_router().merge(app);
    let bind = config.bind();
    tokio::spawn(async move {
        serve(app, &bind).await.expect("failed to serve metrics/health");
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("shutting down");
    shutdown.cancel();

    let _ = monitor_handle.await;
    let _ = executor_handle.await;

    if let Err(error) = coordinator.unregister(&worker_name).await {
        tracing::warn!(%error, "failed to unregister from coordinator");
    }

    Ok(())
}

pub async fn index() -> &'static str {
    "hermeshooks worker"
}
