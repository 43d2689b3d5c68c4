//! The coordinator: accepts job submissions, tracks live workers, and runs
//! the background rebalancer.

use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use health::HealthRegistry;
use hermes_common::metrics::{serve, setup_metrics_router};
use hermes_common::store::Store;
use tokio_util::sync::CancellationToken;

use tracing_subscriber::EnvFilter;

use config::Config;
use membership::Registry;

mod config;
mod error;
mod handlers;
mod jobs;
mod membership;
mod rebalance;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Store,
    pub api_key: Arc<String>,
}

#[cfg(test)]
impl AppState {
    /// Build an `AppState` wired to a test database pool, with a detached
    /// rebalancer (signals are dropped, not acted on) since handler tests
    /// exercise the HTTP surface, not the background rebalance loop.
    pub fn for_test(pool: sqlx::PgPool) -> Self {
        let store = Store::from_pool(pool);
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let registry = Registry::new(store.clone(), std::time::Duration::from_secs(10), tx);
        Self {
            registry,
            store,
            api_key: Arc::new("test-key".to_owned()),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid configuration");

    let default_directive = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .init();

    let store = Store::new(&config.dsn, config.max_pg_connections)
        .await
        .expect("failed to connect to store");

    let liveness = HealthRegistry::new("liveness");
    let coordinator_liveness = liveness
        .register("coordinator".to_owned(), time::Duration::seconds(60))
        .await;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(20));
        loop {
            ticker.tick().await;
            coordinator_liveness.report_healthy().await;
        }
    });

    let shutdown = CancellationToken::new();

    // The registry holds the trigger's sender (registration/heartbeat-expiry
    // events feed it); the rebalancer owns the receiver.
    let (trigger_tx, trigger_rx) = tokio::sync::mpsc::channel(1);
    let registry = Registry::new(store.clone(), config.heartbeat_interval.0, trigger_tx);
    tokio::spawn(rebalance::run(
        store.clone(),
        Arc::clone(&registry),
        trigger_rx,
        shutdown.clone(),
    ));

    let state = AppState {
        registry,
        store,
        api_key: Arc::new(config.internal_api_key.clone()),
    };

    let app = handlers::router(state)
        .route("/_readiness", get(|| ready("ok")))
        .route(
            "/_liveness",
            get(move || ready(liveness.get_status())),
        );
    let app = setup_metrics_router().merge(app);

    let bind = config.bind();
    tracing::info!(bind = bind.as_str(), "coordinator listening");

    serve(app, &bind).await.expect("coordinator HTTP server failed");
}
