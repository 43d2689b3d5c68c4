//! Partition membership tracking.
//!
//! `Registry` is the coordinator's in-memory map of live workers. It is the
//! source of truth for *membership*; `hermes_common::store::Store` is the
//! source of truth for *jobs*. The two are reconciled by rebalance.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hermes_common::model::ORPHAN_PARTITION;
use hermes_common::store::Store;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::MembershipError;

struct WorkerMeta {
    partition: i32,
    registered_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    cancel: CancellationToken,
}

pub struct Registry {
    workers: RwLock<HashMap<String, WorkerMeta>>,
    next_partition: std::sync::atomic::AtomicI32,
    heartbeat_interval: Duration,
    up_since: DateTime<Utc>,
    store: Store,
    rebalance_trigger: mpsc::Sender<()>,
}

impl Registry {
    pub fn new(store: Store, heartbeat_interval: Duration, rebalance_trigger: mpsc::Sender<()>) -> Arc<Self> {
        Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
            next_partition: std::sync::atomic::AtomicI32::new(ORPHAN_PARTITION),
            heartbeat_interval,
            up_since: Utc::now(),
            store,
            rebalance_trigger,
        })
    }

    /// Registers `name`, returning its assigned partition. Idempotent: a
    /// known name refreshes its heartbeat and returns its existing
    /// partition.
    pub async fn register(self: &Arc<Self>, name: &str) -> i32 {
        {
            let mut workers = self.workers.write().await;
            if let Some(meta) = workers.get_mut(name) {
                // A duplicate registration is just a heartbeat refresh: no
                // membership change occurred, so unlike a brand new
                // registration it does not trigger a rebalance.
                meta.last_heartbeat_at = Utc::now();
                return meta.partition;
            }
        }

        let partition = self
            .next_partition
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let cancel = CancellationToken::new();

        {
            let mut workers = self.workers.write().await;
            workers.insert(
                name.to_owned(),
                WorkerMeta {
                    partition,
                    registered_at: Utc::now(),
                    last_heartbeat_at: Utc::now(),
                    cancel: cancel.clone(),
                },
            );
        }

        let registry = Arc::clone(self);
        let worker_name = name.to_owned();
        let heartbeat_interval = self.heartbeat_interval;
        tokio::spawn(async move {
            registry
                .run_heartbeat_monitor(worker_name, heartbeat_interval, cancel)
                .await;
        });

        info!(name, partition, "worker registered");
        self.trigger_rebalance();
        partition
    }

    /// Unregisters `name`. Fires the worker's cancellation handle; the
    /// monitor task owns removing the entry and triggering rebalance — a
    /// caller never reaches into the map from outside the monitor task.
    /// No-op if `name` is unknown.
    pub async fn unregister(&self, name: &str) {
        let workers = self.workers.read().await;
        if let Some(meta) = workers.get(name) {
            meta.cancel.cancel();
        }
    }

    /// Refreshes `name`'s last-heartbeat timestamp, or reports it unknown.
    pub async fn heartbeat(&self, name: &str) -> Result<(), MembershipError> {
        let mut workers = self.workers.write().await;
        match workers.get_mut(name) {
            Some(meta) => {
                meta.last_heartbeat_at = Utc::now();
                Ok(())
            }
            None => Err(MembershipError::NotFound(name.to_owned())),
        }
    }

    /// Holds the registry's read lock for the duration of `f`, so a
    /// pick-then-insert sequence observes a consistent membership snapshot
    /// throughout.
    pub async fn with_pick<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(i32) -> Fut,
        Fut: Future<Output = T>,
    {
        let workers = self.workers.read().await;
        let partition = pick_from(&workers);
        f(partition).await
    }

    /// Picks a live partition on its own, for callers that do not need the
    /// lock held across a follow-up operation.
    pub async fn pick(&self) -> i32 {
        let workers = self.workers.read().await;
        pick_from(&workers)
    }

    pub async fn live_partitions(&self) -> Vec<i32> {
        let workers = self.workers.read().await;
        workers.values().map(|meta| meta.partition).collect()
    }

    pub async fn active_workers(&self) -> usize {
        self.workers.read().await.len()
    }

    pub fn up_since(&self) -> DateTime<Utc> {
        self.up_since
    }

    pub async fn db_ok(&self) -> bool {
        self.store.ping().await
    }

    fn trigger_rebalance(&self) {
        // Non-blocking: a pending signal means a rebalance is already
        // queued, so further triggers coalesce into that one run.
        let _ = self.rebalance_trigger.try_send(());
    }

    async fn run_heartbeat_monitor(
        self: Arc<Self>,
        name: String,
        heartbeat_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        let timeout = chrono::Duration::from_std(heartbeat_interval * 2)
            .expect("heartbeat interval fits in a chrono::Duration");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(name = name.as_str(), "worker unregistered");
                    self.workers.write().await.remove(&name);
                    self.trigger_rebalance();
                    return;
                }
                _ = ticker.tick() => {
                    let expired = match self.workers.read().await.get(&name) {
                        Some(meta) => Utc::now() - meta.last_heartbeat_at > timeout,
                        None => true,
                    };
                    if expired {
                        warn!(name = name.as_str(), "worker heartbeat expired, removing from registry");
                        self.workers.write().await.remove(&name);
                        self.trigger_rebalance();
                        return;
                    }
                }
            }
        }
    }
}

fn pick_from(workers: &HashMap<String, WorkerMeta>) -> i32 {
    if workers.is_empty() {
        return ORPHAN_PARTITION;
    }

    let index = rand::thread_rng().gen_range(0..workers.len());
    workers.values().nth(index).expect("index within bounds").partition
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_common::store::Store;

    async fn test_registry() -> Arc<Registry> {
        // A Store that is never actually queried in these tests: registry
        // bookkeeping alone does not touch the database.
        let store = Store::from_pool(
            sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/nonexistent").unwrap(),
        );
        let (tx, _rx) = mpsc::channel(1);
        Registry::new(store, Duration::from_millis(10), tx)
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = test_registry().await;
        let first = registry.register("worker-a").await;
        let second = registry.register("worker-a").await;
        assert_eq!(first, second);
        assert_eq!(registry.active_workers().await, 1);
    }

    #[tokio::test]
    async fn register_allocates_distinct_increasing_partitions() {
        let registry = test_registry().await;
        let a = registry.register("worker-a").await;
        let b = registry.register("worker-b").await;
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[tokio::test]
    async fn heartbeat_unknown_worker_is_not_found() {
        let registry = test_registry().await;
        let result = registry.heartbeat("ghost").await;
        assert_eq!(result, Err(MembershipError::NotFound("ghost".to_owned())));
    }

    #[tokio::test]
    async fn pick_is_zero_when_empty() {
        let registry = test_registry().await;
        assert_eq!(registry.pick().await, ORPHAN_PARTITION);
    }

    #[tokio::test]
    async fn unregister_removes_worker_eventually() {
        let registry = test_registry().await;
        registry.register("worker-a").await;
        registry.unregister("worker-a").await;

        // The monitor task performs the removal asynchronously off of the
        // cancellation signal; give it a moment to run.
        for _ in 0..20 {
            if registry.active_workers().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.active_workers().await, 0);
    }
}
