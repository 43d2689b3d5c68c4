//! The rebalancer: a background task that runs the job-redistribution
//! algorithm whenever membership changes, serialized so only
//! one rebalance is ever in flight, with additional triggers while one runs
//! coalescing into a single follow-up run.

use std::sync::Arc;

use hermes_common::store::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::membership::Registry;

/// Run the rebalancer loop until `cancel` fires. `trigger` is the receiving
/// end of the single-slot channel whose sender `Registry` holds: every
/// registration, unregistration, and heartbeat-expiry event feeds it.
pub async fn run(store: Store, registry: Arc<Registry>, mut trigger: mpsc::Receiver<()>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("rebalancer shutting down");
                return;
            }
            signal = trigger.recv() => {
                if signal.is_none() {
                    // All senders dropped: the registry is gone, nothing left to react to.
                    return;
                }

                let live_partitions = registry.live_partitions().await;
                match store.rebalance(&live_partitions).await {
                    Ok(report) => {
                        info!(
                            live_partitions = ?report.live_partitions,
                            total_live_jobs = report.total_live_jobs,
                            "rebalance complete"
                        );
                    }
                    Err(error) => {
                        // Log and continue: the next coalesced trigger retries.
                        error!(%error, "rebalance failed, will retry on next trigger");
                    }
                }
            }
        }
    }
}
