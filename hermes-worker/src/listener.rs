//! Change-listener.
//!
//! Subscribes to the store's `jobs:rebalance` channel and forwards a
//! non-blocking pulse to the monitor whenever a notification names this
//! worker's partition. `tokio::sync::watch` gives us the single-slot,
//! coalescing semantics we want: a new pulse overwrites one the
//! monitor hasn't consumed yet, and `changed()` never queues more than one
//! pending wakeup.

use futures::StreamExt;
use hermes_common::store::{Store, StoreError};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Build the single-slot pulse channel shared with the monitor.
pub fn channel() -> (watch::Sender<()>, watch::Receiver<()>) {
    watch::channel(())
}

/// Run until the subscription breaks. A broken
/// subscription is fatal: the caller should let this error terminate the
/// worker process so external supervision can restart it.
pub async fn run(store: &Store, partition: i32, pulse_tx: watch::Sender<()>) -> Result<(), StoreError> {
    let stream = store.listen().await?;
    let mut stream = Box::pin(stream);

    loop {
        match stream.next().await {
            Some(Ok(notification)) => {
                if notification.partition == partition {
                    debug!(partition, "change notification, pulsing monitor");
                    // `send` only fails if every receiver has been dropped,
                    // which happens during worker shutdown.
                    let _ = pulse_tx.send(());
                } else {
                    debug!(
                        notified_partition = notification.partition,
                        partition, "ignoring notification for another partition"
                    );
                }
            }
            Some(Err(error)) => return Err(error),
            None => {
                warn!("change-listener stream ended unexpectedly");
                return Err(StoreError::Connection(sqlx::Error::PoolClosed));
            }
        }
    }
}
