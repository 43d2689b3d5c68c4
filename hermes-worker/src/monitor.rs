//! Monitor: the claim loop.
//!
//! Converts a stream of "check now" pulses into claimed jobs forwarded to
//! the executor. Each iteration claims a batch, hands it off to the
//! executor channel in the background (so channel backpressure never delays
//! resetting the timer), and computes the next wake time from the
//! following row due.

use std::time::Duration;

use chrono::Utc;
use health::HealthHandle;
use hermes_common::model::ScheduledJob;
use hermes_common::store::{Store, StoreError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Clamp the minimum sleep so a monitor that claimed every due candidate
/// doesn't busy-loop on an immediate next wake.
const MIN_SLEEP: Duration = Duration::from_millis(50);

#[allow(clippy::too_many_arguments)]
pub async fn run(
    store: Store,
    partition: i32,
    batch_size: i64,
    default_wait: Duration,
    mut pulse_rx: watch::Receiver<()>,
    job_tx: mpsc::Sender<ScheduledJob>,
    cancel: CancellationToken,
    liveness: HealthHandle,
) -> Result<(), StoreError> {
    let mut wait = default_wait;
    let mut last_claimed_run_at = Utc::now();
    let mut pending_push: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        liveness.report_healthy().await;

        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(handle) = pending_push.take() {
                    let _ = handle.await;
                }
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
            _ = pulse_rx.changed() => {}
        }

        // The monitor must finish the previous push before issuing the next
        // claim, even though the push itself runs in
        // the background so it never delays the timer reset below.
        if let Some(handle) = pending_push.take() {
            let _ = handle.await;
        }

        let claimed = store
            .claim_due_jobs(partition, batch_size, Utc::now())
            .await?;
        debug!(partition, claimed = claimed.len(), "claimed batch");

        if let Some(last) = claimed.last() {
            last_claimed_run_at = last.run_at;
        }

        if !claimed.is_empty() {
            let tx = job_tx.clone();
            pending_push = Some(tokio::spawn(async move {
                for job in claimed {
                    if tx.send(job).await.is_err() {
                        // Executor side closed; nothing left to do but stop forwarding.
                        break;
                    }
                }
            }));
        }

        wait = match store
            .peek_next_run_at(partition, last_claimed_run_at)
            .await?
        {
            Some(next_run_at) => (next_run_at - Utc::now())
                .to_std()
                .unwrap_or(MIN_SLEEP)
                .max(MIN_SLEEP),
            None => default_wait,
        };
    }
}
