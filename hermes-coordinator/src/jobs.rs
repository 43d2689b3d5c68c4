//! Job submission.
//!
//! The HTTP handler validates and decodes the request body; this module
//! implements the coordination protocol step itself: hold the membership
//! read lock, pick a partition, insert, notify, release.

use hermes_common::model::{NewScheduledJob, ScheduledJob};
use hermes_common::store::{Store, StoreError};

use crate::membership::Registry;

/// Submit `job`, assigning it a partition under the registry's read lock
/// and notifying that partition once the row is durable.
pub async fn submit(
    registry: &Registry,
    store: &Store,
    job: NewScheduledJob,
) -> Result<ScheduledJob, StoreError> {
    registry
        .with_pick(|partition| async move {
            let persisted = store.insert_job(job, partition).await?;
            store.notify_partition(partition).await?;
            Ok(persisted)
        })
        .await
}
