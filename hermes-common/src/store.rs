//! `Store` — the Postgres-backed persistence and notification layer shared
//! by the coordinator and the worker.
//!
//! A thin wrapper around a `sqlx::PgPool` exposing typed operations, each
//! one either a single statement or a single transaction, never leaking
//! `sqlx` types past its own boundary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Execution, JobStatus, NewScheduledJob, Outcome, ScheduledJob, ORPHAN_PARTITION};

/// Pub/sub channel carrying rebalance notifications.
pub const REBALANCE_CHANNEL: &str = "jobs:rebalance";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(sqlx::Error),
    #[error("{command} query failed: {error}")]
    Query { command: &'static str, error: sqlx::Error },
    #[error("failed to (de)serialize notification payload: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Query {
            command: "query",
            error,
        }
    }
}

/// Payload of a `jobs:rebalance` notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RebalanceNotification {
    pub partition: i32,
}

/// Outcome of one rebalance pass, surfaced for logging/tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    pub live_partitions: Vec<i32>,
    pub total_live_jobs: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn new(dsn: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await
            .map_err(StoreError::Connection)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Coordinator health accessor: is the store reachable right now.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Persist a brand new job with its assigned partition.
    pub async fn insert_job(
        &self,
        job: NewScheduledJob,
        partition: i32,
    ) -> Result<ScheduledJob, StoreError> {
        let row = sqlx::query_as::<_, ScheduledJob>(
            r#"
INSERT INTO scheduled_jobs
    (id, owner_id, name, description, url, payload, content_type, signature,
     run_at, max_retries, status, partition, created_at, updated_at)
VALUES
    (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, $9, 'scheduled', $10, now(), now())
RETURNING *
            "#,
        )
        .bind(job.owner_id)
        .bind(job.name)
        .bind(job.description)
        .bind(job.url)
        .bind(job.payload)
        .bind(job.content_type)
        .bind(job.signature)
        .bind(job.run_at)
        .bind(job.max_retries)
        .bind(partition)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| StoreError::Query {
            command: "INSERT",
            error,
        })?;

        Ok(row)
    }

    /// `SELECT pg_notify(...)` on the rebalance channel.
    pub async fn notify_partition(&self, partition: i32) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&RebalanceNotification { partition })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(REBALANCE_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Query {
                command: "NOTIFY",
                error,
            })?;
        Ok(())
    }

    /// Subscribe to the rebalance channel. The caller filters
    /// notifications by partition; this just decodes the raw payloads.
    pub async fn listen(
        &self,
    ) -> Result<impl Stream<Item = Result<RebalanceNotification, StoreError>>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(StoreError::Connection)?;
        listener
            .listen(REBALANCE_CHANNEL)
            .await
            .map_err(StoreError::Connection)?;

        Ok(async_stream::stream! {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        yield serde_json::from_str::<RebalanceNotification>(notification.payload())
                            .map_err(StoreError::from);
                    }
                    Err(error) => {
                        yield Err(StoreError::Connection(error));
                        return;
                    }
                }
            }
        })
    }

    /// Claim up to `batch_size` due rows for `partition`,
    /// ordered by `run_at`, flipping them to `Pending` in the same
    /// transaction.
    pub async fn claim_due_jobs(
        &self,
        partition: i32,
        batch_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduledJob>(
            r#"
WITH due AS (
    SELECT id
    FROM scheduled_jobs
    WHERE partition = $1
      AND status = 'scheduled'
      AND run_at <= $2
    ORDER BY run_at ASC
    LIMIT $3
    FOR UPDATE SKIP LOCKED
)
UPDATE scheduled_jobs
SET status = 'pending', updated_at = now()
FROM due
WHERE scheduled_jobs.id = due.id
RETURNING scheduled_jobs.*
            "#,
        )
        .bind(partition)
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::Query {
            command: "UPDATE",
            error,
        })?;

        Ok(rows)
    }

    /// The next due run_at for this partition, used by the
    /// monitor to size its sleep. `after` is the last claimed run_at.
    pub async fn peek_next_run_at(
        &self,
        partition: i32,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
SELECT run_at
FROM scheduled_jobs
WHERE partition = $1 AND status = 'scheduled' AND run_at >= $2
ORDER BY run_at ASC
LIMIT 1
            "#,
        )
        .bind(partition)
        .bind(after)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StoreError::Query {
            command: "SELECT",
            error,
        })?;

        Ok(row.map(|(run_at,)| run_at))
    }

    /// Record the outcome of one executor pass: update the
    /// job's status and append one `Execution` row, in a single transaction.
    pub async fn record_outcome(
        &self,
        job_id: Uuid,
        outcome: Outcome,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Connection)?;

        sqlx::query("UPDATE scheduled_jobs SET status = $1, updated_at = now() WHERE id = $2")
            .bind(outcome.status)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|error| StoreError::Query {
                command: "UPDATE",
                error,
            })?;

        sqlx::query(
            "INSERT INTO executions (scheduled_job_id, status_code, message, created_at) \
             VALUES ($1, $2, $3, now())",
        )
        .bind(job_id)
        .bind(outcome.status_code)
        .bind(outcome.message)
        .execute(&mut *tx)
        .await
        .map_err(|error| StoreError::Query {
            command: "INSERT",
            error,
        })?;

        tx.commit().await.map_err(StoreError::Connection)?;
        Ok(())
    }

    /// The rebalance algorithm, run inside a single
    /// transaction. `live_partitions` is the membership registry's
    /// snapshot of set `A`, taken by the caller under its read lock.
    ///
    /// Steps 5 and 6 only move rows with `status = 'scheduled'`: a
    /// `Pending` row on a still-live partition is actively owned by that
    /// partition's executor and must not be reassigned out from under it.
    /// `Pending` rows only move in step 2, when their owning partition has
    /// died entirely.
    pub async fn rebalance(&self, live_partitions: &[i32]) -> Result<RebalanceReport, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Connection)?;

        reclaim_stranded(&mut tx, live_partitions).await?;

        if live_partitions.is_empty() {
            tx.commit().await.map_err(StoreError::Connection)?;
            return Ok(RebalanceReport::default());
        }

        let counts = live_job_counts(&mut tx).await?;
        let total: i64 = counts.values().sum();
        let per_bucket = total / live_partitions.len() as i64;

        let to_add: Vec<(i32, i64)> = live_partitions
            .iter()
            .map(|&p| (p, per_bucket - counts.get(&p).copied().unwrap_or(0)))
            .collect();

        for &(partition, add) in &to_add {
            if add < 0 {
                move_n_scheduled(&mut tx, partition, ORPHAN_PARTITION, -add).await?;
            }
        }

        let growers: Vec<(i32, i64)> = to_add.into_iter().filter(|&(_, add)| add > 0).collect();
        for (index, &(partition, add)) in growers.iter().enumerate() {
            if index + 1 == growers.len() {
                move_all_scheduled(&mut tx, ORPHAN_PARTITION, partition).await?;
            } else {
                move_n_scheduled(&mut tx, ORPHAN_PARTITION, partition, add).await?;
            }
        }

        for &partition in live_partitions {
            let payload = serde_json::to_string(&RebalanceNotification { partition })?;
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(REBALANCE_CHANNEL)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(|error| StoreError::Query {
                    command: "NOTIFY",
                    error,
                })?;
        }

        tx.commit().await.map_err(StoreError::Connection)?;

        Ok(RebalanceReport {
            live_partitions: live_partitions.to_vec(),
            total_live_jobs: total,
        })
    }
}

/// Reclaim rows stranded on a partition that is no longer live.
async fn reclaim_stranded(
    tx: &mut Transaction<'_, Postgres>,
    live_partitions: &[i32],
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
UPDATE scheduled_jobs
SET partition = 0, status = 'scheduled', updated_at = now()
WHERE NOT (partition = ANY($1))
  AND partition <> 0
  AND status IN ('scheduled', 'pending')
        "#,
    )
    .bind(live_partitions)
    .execute(&mut **tx)
    .await
    .map_err(|error| StoreError::Query {
        command: "UPDATE",
        error,
    })?;

    Ok(())
}

/// Per-partition counts of all not-yet-terminal rows,
/// including orphans (partition 0) — the orphan count feeds `total` even
/// though partition 0 itself is never a rebalance target.
async fn live_job_counts(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<HashMap<i32, i64>, StoreError> {
    let rows: Vec<(i32, i64)> = sqlx::query_as(
        "SELECT partition, count(*) FROM scheduled_jobs WHERE status IN ('scheduled', 'pending') GROUP BY partition",
    )
    .fetch_all(&mut **tx)
    .await
    .map_err(|error| StoreError::Query {
        command: "SELECT",
        error,
    })?;

    Ok(rows.into_iter().collect())
}

async fn move_n_scheduled(
    tx: &mut Transaction<'_, Postgres>,
    from: i32,
    to: i32,
    n: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
WITH to_move AS (
    SELECT id FROM scheduled_jobs
    WHERE partition = $1 AND status = 'scheduled'
    ORDER BY id
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
UPDATE scheduled_jobs
SET partition = $3, updated_at = now()
FROM to_move
WHERE scheduled_jobs.id = to_move.id
        "#,
    )
    .bind(from)
    .bind(n)
    .bind(to)
    .execute(&mut **tx)
    .await
    .map_err(|error| StoreError::Query {
        command: "UPDATE",
        error,
    })?;

    Ok(())
}

async fn move_all_scheduled(
    tx: &mut Transaction<'_, Postgres>,
    from: i32,
    to: i32,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE scheduled_jobs SET partition = $2, updated_at = now() \
         WHERE partition = $1 AND status = 'scheduled'",
    )
    .bind(from)
    .bind(to)
    .execute(&mut **tx)
    .await
    .map_err(|error| StoreError::Query {
        command: "UPDATE",
        error,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebalance_notification_round_trips() {
        let payload = serde_json::to_string(&RebalanceNotification { partition: 7 }).unwrap();
        let decoded: RebalanceNotification = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded.partition, 7);
    }

    /// Inserts a row with an explicit status/partition, bypassing `insert_job`
    /// (which always starts a row at `Scheduled`/its assigned partition) so
    /// tests can set up arbitrary starting states.
    async fn seed_job(pool: &PgPool, status: JobStatus, partition: i32) -> Uuid {
        let row: (Uuid,) = sqlx::query_as(
            r#"
INSERT INTO scheduled_jobs
    (id, owner_id, name, description, url, payload, content_type, signature,
     run_at, max_retries, status, partition, created_at, updated_at)
VALUES
    (gen_random_uuid(), gen_random_uuid(), 'job', '', 'https://example.test/hook', '{}',
     'application/json', NULL, now(), 0, $1, $2, now(), now())
RETURNING id
            "#,
        )
        .bind(status)
        .bind(partition)
        .fetch_one(pool)
        .await
        .unwrap();

        row.0
    }

    async fn job_partition(pool: &PgPool, id: Uuid) -> i32 {
        let row: (i32,) = sqlx::query_as("SELECT partition FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    async fn job_status(pool: &PgPool, id: Uuid) -> JobStatus {
        let row: (JobStatus,) = sqlx::query_as("SELECT status FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn claim_due_jobs_flips_status_and_orders_by_run_at(pool: PgPool) {
        let store = Store::from_pool(pool.clone());
        let now = Utc::now();

        let later = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO scheduled_jobs (id, owner_id, name, description, url, payload, \
             content_type, run_at, max_retries, status, partition, created_at, updated_at) \
             VALUES (gen_random_uuid(), gen_random_uuid(), 'job', '', 'https://x.test', '{}', \
             'application/json', $1, 0, 'scheduled', 1, now(), now()) RETURNING id",
        )
        .bind(now - chrono::Duration::seconds(1))
        .fetch_one(&pool)
        .await
        .unwrap()
        .0;

        let earlier = sqlx::query_as::<_, (Uuid,)>(
            "INSERT INTO scheduled_jobs (id, owner_id, name, description, url, payload, \
             content_type, run_at, max_retries, status, partition, created_at, updated_at) \
             VALUES (gen_random_uuid(), gen_random_uuid(), 'job', '', 'https://x.test', '{}', \
             'application/json', $1, 0, 'scheduled', 1, now(), now()) RETURNING id",
        )
        .bind(now - chrono::Duration::seconds(10))
        .fetch_one(&pool)
        .await
        .unwrap()
        .0;

        // A not-yet-due row must not be claimed.
        let not_due = seed_job(&pool, JobStatus::Scheduled, 1).await;
        sqlx::query("UPDATE scheduled_jobs SET run_at = now() + interval '1 hour' WHERE id = $1")
            .bind(not_due)
            .execute(&pool)
            .await
            .unwrap();

        let claimed = store.claim_due_jobs(1, 10, now).await.unwrap();

        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, earlier, "earlier run_at must claim first");
        assert_eq!(claimed[1].id, later);
        assert!(claimed.iter().all(|job| job.status == JobStatus::Pending));
        assert_eq!(job_status(&pool, not_due).await, JobStatus::Scheduled);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn record_outcome_updates_status_and_appends_execution(pool: PgPool) {
        let store = Store::from_pool(pool.clone());
        let job_id = seed_job(&pool, JobStatus::Pending, 1).await;

        store
            .record_outcome(job_id, Outcome::success(200))
            .await
            .unwrap();

        assert_eq!(job_status(&pool, job_id).await, JobStatus::Success);

        let executions: Vec<(i32, String)> =
            sqlx::query_as("SELECT status_code, message FROM executions WHERE scheduled_job_id = $1")
                .bind(job_id)
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0], (200, String::new()));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rebalance_reclaims_stranded_jobs_from_dead_partitions(pool: PgPool) {
        let store = Store::from_pool(pool.clone());

        // Partition 2 died; partition 1 is still live. One Scheduled and one
        // Pending row are stranded on the dead partition.
        let stranded_scheduled = seed_job(&pool, JobStatus::Scheduled, 2).await;
        let stranded_pending = seed_job(&pool, JobStatus::Pending, 2).await;
        let live_pending = seed_job(&pool, JobStatus::Pending, 1).await;

        store.rebalance(&[1]).await.unwrap();

        // The reclaim (step 2) and the redistribution (steps 4-6) run in the
        // same transaction, so with only one live partition left the
        // reclaimed rows don't linger on partition 0 — they're immediately
        // reassigned onto the surviving partition, reverted to Scheduled.
        assert_eq!(job_partition(&pool, stranded_scheduled).await, 1);
        assert_eq!(job_status(&pool, stranded_scheduled).await, JobStatus::Scheduled);
        assert_eq!(job_partition(&pool, stranded_pending).await, 1);
        assert_eq!(job_status(&pool, stranded_pending).await, JobStatus::Scheduled);

        // The live partition's own Pending row was never stranded: it keeps
        // its in-flight status, untouched by the reassignment.
        assert_eq!(job_partition(&pool, live_pending).await, 1);
        assert_eq!(job_status(&pool, live_pending).await, JobStatus::Pending);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rebalance_spreads_orphans_across_live_partitions(pool: PgPool) {
        let store = Store::from_pool(pool.clone());

        // 5 orphaned jobs, two live partitions: integer division gives 2/3.
        let mut orphans = Vec::new();
        for _ in 0..5 {
            orphans.push(seed_job(&pool, JobStatus::Scheduled, 0).await);
        }

        let report = store.rebalance(&[1, 2]).await.unwrap();
        assert_eq!(report.total_live_jobs, 5);

        let mut counts = HashMap::new();
        for id in &orphans {
            *counts.entry(job_partition(&pool, *id).await).or_insert(0) += 1;
        }
        assert_eq!(counts.values().sum::<i32>(), 5);
        assert!(counts.keys().all(|p| *p == 1 || *p == 2));

        let per_bucket = counts.get(&1).copied().unwrap_or(0).min(counts.get(&2).copied().unwrap_or(0));
        assert!(per_bucket >= 2, "each live partition should get at least the floor share");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rebalance_shrinks_overloaded_partitions(pool: PgPool) {
        let store = Store::from_pool(pool.clone());

        // 4 jobs all on partition 1, rebalanced across partitions 1 and 2:
        // partition 1 must shrink to 2, partition 2 must grow to 2.
        let mut jobs = Vec::new();
        for _ in 0..4 {
            jobs.push(seed_job(&pool, JobStatus::Scheduled, 1).await);
        }

        store.rebalance(&[1, 2]).await.unwrap();

        let mut counts = HashMap::new();
        for id in &jobs {
            *counts.entry(job_partition(&pool, *id).await).or_insert(0) += 1;
        }
        assert_eq!(counts.get(&1).copied().unwrap_or(0), 2);
        assert_eq!(counts.get(&2).copied().unwrap_or(0), 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn rebalance_on_empty_store_is_a_noop(pool: PgPool) {
        let store = Store::from_pool(pool);
        let report = store.rebalance(&[1, 2]).await.unwrap();
        assert_eq!(report.total_live_jobs, 0);
    }
}
