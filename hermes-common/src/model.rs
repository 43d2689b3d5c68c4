//! The data model shared by the coordinator and the worker: a `ScheduledJob`
//! to be delivered as a webhook, and the append-only `Execution` log of
//! delivery attempts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status of a `ScheduledJob`.
///
/// Transitions form a DAG: `Scheduled -> Pending -> {Success, Fail}`.
/// `Scheduled` may re-enter from `Pending` during a rebalance. `Success` and
/// `Fail` are terminal. `Deleted` is a soft-delete state reachable from
/// `Scheduled` or `Pending` by the excluded job-management collaborator; the
/// subsystems in this crate never produce it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Pending,
    Success,
    Fail,
    Deleted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Fail)
    }
}

/// The partition reserved for jobs awaiting (re)assignment to a live worker.
pub const ORPHAN_PARTITION: i32 = 0;

/// One webhook scheduled for future delivery.
///
/// `partition == ORPHAN_PARTITION` if and only if the job is not currently
/// owned by any live worker.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub url: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub signature: Option<String>,
    pub run_at: DateTime<Utc>,
    pub max_retries: i16,
    pub status: JobStatus,
    pub partition: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn is_orphan(&self) -> bool {
        self.partition == ORPHAN_PARTITION
    }
}

/// A brand new job as handed to the coordinator by the (excluded)
/// job-submission collaborator. Partition is assigned by the membership
/// registry at insertion time, not by the caller.
#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub url: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub signature: Option<String>,
    pub run_at: DateTime<Utc>,
    pub max_retries: i16,
}

/// One completed executor pass for a job. Append-only: never updated or
/// deleted. `status_code` is `0` on transport failure.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Execution {
    pub id: i64,
    pub scheduled_job_id: Uuid,
    pub status_code: i32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one executor pass, used to build the `Execution` row and the
/// job status update in a single transaction.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: JobStatus,
    pub status_code: i32,
    pub message: String,
}

impl Outcome {
    pub fn success(status_code: i32) -> Self {
        Self {
            status: JobStatus::Success,
            status_code,
            message: String::new(),
        }
    }

    pub fn fail(status_code: i32, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Fail,
            status_code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_iff_partition_zero() {
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "job".into(),
            description: String::new(),
            url: "https://example.com".into(),
            payload: vec![],
            content_type: "application/json".into(),
            signature: None,
            run_at: Utc::now(),
            max_retries: 0,
            status: JobStatus::Scheduled,
            partition: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(job.is_orphan());

        let mut owned = job.clone();
        owned.partition = 3;
        assert!(!owned.is_orphan());
    }

    #[test]
    fn success_and_fail_are_terminal() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Fail.is_terminal());
        assert!(!JobStatus::Scheduled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }
}
