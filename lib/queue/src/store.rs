//! The `JobStore` trait: durable, lockable queue operations.
//!
//! Every state transition must be a single atomic conditional update
//! against the backing store (find-and-modify), never a read followed
//! by a separate write. The lock fields are the sole mutual-exclusion
//! mechanism between workers.

use crate::error::QueueError;
use crate::job::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, JobId, TenantId};
use serde_json::Value as JsonValue;

/// Durable storage for queued jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new pending job.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Fetches a job by ID.
    async fn get(&self, id: JobId) -> Result<Job, QueueError>;

    /// Fetches the job driving a given execution, if any.
    async fn find_by_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<Job>, QueueError>;

    /// Atomically claims the best eligible job for a worker.
    ///
    /// Eligible means: pending and due, or processing with a stale
    /// lock. Among eligible jobs the highest priority wins, ties
    /// broken by earliest `run_at`. The claim sets the job to
    /// processing, stamps `locked_at`/`locked_by`, and increments
    /// `attempts` — all in one conditional update, so two racing
    /// workers never both succeed on the same job.
    ///
    /// Returns `Ok(None)` when nothing is eligible; this is a normal,
    /// frequent outcome.
    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError>;

    /// Marks a job completed, recording the result payload and
    /// clearing the lock. Completing an already-completed job is a
    /// no-op.
    async fn complete(&self, id: JobId, result: JsonValue) -> Result<(), QueueError>;

    /// Reports a failure.
    ///
    /// If `retryable` and attempts remain, the job is rescheduled to
    /// pending with `run_at` pushed out by exponential backoff and
    /// the lock cleared; otherwise it fails terminally. The error
    /// message is preserved either way. Returns the updated job so
    /// callers can see whether a retry was scheduled.
    async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<Job, QueueError>;

    /// Cancels a pending or processing job: terminal failed with a
    /// "cancelled" reason, lock cleared. Invalid for terminal jobs.
    async fn cancel(&self, id: JobId) -> Result<Job, QueueError>;

    /// Operator-initiated retry: forces the job back to pending with
    /// `run_at = now`, clearing any lock and bypassing the backoff
    /// schedule. Valid for failed and pending jobs; valid for a
    /// processing job only when its lock is stale (a fresh lock means
    /// a live worker owns it, and the retry is refused).
    async fn retry(&self, id: JobId) -> Result<Job, QueueError>;

    /// Counts a tenant's jobs in {pending, processing}, for the
    /// admission concurrency ceiling.
    async fn count_active(&self, tenant_id: TenantId) -> Result<u64, QueueError>;

    /// Deletes jobs whose retention window has elapsed at `now`.
    /// Returns the number purged.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError>;
}
