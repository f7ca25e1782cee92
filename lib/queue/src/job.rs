//! The job model: scheduling, lock, and retry fields.

use crate::error::QueueError;
use chrono::{DateTime, Duration, Utc};
use flowline_core::{ExecutionId, JobId, TenantId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// How long a processing job's lock may go unrefreshed before the job
/// is treated as abandoned and eligible for re-claim.
pub const DEFAULT_STALE_LOCK: Duration = Duration::minutes(5);

/// How long jobs are retained after creation before being purged.
pub const JOB_RETENTION: Duration = Duration::days(7);

/// Queue status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker; lock fields are set.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (including cancellation).
    Failed,
}

impl JobStatus {
    /// Stable string form used in records and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Classification of an execution failure, decided by the worker
/// before reporting it to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, unavailability, rate limits: worth retrying.
    Transient,
    /// Invalid configuration or explicit rejection: retrying cannot
    /// help, so the retry budget is not consumed.
    Permanent,
}

impl FailureKind {
    /// Whether the queue should reschedule on this kind of failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Computes the backoff delay after `attempts` deliveries.
///
/// `2^attempts` seconds, computed from data rather than an in-process
/// timer so the schedule survives restarts. The exponent is capped to
/// keep the arithmetic safe for absurd attempt counts.
#[must_use]
pub fn backoff_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 20) as u32;
    Duration::seconds(2_i64.pow(exponent))
}

/// A queueable unit of work wrapping one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The execution this job drives. Exactly one job references a
    /// given execution at a time.
    pub execution_id: ExecutionId,
    /// Owning tenant, for admission accounting.
    pub tenant_id: TenantId,
    /// Higher priority is claimed first.
    pub priority: i32,
    /// Earliest eligible claim time.
    pub run_at: DateTime<Utc>,
    /// Deliveries so far (incremented by claim).
    pub attempts: i32,
    /// Maximum deliveries before the job fails terminally.
    pub max_attempts: i32,
    /// Queue status.
    pub status: JobStatus,
    /// When the current lock was taken; present only while processing.
    pub locked_at: Option<DateTime<Utc>>,
    /// Which worker holds the lock; present only while processing.
    pub locked_by: Option<String>,
    /// Most recent failure message, kept for diagnostics.
    pub last_error: Option<String>,
    /// Result payload recorded on completion.
    pub result: Option<JsonValue>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job (and its logs) may be purged.
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job eligible to run immediately.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        tenant_id: TenantId,
        priority: i32,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            workflow_id,
            execution_id,
            tenant_id,
            priority,
            run_at: now,
            attempts: 0,
            max_attempts,
            status: JobStatus::Pending,
            locked_at: None,
            locked_by: None,
            last_error: None,
            result: None,
            created_at: now,
            completed_at: None,
            expires_at: now + JOB_RETENTION,
        }
    }

    /// Defers the first run to a later time.
    #[must_use]
    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = run_at;
        self
    }

    /// Returns true if the lock is older than `threshold` at `now`.
    ///
    /// A stale lock implies the owning worker likely crashed; the job
    /// is treated as abandoned regardless of its nominal status.
    #[must_use]
    pub fn is_lock_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => now - locked_at > threshold,
            None => false,
        }
    }

    /// Returns true if a worker may claim this job at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_threshold: Duration) -> bool {
        match self.status {
            JobStatus::Pending => self.run_at <= now,
            JobStatus::Processing => self.is_lock_stale(now, stale_threshold),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// Whether another delivery attempt remains in the budget.
    #[must_use]
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Applies a successful claim: processing, locked, one more
    /// attempt consumed. The caller has already checked eligibility
    /// under whatever atomicity its store provides.
    pub fn record_claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.locked_at = Some(now);
        self.locked_by = Some(worker_id.to_string());
        self.attempts += 1;
    }

    /// Applies a completion. Completing an already-completed job is a
    /// no-op; completing a failed job is an invalid transition.
    pub fn record_completion(
        &mut self,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        match self.status {
            JobStatus::Completed => Ok(()),
            JobStatus::Failed => Err(QueueError::InvalidTransition {
                job_id: self.id,
                status: self.status,
                operation: "complete",
            }),
            JobStatus::Pending | JobStatus::Processing => {
                self.status = JobStatus::Completed;
                self.result = Some(result);
                self.completed_at = Some(now);
                self.clear_lock();
                Ok(())
            }
        }
    }

    /// Applies a failure report: rescheduled with backoff while the
    /// failure is retryable and attempts remain, terminal otherwise.
    pub fn record_failure(
        &mut self,
        error: &str,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        if self.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                job_id: self.id,
                status: self.status,
                operation: "fail",
            });
        }
        self.last_error = Some(error.to_string());
        self.clear_lock();
        if retryable && self.has_attempts_remaining() {
            self.status = JobStatus::Pending;
            self.run_at = now + backoff_delay(self.attempts);
        } else {
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Applies a cancellation. Invalid for terminal jobs.
    pub fn record_cancellation(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        if self.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                job_id: self.id,
                status: self.status,
                operation: "cancel",
            });
        }
        self.status = JobStatus::Failed;
        self.last_error = Some("cancelled".to_string());
        self.completed_at = Some(now);
        self.clear_lock();
        Ok(())
    }

    /// Applies an operator retry: back to pending, due immediately.
    ///
    /// Completed jobs are never retried. A processing job is retried
    /// only when its lock is stale; a fresh lock means a live worker
    /// owns it.
    pub fn record_retry(
        &mut self,
        now: DateTime<Utc>,
        stale_threshold: Duration,
    ) -> Result<(), QueueError> {
        match self.status {
            JobStatus::Completed => {
                return Err(QueueError::InvalidTransition {
                    job_id: self.id,
                    status: self.status,
                    operation: "retry",
                });
            }
            JobStatus::Processing if !self.is_lock_stale(now, stale_threshold) => {
                return Err(QueueError::JobStillRunning { job_id: self.id });
            }
            JobStatus::Pending | JobStatus::Processing | JobStatus::Failed => {}
        }
        self.status = JobStatus::Pending;
        self.run_at = now;
        self.completed_at = None;
        self.clear_lock();
        Ok(())
    }

    fn clear_lock(&mut self) {
        self.locked_at = None;
        self.locked_by = None;
    }
}
