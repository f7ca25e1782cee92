//! In-memory job store for tests and single-process development.
//!
//! All operations take the store mutex for their full duration, so
//! every transition — including claim's find-and-modify — is atomic
//! with respect to concurrent callers, matching the conditional-update
//! discipline the trait requires of durable backends.

use crate::error::QueueError;
use crate::job::{Job, JobStatus, DEFAULT_STALE_LOCK};
use crate::store::JobStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowline_core::{ExecutionId, JobId, TenantId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;

/// Mutex-guarded job map with an injectable stale-lock threshold.
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    stale_threshold: Duration,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    /// Creates a store with the standard 5-minute stale-lock threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_stale_threshold(DEFAULT_STALE_LOCK)
    }

    /// Creates a store with a custom stale-lock threshold. Tests use
    /// short thresholds to exercise reclamation without waiting.
    #[must_use]
    pub fn with_stale_threshold(stale_threshold: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            stale_threshold,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.jobs
            .lock()
            .expect("job store poisoned")
            .insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.jobs
            .lock()
            .expect("job store poisoned")
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound { job_id: id })
    }

    async fn find_by_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<Job>, QueueError> {
        Ok(self
            .jobs
            .lock()
            .expect("job store poisoned")
            .values()
            .find(|j| j.execution_id == execution_id)
            .cloned())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().expect("job store poisoned");

        let best = jobs
            .values()
            .filter(|j| j.is_claimable(now, self.stale_threshold))
            .map(|j| (j.id, j.priority, j.run_at))
            .min_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)))
            .map(|(id, _, _)| id);

        let Some(id) = best else {
            return Ok(None);
        };

        // Still under the same lock: the find and the modify are one
        // critical section.
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { job_id: id })?;
        if job.status == JobStatus::Processing {
            tracing::warn!(
                job_id = %job.id,
                abandoned_by = job.locked_by.as_deref().unwrap_or(""),
                "reclaiming job with stale lock"
            );
        }
        job.record_claim(worker_id, now);
        Ok(Some(job.clone()))
    }

    async fn complete(&self, id: JobId, result: JsonValue) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { job_id: id })?;
        job.record_completion(result, Utc::now())
    }

    async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { job_id: id })?;
        job.record_failure(error, retryable, Utc::now())?;
        Ok(job.clone())
    }

    async fn cancel(&self, id: JobId) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { job_id: id })?;
        job.record_cancellation(Utc::now())?;
        Ok(job.clone())
    }

    async fn retry(&self, id: JobId) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { job_id: id })?;
        job.record_retry(Utc::now(), self.stale_threshold)?;
        Ok(job.clone())
    }

    async fn count_active(&self, tenant_id: TenantId) -> Result<u64, QueueError> {
        Ok(self
            .jobs
            .lock()
            .expect("job store poisoned")
            .values()
            .filter(|j| j.tenant_id == tenant_id && !j.status.is_terminal())
            .count() as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut jobs = self.jobs.lock().expect("job store poisoned");
        let before = jobs.len();
        jobs.retain(|_, j| j.expires_at > now);
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use flowline_core::WorkflowId;
    use std::sync::Arc;

    fn job_for(tenant: TenantId) -> Job {
        Job::new(WorkflowId::new(), ExecutionId::new(), tenant, 0, 3)
    }

    fn job() -> Job {
        job_for(TenantId::new())
    }

    #[tokio::test]
    async fn claim_takes_highest_priority_then_earliest_run_at() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let low = job().run_at(now - Duration::seconds(30));
        let mut high_late = job().run_at(now - Duration::seconds(10));
        high_late.priority = 5;
        let mut high_early = job().run_at(now - Duration::seconds(20));
        high_early.priority = 5;

        store.enqueue(low.clone()).await.unwrap();
        store.enqueue(high_late.clone()).await.unwrap();
        store.enqueue(high_early.clone()).await.unwrap();

        let first = store.claim("w1").await.unwrap().expect("job available");
        assert_eq!(first.id, high_early.id);
        let second = store.claim("w1").await.unwrap().expect("job available");
        assert_eq!(second.id, high_late.id);
        let third = store.claim("w1").await.unwrap().expect("job available");
        assert_eq!(third.id, low.id);
    }

    #[tokio::test]
    async fn claim_sets_lock_and_increments_attempts() {
        let store = InMemoryJobStore::new();
        let job = job();
        store.enqueue(job.clone()).await.unwrap();

        let claimed = store.claim("worker-7").await.unwrap().expect("claimed");
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-7"));
        assert!(claimed.locked_at.is_some());
    }

    #[tokio::test]
    async fn empty_queue_claims_nothing() {
        let store = InMemoryJobStore::new();
        assert!(store.claim("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_double_claim_under_concurrency() {
        let store = Arc::new(InMemoryJobStore::new());
        store.enqueue(job()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim(&format!("worker-{i}")).await.unwrap()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimable_by_another_worker() {
        // Scenario: a worker claims and goes silent past the threshold.
        let store = InMemoryJobStore::with_stale_threshold(Duration::milliseconds(20));
        store.enqueue(job()).await.unwrap();

        let first = store.claim("w1").await.unwrap().expect("claimed");
        assert!(store.claim("w2").await.unwrap().is_none());

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        let reclaimed = store.claim("w2").await.unwrap().expect("reclaimed");
        assert_eq!(reclaimed.id, first.id);
        assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn retryable_failure_reschedules_with_backoff() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).await.unwrap();

        let claimed = store.claim("w1").await.unwrap().expect("claimed");
        let before = Utc::now();
        let failed = store.fail(claimed.id, "connect timeout", true).await.unwrap();

        assert_eq!(failed.status, JobStatus::Pending);
        assert!(failed.run_at >= before + Duration::seconds(2));
        assert_eq!(failed.last_error.as_deref(), Some("connect timeout"));
        assert!(failed.locked_by.is_none());
    }

    #[tokio::test]
    async fn backoff_grows_monotonically_across_failures() {
        let store = InMemoryJobStore::with_stale_threshold(Duration::zero());
        let mut job = job();
        job.max_attempts = 10;
        store.enqueue(job.clone()).await.unwrap();

        let mut previous_delay = Duration::zero();
        for _ in 0..4 {
            // Zero stale threshold lets us re-claim the rescheduled
            // job immediately even though run_at is in the future.
            let claimed = store.claim("w1").await.unwrap().expect("claimed");
            let now = Utc::now();
            let failed = store.fail(claimed.id, "slow upstream", true).await.unwrap();
            let delay = failed.run_at - now;
            assert!(delay > previous_delay);
            previous_delay = delay;
            store.retry(failed.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn attempts_exhaustion_fails_terminally() {
        // Scenario A: maxAttempts = 3, three retryable failures.
        let store = InMemoryJobStore::with_stale_threshold(Duration::zero());
        store.enqueue(job()).await.unwrap();

        for attempt in 1..=3 {
            let claimed = store.claim("w1").await.unwrap().expect("claimed");
            assert_eq!(claimed.attempts, attempt);
            let failed = store.fail(claimed.id, "flaky", true).await.unwrap();
            if attempt < 3 {
                assert_eq!(failed.status, JobStatus::Pending);
                store.retry(failed.id).await.unwrap();
            } else {
                assert_eq!(failed.status, JobStatus::Failed);
            }
        }
    }

    #[tokio::test]
    async fn permanent_failure_skips_retry_budget() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).await.unwrap();

        let claimed = store.claim("w1").await.unwrap().expect("claimed");
        let failed = store
            .fail(claimed.id, "invalid node configuration", false)
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).await.unwrap();
        let claimed = store.claim("w1").await.unwrap().expect("claimed");

        store
            .complete(claimed.id, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        store
            .complete(claimed.id, serde_json::json!({"ok": "again"}))
            .await
            .unwrap();

        let stored = store.get(claimed.id).await.unwrap();
        assert_eq!(stored.result, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn completed_job_status_never_changes_again() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).await.unwrap();
        let claimed = store.claim("w1").await.unwrap().expect("claimed");
        store.complete(claimed.id, JsonValue::Null).await.unwrap();

        assert!(store.fail(claimed.id, "late error", true).await.is_err());
        assert!(store.cancel(claimed.id).await.is_err());
        assert!(store.retry(claimed.id).await.is_err());
        assert_eq!(
            store.get(claimed.id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn cancel_pending_job_records_reason() {
        let store = InMemoryJobStore::new();
        let job = job();
        store.enqueue(job.clone()).await.unwrap();

        let cancelled = store.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.last_error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn retry_failed_job_resets_schedule() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).await.unwrap();
        let claimed = store.claim("w1").await.unwrap().expect("claimed");
        store.fail(claimed.id, "bad config", false).await.unwrap();

        let retried = store.retry(claimed.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.run_at <= Utc::now());
        assert!(retried.completed_at.is_none());
    }

    #[tokio::test]
    async fn retry_refuses_live_processing_job() {
        let store = InMemoryJobStore::new();
        store.enqueue(job()).await.unwrap();
        let claimed = store.claim("w1").await.unwrap().expect("claimed");

        let err = store.retry(claimed.id).await.unwrap_err();
        assert_eq!(err, QueueError::JobStillRunning { job_id: claimed.id });
    }

    #[tokio::test]
    async fn retry_allows_stale_processing_job() {
        let store = InMemoryJobStore::with_stale_threshold(Duration::milliseconds(10));
        store.enqueue(job()).await.unwrap();
        let claimed = store.claim("w1").await.unwrap().expect("claimed");

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        let retried = store.retry(claimed.id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn count_active_ignores_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let pending = job_for(tenant);
        let running = job_for(tenant);
        let done = job_for(tenant);
        store.enqueue(pending).await.unwrap();
        store.enqueue(running.clone()).await.unwrap();
        store.enqueue(done.clone()).await.unwrap();
        store.enqueue(job_for(TenantId::new())).await.unwrap();

        store.cancel(done.id).await.unwrap();

        assert_eq!(store.count_active(tenant).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn purge_removes_only_expired_jobs() {
        let store = InMemoryJobStore::new();
        let fresh = job();
        let mut old = job();
        old.expires_at = Utc::now() - Duration::hours(1);
        store.enqueue(fresh.clone()).await.unwrap();
        store.enqueue(old).await.unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(fresh.id).await.is_ok());
    }
}
