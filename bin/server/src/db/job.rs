//! Job queue repository.
//!
//! Claims ride a single `UPDATE ... FROM (subselect FOR UPDATE SKIP
//! LOCKED)` so racing workers never both win a job. The other
//! transitions lock the row, run the domain transition, and write the
//! result back inside one transaction.

use super::{decode_id, decode_str};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowline_core::{ExecutionId, JobId, TenantId};
use flowline_queue::{Job, JobStore, QueueError, DEFAULT_STALE_LOCK};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

fn store_err(err: sqlx::Error) -> QueueError {
    QueueError::Store {
        message: err.to_string(),
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    workflow_id: String,
    execution_id: String,
    tenant_id: String,
    priority: i32,
    run_at: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    status: String,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    last_error: Option<String>,
    result: Option<JsonValue>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job, sqlx::Error> {
        Ok(Job {
            id: decode_id(&self.id, "job id")?,
            workflow_id: decode_id(&self.workflow_id, "workflow id")?,
            execution_id: decode_id(&self.execution_id, "execution id")?,
            tenant_id: decode_id(&self.tenant_id, "tenant id")?,
            priority: self.priority,
            run_at: self.run_at,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            status: decode_str(&self.status, "job status")?,
            locked_at: self.locked_at,
            locked_by: self.locked_by,
            last_error: self.last_error,
            result: self.result,
            created_at: self.created_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        })
    }
}

/// Postgres-backed [`JobStore`].
pub struct PgJobStore {
    pool: PgPool,
    stale_threshold: Duration,
}

impl PgJobStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            stale_threshold: DEFAULT_STALE_LOCK,
        }
    }

    #[must_use]
    pub fn with_stale_threshold(pool: PgPool, stale_threshold: Duration) -> Self {
        Self {
            pool,
            stale_threshold,
        }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: JobId,
    ) -> Result<Job, QueueError> {
        let row: Option<JobRow> =
            sqlx::query_as(r#"SELECT * FROM workflow_jobs WHERE id = $1 FOR UPDATE"#)
                .bind(id.to_string())
                .fetch_optional(&mut **tx)
                .await
                .map_err(store_err)?;
        row.ok_or(QueueError::NotFound { job_id: id })?
            .try_into_job()
            .map_err(store_err)
    }

    async fn write_back(
        tx: &mut Transaction<'_, Postgres>,
        job: &Job,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE workflow_jobs SET
                status = $2, run_at = $3, attempts = $4, locked_at = $5,
                locked_by = $6, last_error = $7, result = $8, completed_at = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.as_str())
        .bind(job.run_at)
        .bind(job.attempts)
        .bind(job.locked_at)
        .bind(job.locked_by.as_deref())
        .bind(job.last_error.as_deref())
        .bind(&job.result)
        .bind(job.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Runs a domain transition against the locked row and persists
    /// the outcome.
    async fn transition<F>(&self, id: JobId, apply: F) -> Result<Job, QueueError>
    where
        F: FnOnce(&mut Job) -> Result<(), QueueError>,
    {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut job = Self::lock_row(&mut tx, id).await?;
        apply(&mut job)?;
        Self::write_back(&mut tx, &job).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_jobs
                (id, workflow_id, execution_id, tenant_id, priority, run_at,
                 attempts, max_attempts, status, locked_at, locked_by,
                 last_error, result, created_at, completed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.workflow_id.to_string())
        .bind(job.execution_id.to_string())
        .bind(job.tenant_id.to_string())
        .bind(job.priority)
        .bind(job.run_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.status.as_str())
        .bind(job.locked_at)
        .bind(job.locked_by.as_deref())
        .bind(job.last_error.as_deref())
        .bind(&job.result)
        .bind(job.created_at)
        .bind(job.completed_at)
        .bind(job.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(r#"SELECT * FROM workflow_jobs WHERE id = $1"#)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.ok_or(QueueError::NotFound { job_id: id })?
            .try_into_job()
            .map_err(store_err)
    }

    async fn find_by_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<Job>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM workflow_jobs
            WHERE execution_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|r| r.try_into_job().map_err(store_err)).transpose()
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE workflow_jobs SET
                status = 'processing',
                locked_at = NOW(),
                locked_by = $1,
                attempts = attempts + 1
            WHERE id = (
                SELECT id FROM workflow_jobs
                WHERE (status = 'pending' AND run_at <= NOW())
                   OR (status = 'processing'
                       AND locked_at < NOW() - make_interval(secs => $2))
                ORDER BY priority DESC, run_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(self.stale_threshold.num_seconds() as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|r| r.try_into_job().map_err(store_err)).transpose()
    }

    async fn complete(&self, id: JobId, result: JsonValue) -> Result<(), QueueError> {
        let now = Utc::now();
        self.transition(id, |job| job.record_completion(result, now))
            .await?;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str, retryable: bool) -> Result<Job, QueueError> {
        let now = Utc::now();
        self.transition(id, |job| job.record_failure(error, retryable, now))
            .await
    }

    async fn cancel(&self, id: JobId) -> Result<Job, QueueError> {
        let now = Utc::now();
        self.transition(id, |job| job.record_cancellation(now))
            .await
    }

    async fn retry(&self, id: JobId) -> Result<Job, QueueError> {
        let now = Utc::now();
        let stale_threshold = self.stale_threshold;
        self.transition(id, |job| job.record_retry(now, stale_threshold))
            .await
    }

    async fn count_active(&self, tenant_id: TenantId) -> Result<u64, QueueError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM workflow_jobs
            WHERE tenant_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(tenant_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let result = sqlx::query(r#"DELETE FROM workflow_jobs WHERE expires_at <= $1"#)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
