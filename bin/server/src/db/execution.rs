//! Execution record and log repositories.

use super::{decode_id, decode_json, decode_str, encode_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, WorkflowId};
use flowline_execution::{
    Execution, ExecutionError, ExecutionLogEntry, ExecutionStore, ExecutionUpdate, LogSink,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

fn store_err(err: sqlx::Error) -> ExecutionError {
    ExecutionError::Store {
        message: err.to_string(),
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    workflow_id: String,
    tenant_id: String,
    workflow_version: i64,
    trigger_event: serde_json::Value,
    status: String,
    completed_nodes: serde_json::Value,
    failed_nodes: serde_json::Value,
    skipped_nodes: serde_json::Value,
    context: serde_json::Value,
    metrics: serde_json::Value,
    failure: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl ExecutionRow {
    fn try_into_execution(self) -> Result<Execution, sqlx::Error> {
        Ok(Execution {
            id: decode_id(&self.id, "execution id")?,
            workflow_id: decode_id(&self.workflow_id, "workflow id")?,
            tenant_id: decode_id(&self.tenant_id, "tenant id")?,
            workflow_version: self.workflow_version,
            trigger: decode_json(self.trigger_event, "trigger event")?,
            status: decode_str(&self.status, "execution status")?,
            completed_nodes: decode_json(self.completed_nodes, "completed nodes")?,
            failed_nodes: decode_json(self.failed_nodes, "failed nodes")?,
            skipped_nodes: decode_json(self.skipped_nodes, "skipped nodes")?,
            context: decode_json(self.context, "execution context")?,
            metrics: decode_json(self.metrics, "execution metrics")?,
            failure: self
                .failure
                .map(|f| decode_json(f, "execution failure"))
                .transpose()?,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        })
    }
}

/// Postgres-backed [`ExecutionStore`].
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads a row under `FOR UPDATE` so a read-modify-write cycle is
    /// one atomic unit.
    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: ExecutionId,
    ) -> Result<Execution, ExecutionError> {
        let row: Option<ExecutionRow> =
            sqlx::query_as(r#"SELECT * FROM workflow_executions WHERE id = $1 FOR UPDATE"#)
                .bind(id.to_string())
                .fetch_optional(&mut **tx)
                .await
                .map_err(store_err)?;
        row.ok_or(ExecutionError::NotFound { execution_id: id })?
            .try_into_execution()
            .map_err(store_err)
    }

    async fn write_back(
        tx: &mut Transaction<'_, Postgres>,
        execution: &Execution,
    ) -> Result<(), ExecutionError> {
        sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = $2, completed_nodes = $3, failed_nodes = $4,
                skipped_nodes = $5, context = $6, metrics = $7, failure = $8,
                started_at = $9, completed_at = $10
            WHERE id = $1
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.status.as_str())
        .bind(encode_json(&execution.completed_nodes))
        .bind(encode_json(&execution.failed_nodes))
        .bind(encode_json(&execution.skipped_nodes))
        .bind(encode_json(&execution.context))
        .bind(encode_json(&execution.metrics))
        .bind(execution.failure.as_ref().map(encode_json))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: Execution) -> Result<(), ExecutionError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, tenant_id, workflow_version, trigger_event,
                 status, completed_nodes, failed_nodes, skipped_nodes, context,
                 metrics, failure, created_at, started_at, completed_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.workflow_version)
        .bind(encode_json(&execution.trigger))
        .bind(execution.status.as_str())
        .bind(encode_json(&execution.completed_nodes))
        .bind(encode_json(&execution.failed_nodes))
        .bind(encode_json(&execution.skipped_nodes))
        .bind(encode_json(&execution.context))
        .bind(encode_json(&execution.metrics))
        .bind(execution.failure.as_ref().map(encode_json))
        .bind(execution.created_at)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        let row: Option<ExecutionRow> =
            sqlx::query_as(r#"SELECT * FROM workflow_executions WHERE id = $1"#)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        row.ok_or(ExecutionError::NotFound { execution_id: id })?
            .try_into_execution()
            .map_err(store_err)
    }

    async fn update(
        &self,
        id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<Execution, ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut execution = Self::lock_row(&mut tx, id).await?;
        execution.apply(update)?;
        Self::write_back(&mut tx, &execution).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(execution)
    }

    async fn reopen(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut execution = Self::lock_row(&mut tx, id).await?;
        execution.reopen()?;
        Self::write_back(&mut tx, &execution).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(execution)
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<Execution>, ExecutionError> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT * FROM workflow_executions
            WHERE workflow_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|r| r.try_into_execution().map_err(store_err))
            .collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ExecutionError> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_executions
            WHERE expires_at <= $1
              AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}

#[derive(FromRow)]
struct LogRow {
    execution_id: String,
    node_id: Option<String>,
    at: DateTime<Utc>,
    level: String,
    event: String,
    message: String,
    data: Option<serde_json::Value>,
    expires_at: DateTime<Utc>,
}

impl LogRow {
    fn try_into_entry(self) -> Result<ExecutionLogEntry, sqlx::Error> {
        Ok(ExecutionLogEntry {
            execution_id: decode_id(&self.execution_id, "execution id")?,
            node_id: self
                .node_id
                .as_deref()
                .map(|n| decode_id(n, "node id"))
                .transpose()?,
            at: self.at,
            level: decode_str(&self.level, "log level")?,
            event: self.event,
            message: self.message,
            data: self.data,
            expires_at: self.expires_at,
        })
    }
}

/// Postgres-backed [`LogSink`].
pub struct PgLogSink {
    pool: PgPool,
}

impl PgLogSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogSink for PgLogSink {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), ExecutionError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_execution_logs
                (execution_id, node_id, at, level, event, message, data, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.execution_id.to_string())
        .bind(entry.node_id.map(|n| n.to_string()))
        .bind(entry.at)
        .bind(entry.level.as_str())
        .bind(&entry.event)
        .bind(&entry.message)
        .bind(&entry.data)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn read(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<ExecutionLogEntry>, ExecutionError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"
            SELECT execution_id, node_id, at, level, event, message, data, expires_at
            FROM workflow_execution_logs
            WHERE execution_id = $1
            ORDER BY at, id
            "#,
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|r| r.try_into_entry().map_err(store_err))
            .collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ExecutionError> {
        let result = sqlx::query(r#"DELETE FROM workflow_execution_logs WHERE expires_at <= $1"#)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}
