//! Workflow and snapshot repositories.

use super::{decode_id, decode_json, decode_str, encode_json};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{TenantId, WorkflowId};
use flowline_workflow::{
    SnapshotPage, SnapshotStore, Workflow, WorkflowError, WorkflowSnapshot, WorkflowStatus,
    WorkflowStore,
};
use sqlx::{FromRow, PgPool};

const SLUG_CONSTRAINT: &str = "workflows_tenant_id_slug_key";

fn store_err(err: sqlx::Error) -> WorkflowError {
    WorkflowError::Store {
        message: err.to_string(),
    }
}

#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    tenant_id: String,
    slug: String,
    name: String,
    description: Option<String>,
    graph: serde_json::Value,
    settings: serde_json::Value,
    variables: serde_json::Value,
    status: String,
    version: i64,
    published_version: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, sqlx::Error> {
        Ok(Workflow {
            id: decode_id(&self.id, "workflow id")?,
            tenant_id: decode_id(&self.tenant_id, "tenant id")?,
            slug: self.slug,
            name: self.name,
            description: self.description,
            graph: decode_json(self.graph, "workflow graph")?,
            settings: decode_json(self.settings, "workflow settings")?,
            variables: decode_json(self.variables, "workflow variables")?,
            status: decode_str(&self.status, "workflow status")?,
            version: self.version,
            published_version: self.published_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Postgres-backed [`WorkflowStore`].
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflows
                (id, tenant_id, slug, name, description, graph, settings,
                 variables, status, version, published_version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.tenant_id.to_string())
        .bind(&workflow.slug)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(encode_json(&workflow.graph))
        .bind(encode_json(&workflow.settings))
        .bind(encode_json(&workflow.variables))
        .bind(workflow.status.as_str())
        .bind(workflow.version)
        .bind(workflow.published_version)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.constraint() == Some(SLUG_CONSTRAINT) => {
                Err(WorkflowError::SlugTaken {
                    slug: workflow.slug.clone(),
                })
            }
            Err(err) => Err(store_err(err)),
        }
    }

    async fn get(&self, id: WorkflowId) -> Result<Workflow, WorkflowError> {
        let row: Option<WorkflowRow> =
            sqlx::query_as(r#"SELECT * FROM workflows WHERE id = $1"#)
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        row.ok_or(WorkflowError::NotFound { workflow_id: id })?
            .try_into_workflow()
            .map_err(store_err)
    }

    async fn get_by_slug(
        &self,
        tenant_id: TenantId,
        slug: &str,
    ) -> Result<Option<Workflow>, WorkflowError> {
        let row: Option<WorkflowRow> =
            sqlx::query_as(r#"SELECT * FROM workflows WHERE tenant_id = $1 AND slug = $2"#)
                .bind(tenant_id.to_string())
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        row.map(|r| r.try_into_workflow().map_err(store_err))
            .transpose()
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                slug = $2, name = $3, description = $4, graph = $5,
                settings = $6, variables = $7, status = $8, version = $9,
                published_version = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.slug)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(encode_json(&workflow.graph))
        .bind(encode_json(&workflow.settings))
        .bind(encode_json(&workflow.variables))
        .bind(workflow.status.as_str())
        .bind(workflow.version)
        .bind(workflow.published_version)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::NotFound {
                workflow_id: workflow.id,
            });
        }
        Ok(())
    }

    async fn delete(&self, id: WorkflowId) -> Result<(), WorkflowError> {
        let result = sqlx::query(
            r#"DELETE FROM workflows WHERE id = $1 AND status <> $2"#,
        )
        .bind(id.to_string())
        .bind(WorkflowStatus::Active.as_str())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            // Either missing or active; distinguish for the caller.
            return match self.get(id).await {
                Ok(_) => Err(WorkflowError::DeleteWhileActive { workflow_id: id }),
                Err(err) => Err(err),
            };
        }
        Ok(())
    }

    async fn list_active(&self, tenant_id: TenantId) -> Result<Vec<Workflow>, WorkflowError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT * FROM workflows
            WHERE tenant_id = $1 AND status = $2
            ORDER BY updated_at DESC
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(WorkflowStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|r| r.try_into_workflow().map_err(store_err))
            .collect()
    }

    async fn list(&self, tenant_id: TenantId) -> Result<Vec<Workflow>, WorkflowError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"SELECT * FROM workflows WHERE tenant_id = $1 ORDER BY updated_at DESC"#,
        )
        .bind(tenant_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|r| r.try_into_workflow().map_err(store_err))
            .collect()
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    workflow_id: String,
    version: i64,
    graph: serde_json::Value,
    note: Option<String>,
    change_summary: Option<String>,
    stats: serde_json::Value,
    is_active: bool,
    deprecated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn try_into_snapshot(self) -> Result<WorkflowSnapshot, sqlx::Error> {
        Ok(WorkflowSnapshot {
            workflow_id: decode_id(&self.workflow_id, "workflow id")?,
            version: self.version,
            graph: decode_json(self.graph, "snapshot graph")?,
            note: self.note,
            change_summary: self.change_summary,
            stats: decode_json(self.stats, "snapshot stats")?,
            is_active: self.is_active,
            deprecated_at: self.deprecated_at,
            created_at: self.created_at,
        })
    }
}

/// Postgres-backed [`SnapshotStore`].
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn latest_version(&self, workflow_id: WorkflowId) -> Result<Option<i64>, WorkflowError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"SELECT MAX(version) FROM workflow_versions WHERE workflow_id = $1"#,
        )
        .bind(workflow_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(version)
    }

    async fn get(
        &self,
        workflow_id: WorkflowId,
        version: i64,
    ) -> Result<WorkflowSnapshot, WorkflowError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"SELECT * FROM workflow_versions WHERE workflow_id = $1 AND version = $2"#,
        )
        .bind(workflow_id.to_string())
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.ok_or(WorkflowError::VersionNotFound {
            workflow_id,
            version,
        })?
        .try_into_snapshot()
        .map_err(store_err)
    }

    async fn active(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowSnapshot>, WorkflowError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"SELECT * FROM workflow_versions WHERE workflow_id = $1 AND is_active"#,
        )
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.map(|r| r.try_into_snapshot().map_err(store_err))
            .transpose()
    }

    async fn append_active(&self, snapshot: WorkflowSnapshot) -> Result<(), WorkflowError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // Lock the newest row so concurrent appends serialize.
        let latest: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT version FROM workflow_versions
            WHERE workflow_id = $1
            ORDER BY version DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(snapshot.workflow_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        if latest.is_some_and(|v| v >= snapshot.version) {
            return Err(WorkflowError::Store {
                message: format!(
                    "snapshot version {} is not newer than stored history",
                    snapshot.version
                ),
            });
        }

        sqlx::query(
            r#"
            UPDATE workflow_versions
            SET is_active = FALSE, deprecated_at = $2
            WHERE workflow_id = $1 AND is_active
            "#,
        )
        .bind(snapshot.workflow_id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_versions
                (workflow_id, version, graph, note, change_summary, stats,
                 is_active, deprecated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(snapshot.workflow_id.to_string())
        .bind(snapshot.version)
        .bind(encode_json(&snapshot.graph))
        .bind(&snapshot.note)
        .bind(&snapshot.change_summary)
        .bind(encode_json(&snapshot.stats))
        .bind(snapshot.is_active)
        .bind(snapshot.deprecated_at)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)
    }

    async fn list(
        &self,
        workflow_id: WorkflowId,
        page: u32,
        per_page: u32,
    ) -> Result<SnapshotPage, WorkflowError> {
        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM workflow_versions WHERE workflow_id = $1"#,
        )
        .bind(workflow_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT * FROM workflow_versions
            WHERE workflow_id = $1
            ORDER BY version DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(i64::from(per_page))
        .bind(i64::from(page) * i64::from(per_page))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let snapshots = rows
            .into_iter()
            .map(|r| r.try_into_snapshot().map_err(store_err))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SnapshotPage {
            snapshots,
            page,
            per_page,
            total: total as u64,
        })
    }
}
