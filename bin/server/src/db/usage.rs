//! Usage counters and tenant limits.

use async_trait::async_trait;
use flowline_admission::{AdmissionError, LimitSource, TenantLimits, UsageStore};
use flowline_core::TenantId;
use sqlx::PgPool;

fn store_err(err: sqlx::Error) -> AdmissionError {
    AdmissionError::Store {
        message: err.to_string(),
    }
}

/// Postgres-backed [`UsageStore`] over the `usage_counters` table.
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn increment_and_get(
        &self,
        tenant_id: TenantId,
        period: &str,
    ) -> Result<u64, AdmissionError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO usage_counters (tenant_id, period, count)
            VALUES ($1, $2, 1)
            ON CONFLICT (tenant_id, period)
            DO UPDATE SET count = usage_counters.count + 1
            RETURNING count
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(period)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count as u64)
    }

    async fn current(&self, tenant_id: TenantId, period: &str) -> Result<u64, AdmissionError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(
                (SELECT count FROM usage_counters WHERE tenant_id = $1 AND period = $2),
                0
            )
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(period)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(count as u64)
    }
}

/// Limit source backed by the `tenant_limits` table, with a configured
/// default for tenants that have no row yet.
pub struct PgLimitSource {
    pool: PgPool,
    default_monthly_executions: u64,
}

impl PgLimitSource {
    #[must_use]
    pub fn new(pool: PgPool, default_monthly_executions: u64) -> Self {
        Self {
            pool,
            default_monthly_executions,
        }
    }
}

#[async_trait]
impl LimitSource for PgLimitSource {
    async fn fetch(&self, tenant_id: TenantId) -> Result<TenantLimits, AdmissionError> {
        let row: Option<(i64,)> =
            sqlx::query_as(r#"SELECT monthly_executions FROM tenant_limits WHERE tenant_id = $1"#)
                .bind(tenant_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(TenantLimits {
            monthly_executions: row
                .map(|(limit,)| limit as u64)
                .unwrap_or(self.default_monthly_executions),
        })
    }
}
