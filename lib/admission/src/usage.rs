//! Per-tenant usage counters keyed by billing period.

use crate::error::AdmissionError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use flowline_core::TenantId;
use std::collections::HashMap;
use std::sync::Mutex;

/// The billing-period key for a point in time: `YYYY-MM` in UTC.
///
/// A new month starts a fresh counter; old periods are simply never
/// incremented again.
#[must_use]
pub fn period_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Durable per-tenant usage counters.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Atomically increments the tenant's counter for `period` and
    /// returns the value after the increment. The increment and read
    /// are one operation, so two racing callers see distinct values.
    async fn increment_and_get(
        &self,
        tenant_id: TenantId,
        period: &str,
    ) -> Result<u64, AdmissionError>;

    /// Reads the tenant's counter for `period` without incrementing.
    async fn current(&self, tenant_id: TenantId, period: &str) -> Result<u64, AdmissionError>;
}

/// Mutex-guarded counter map for tests and single-process use.
#[derive(Default)]
pub struct InMemoryUsageStore {
    counters: Mutex<HashMap<(TenantId, String), u64>>,
}

impl InMemoryUsageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment_and_get(
        &self,
        tenant_id: TenantId,
        period: &str,
    ) -> Result<u64, AdmissionError> {
        let mut counters = self.counters.lock().expect("usage store poisoned");
        let counter = counters.entry((tenant_id, period.to_string())).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn current(&self, tenant_id: TenantId, period: &str) -> Result<u64, AdmissionError> {
        let counters = self.counters.lock().expect("usage store poisoned");
        Ok(counters
            .get(&(tenant_id, period.to_string()))
            .copied()
            .unwrap_or(0))
    }
}
