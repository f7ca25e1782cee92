//! Tenant tier limits with an explicit, invalidatable cache.
//!
//! The cache is an owned object handed to whoever needs it, never a
//! process-wide singleton, so tests construct their own and plan
//! changes take effect through an explicit `invalidate` call rather
//! than a process restart.

use crate::error::AdmissionError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flowline_core::TenantId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Limits attached to a tenant's billing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantLimits {
    /// Executions allowed per billing period.
    pub monthly_executions: u64,
}

/// Source of truth for tenant limits (a billing table, in practice).
#[async_trait]
pub trait LimitSource: Send + Sync {
    /// Fetches the limits for a tenant.
    async fn fetch(&self, tenant_id: TenantId) -> Result<TenantLimits, AdmissionError>;
}

/// A limit source returning the same limits for every tenant.
pub struct FixedLimitSource {
    limits: TenantLimits,
}

impl FixedLimitSource {
    #[must_use]
    pub fn new(limits: TenantLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl LimitSource for FixedLimitSource {
    async fn fetch(&self, _tenant_id: TenantId) -> Result<TenantLimits, AdmissionError> {
        Ok(self.limits)
    }
}

struct CachedLimits {
    limits: TenantLimits,
    fetched_at: DateTime<Utc>,
}

/// TTL cache in front of a [`LimitSource`].
pub struct LimitCache {
    source: Arc<dyn LimitSource>,
    ttl: Duration,
    entries: Mutex<HashMap<TenantId, CachedLimits>>,
}

impl LimitCache {
    /// Creates a cache over `source` whose entries live for `ttl`.
    #[must_use]
    pub fn new(source: Arc<dyn LimitSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the tenant's limits, fetching through the source when
    /// the cached entry is missing or older than the TTL.
    pub async fn get(&self, tenant_id: TenantId) -> Result<TenantLimits, AdmissionError> {
        let now = Utc::now();
        {
            let entries = self.entries.lock().expect("limit cache poisoned");
            if let Some(cached) = entries.get(&tenant_id) {
                if now - cached.fetched_at < self.ttl {
                    return Ok(cached.limits);
                }
            }
        }

        let limits = self.source.fetch(tenant_id).await?;
        self.entries
            .lock()
            .expect("limit cache poisoned")
            .insert(
                tenant_id,
                CachedLimits {
                    limits,
                    fetched_at: now,
                },
            );
        Ok(limits)
    }

    /// Drops the cached entry for a tenant so the next `get` refetches
    /// (called when a plan changes).
    pub fn invalidate(&self, tenant_id: TenantId) {
        self.entries
            .lock()
            .expect("limit cache poisoned")
            .remove(&tenant_id);
    }
}
