//! The admission gate run before any execution is created.
//!
//! Two checks, in order:
//! 1. concurrency ceiling — the tenant's count of pending and
//!    processing jobs must be under the configured maximum. This fails
//!    fast before any record exists, so a flooded tenant leaves no
//!    debris behind.
//! 2. monthly quota — the usage counter is atomically incremented and
//!    the post-increment value compared against the tier limit. The
//!    increment stays visible on denial; admission attempts count
//!    against the quota whether or not they are admitted, which is
//!    what makes the check race-safe.

use crate::error::AdmissionError;
use crate::limits::LimitCache;
use crate::usage::{period_key, UsageStore};
use chrono::Utc;
use flowline_core::TenantId;
use flowline_queue::JobStore;
use std::sync::Arc;

/// Default maximum pending + processing jobs per tenant.
pub const DEFAULT_MAX_ACTIVE_JOBS: u64 = 100;

/// Gatekeeper deciding whether a trigger may become an execution.
pub struct AdmissionController {
    jobs: Arc<dyn JobStore>,
    usage: Arc<dyn UsageStore>,
    limits: LimitCache,
    max_active_jobs: u64,
}

impl AdmissionController {
    /// Creates a controller with the default concurrency ceiling.
    #[must_use]
    pub fn new(jobs: Arc<dyn JobStore>, usage: Arc<dyn UsageStore>, limits: LimitCache) -> Self {
        Self::with_ceiling(jobs, usage, limits, DEFAULT_MAX_ACTIVE_JOBS)
    }

    /// Creates a controller with a custom concurrency ceiling.
    #[must_use]
    pub fn with_ceiling(
        jobs: Arc<dyn JobStore>,
        usage: Arc<dyn UsageStore>,
        limits: LimitCache,
        max_active_jobs: u64,
    ) -> Self {
        Self {
            jobs,
            usage,
            limits,
            max_active_jobs,
        }
    }

    /// Admits or rejects one prospective execution for a tenant.
    pub async fn admit(&self, tenant_id: TenantId) -> Result<(), AdmissionError> {
        let active = self.jobs.count_active(tenant_id).await?;
        if active >= self.max_active_jobs {
            tracing::warn!(%tenant_id, active, ceiling = self.max_active_jobs, "admission refused: queue full");
            return Err(AdmissionError::QueueFull {
                tenant_id,
                active,
                ceiling: self.max_active_jobs,
            });
        }

        let limits = self.limits.get(tenant_id).await?;
        let period = period_key(Utc::now());
        let used = self.usage.increment_and_get(tenant_id, &period).await?;
        if used > limits.monthly_executions {
            tracing::warn!(%tenant_id, used, limit = limits.monthly_executions, "admission refused: quota exceeded");
            return Err(AdmissionError::QuotaExceeded {
                tenant_id,
                used,
                limit: limits.monthly_executions,
            });
        }
        Ok(())
    }

    /// Drops the cached tier limits for a tenant.
    pub fn invalidate_limits(&self, tenant_id: TenantId) {
        self.limits.invalidate(tenant_id);
    }
}
