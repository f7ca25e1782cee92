//! Admission gate for flowline: per-tenant concurrency ceiling and
//! billing-period usage quota, checked before an execution is created.

pub mod controller;
pub mod error;
pub mod limits;
pub mod usage;

pub use controller::{AdmissionController, DEFAULT_MAX_ACTIVE_JOBS};
pub use error::AdmissionError;
pub use limits::{FixedLimitSource, LimitCache, LimitSource, TenantLimits};
pub use usage::{period_key, InMemoryUsageStore, UsageStore};
