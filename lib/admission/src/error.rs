//! Error types for admission decisions.

use flowline_core::TenantId;
use flowline_queue::QueueError;
use std::fmt;

/// Errors from the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The tenant already has too many jobs in flight.
    QueueFull {
        tenant_id: TenantId,
        active: u64,
        ceiling: u64,
    },
    /// The tenant's usage quota for the current period is exhausted.
    QuotaExceeded {
        tenant_id: TenantId,
        used: u64,
        limit: u64,
    },
    /// Storage backend failure.
    Store { message: String },
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull {
                tenant_id,
                active,
                ceiling,
            } => {
                write!(
                    f,
                    "queue full for tenant {tenant_id}: {active} active jobs (ceiling {ceiling})"
                )
            }
            Self::QuotaExceeded {
                tenant_id,
                used,
                limit,
            } => {
                write!(
                    f,
                    "quota exceeded for tenant {tenant_id}: {used} of {limit} executions used"
                )
            }
            Self::Store { message } => write!(f, "admission store error: {message}"),
        }
    }
}

impl std::error::Error for AdmissionError {}

impl From<QueueError> for AdmissionError {
    fn from(err: QueueError) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}
