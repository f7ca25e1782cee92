//! Error types for the job queue.

use crate::job::JobStatus;
use flowline_core::JobId;
use std::fmt;

/// Errors from queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Job not found.
    NotFound { job_id: JobId },
    /// The operation is not valid for the job's current status.
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        operation: &'static str,
    },
    /// Manual retry refused: the job is processing and its lock is
    /// still fresh, so a live worker likely owns it.
    JobStillRunning { job_id: JobId },
    /// Storage backend failure.
    Store { message: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { job_id } => write!(f, "job not found: {job_id}"),
            Self::InvalidTransition {
                job_id,
                status,
                operation,
            } => {
                write!(
                    f,
                    "cannot {operation} job {job_id} in status {}",
                    status.as_str()
                )
            }
            Self::JobStillRunning { job_id } => {
                write!(f, "job {job_id} is still running on a live worker")
            }
            Self::Store { message } => write!(f, "job store error: {message}"),
        }
    }
}

impl std::error::Error for QueueError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display_names_operation() {
        let err = QueueError::InvalidTransition {
            job_id: JobId::new(),
            status: JobStatus::Completed,
            operation: "cancel",
        };
        let message = err.to_string();
        assert!(message.contains("cancel"));
        assert!(message.contains("completed"));
    }
}
