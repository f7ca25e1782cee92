//! Error types for execution records.

use crate::record::ExecutionStatus;
use flowline_core::ExecutionId;
use std::fmt;

/// Errors from execution record operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Execution not found.
    NotFound { execution_id: ExecutionId },
    /// The record is in a terminal status and cannot be mutated.
    TerminalImmutable {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
    /// Storage backend failure.
    Store { message: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::TerminalImmutable {
                execution_id,
                status,
            } => {
                write!(
                    f,
                    "execution {execution_id} is terminal ({}) and immutable",
                    status.as_str()
                )
            }
            Self::Store { message } => write!(f, "execution store error: {message}"),
        }
    }
}

impl std::error::Error for ExecutionError {}
