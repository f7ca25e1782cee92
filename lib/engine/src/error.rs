//! Engine-level errors wrapping the layer errors beneath.

use flowline_admission::AdmissionError;
use flowline_execution::ExecutionError;
use flowline_queue::QueueError;
use flowline_workflow::WorkflowError;
use std::fmt;

/// Errors from engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A workflow or snapshot operation failed.
    Workflow(WorkflowError),
    /// An execution record operation failed.
    Execution(ExecutionError),
    /// A queue operation failed.
    Queue(QueueError),
    /// Admission was refused or failed.
    Admission(AdmissionError),
    /// The workflow has no published snapshot to run against.
    NotPublished { workflow_id: flowline_core::WorkflowId },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow(err) => write!(f, "{err}"),
            Self::Execution(err) => write!(f, "{err}"),
            Self::Queue(err) => write!(f, "{err}"),
            Self::Admission(err) => write!(f, "{err}"),
            Self::NotPublished { workflow_id } => {
                write!(f, "workflow {workflow_id} has no published version")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<WorkflowError> for EngineError {
    fn from(err: WorkflowError) -> Self {
        Self::Workflow(err)
    }
}

impl From<ExecutionError> for EngineError {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(err)
    }
}

impl From<QueueError> for EngineError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

impl From<AdmissionError> for EngineError {
    fn from(err: AdmissionError) -> Self {
        Self::Admission(err)
    }
}
