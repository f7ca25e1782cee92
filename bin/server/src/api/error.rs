//! HTTP error mapping for the API.
//!
//! Domain errors are converted into a small, stable set of response
//! shapes: a status code plus a JSON body with a machine-readable
//! `error` code and a human-readable `message`. Store failures are
//! logged server-side and reported as opaque 500s.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowline_admission::AdmissionError;
use flowline_engine::EngineError;
use flowline_execution::ExecutionError;
use flowline_queue::QueueError;
use flowline_workflow::WorkflowError;
use serde_json::json;

/// An API-facing error: status code, stable code, and message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "storage failure");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match &err {
            WorkflowError::NotFound { .. } | WorkflowError::VersionNotFound { .. } => {
                Self::not_found(err.to_string())
            }
            WorkflowError::SlugTaken { .. } => Self::conflict("slug_taken", err.to_string()),
            WorkflowError::InvalidStateTransition { .. } => {
                Self::conflict("invalid_transition", err.to_string())
            }
            WorkflowError::DeleteWhileActive { .. } => {
                Self::conflict("workflow_active", err.to_string())
            }
            WorkflowError::RollbackToActiveVersion { .. } => {
                Self::conflict("rollback_to_active", err.to_string())
            }
            WorkflowError::Graph(_) => Self::invalid(err.to_string()),
            WorkflowError::Store { message } => Self::internal(message.clone()),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        match &err {
            ExecutionError::NotFound { .. } => Self::not_found(err.to_string()),
            ExecutionError::TerminalImmutable { .. } => {
                Self::conflict("execution_terminal", err.to_string())
            }
            ExecutionError::Store { message } => Self::internal(message.clone()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match &err {
            QueueError::NotFound { .. } => Self::not_found(err.to_string()),
            QueueError::InvalidTransition { .. } => {
                Self::conflict("invalid_transition", err.to_string())
            }
            QueueError::JobStillRunning { .. } => {
                Self::conflict("job_still_running", err.to_string())
            }
            QueueError::Store { message } => Self::internal(message.clone()),
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match &err {
            AdmissionError::QueueFull { .. } => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "queue_full",
                err.to_string(),
            ),
            AdmissionError::QuotaExceeded { .. } => {
                Self::new(StatusCode::FORBIDDEN, "quota_exceeded", err.to_string())
            }
            AdmissionError::Store { message } => Self::internal(message.clone()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Workflow(e) => e.into(),
            EngineError::Execution(e) => e.into(),
            EngineError::Queue(e) => e.into(),
            EngineError::Admission(e) => e.into(),
            EngineError::NotPublished { .. } => {
                Self::conflict("not_published", err.to_string())
            }
        }
    }
}
