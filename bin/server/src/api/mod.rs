//! HTTP API: workflow management, event intake, and execution control.

pub mod error;
pub mod events;
pub mod executions;
pub mod workflows;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use error::ApiError;
use flowline_core::TenantId;
use flowline_engine::{Engine, VersionManager};
use flowline_execution::{ExecutionStore, LogSink};
use flowline_queue::JobStore;
use flowline_workflow::{SnapshotStore, WorkflowStore};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Tenant identity header, set by the gateway in front of this
/// service.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub workflows: Arc<dyn WorkflowStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub jobs: Arc<dyn JobStore>,
    pub logs: Arc<dyn LogSink>,
    pub engine: Arc<Engine>,
    pub versions: Arc<VersionManager>,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/workflows", post(workflows::create).get(workflows::list))
        .route(
            "/api/workflows/{id}",
            get(workflows::get_one)
                .put(workflows::update)
                .delete(workflows::delete_one),
        )
        .route("/api/workflows/{id}/status", post(workflows::set_status))
        .route("/api/workflows/{id}/publish", post(workflows::publish))
        .route("/api/workflows/{id}/rollback", post(workflows::rollback))
        .route("/api/workflows/{id}/versions", get(workflows::history))
        .route("/api/workflows/{id}/executions", get(workflows::executions))
        .route("/api/workflows/{id}/run", post(events::run_manual))
        .route("/api/events/forms/{form_id}", post(events::form_submission))
        .route("/api/hooks/{*path}", post(events::webhook))
        .route("/api/executions/{id}", get(executions::get_one))
        .route("/api/executions/{id}/logs", get(executions::logs))
        .route("/api/executions/{id}/cancel", post(executions::cancel))
        .route("/api/executions/{id}/retry", post(executions::retry))
        .route("/api/executions/{id}/replay", post(executions::replay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Parses a prefixed ID path or body parameter.
pub(crate) fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(raw).map_err(|e| ApiError::invalid(format!("invalid {what} '{raw}': {e}")))
}

/// Reads the tenant identity from the request headers.
pub(crate) fn tenant_from_headers(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    let raw = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::invalid(format!("missing {TENANT_HEADER} header")))?;
    parse_id(raw, "tenant id")
}
