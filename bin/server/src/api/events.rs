//! Event intake: form submissions, webhooks, and manual runs.
//!
//! Intake is fire-and-forget. A successful response means execution
//! records and jobs exist; the runs themselves happen on the worker
//! pool. Zero matches is a success with an empty dispatch list.

use super::error::ApiError;
use super::{parse_id, tenant_from_headers, AppState};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use flowline_core::{ExecutionId, JobId, WorkflowId};
use flowline_engine::Dispatch;
use flowline_workflow::{TriggerEvent, TriggerKind};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::net::SocketAddr;

#[derive(Serialize)]
pub struct DispatchResponse {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub job_id: JobId,
}

impl From<Dispatch> for DispatchResponse {
    fn from(d: Dispatch) -> Self {
        Self {
            workflow_id: d.workflow_id,
            execution_id: d.execution_id,
            job_id: d.job_id,
        }
    }
}

#[derive(Serialize)]
pub struct IntakeResponse {
    pub dispatches: Vec<DispatchResponse>,
}

async fn intake(
    state: &AppState,
    headers: &HeaderMap,
    remote_addr: SocketAddr,
    kind: TriggerKind,
    source: String,
    payload: JsonValue,
) -> Result<(StatusCode, Json<IntakeResponse>), ApiError> {
    let tenant_id = tenant_from_headers(headers)?;
    let mut event = TriggerEvent::new(kind, source, payload);
    event.meta.remote_addr = Some(remote_addr.to_string());

    let dispatches = state.engine.handle_event(tenant_id, event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IntakeResponse {
            dispatches: dispatches.into_iter().map(Into::into).collect(),
        }),
    ))
}

pub async fn form_submission(
    State(state): State<AppState>,
    Path(form_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> Result<(StatusCode, Json<IntakeResponse>), ApiError> {
    intake(
        &state,
        &headers,
        addr,
        TriggerKind::FormSubmission,
        form_id,
        payload,
    )
    .await
}

pub async fn webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<JsonValue>,
) -> Result<(StatusCode, Json<IntakeResponse>), ApiError> {
    // Trigger configs store the full hook path.
    let source = format!("/hooks/{path}");
    intake(&state, &headers, addr, TriggerKind::Webhook, source, payload).await
}

pub async fn run_manual(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<JsonValue>,
) -> Result<(StatusCode, Json<IntakeResponse>), ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    // Manual runs are scoped by the workflow itself, not a header.
    let workflow = state.workflows.get(id).await?;

    let mut event = TriggerEvent::new(TriggerKind::Manual, id.to_string(), payload);
    event.meta.remote_addr = Some(addr.to_string());

    let dispatches = state.engine.handle_event(workflow.tenant_id, event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IntakeResponse {
            dispatches: dispatches.into_iter().map(Into::into).collect(),
        }),
    ))
}
