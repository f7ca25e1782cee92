//! Workflow management handlers: CRUD, lifecycle, and version history.

use super::error::ApiError;
use super::{parse_id, tenant_from_headers, AppState};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use flowline_core::WorkflowId;
use flowline_execution::Execution;
use flowline_workflow::{
    SnapshotPage, Workflow, WorkflowGraph, WorkflowSettings, WorkflowSnapshot, WorkflowStatus,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Deserialize)]
pub struct CreateWorkflowRequest {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    if body.slug.is_empty() {
        return Err(ApiError::invalid("slug must not be empty"));
    }
    let mut workflow = Workflow::new(tenant_id, body.slug, body.name);
    workflow.description = body.description;
    state.workflows.create(&workflow).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    let tenant_id = tenant_from_headers(&headers)?;
    Ok(Json(state.workflows.list(tenant_id).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    Ok(Json(state.workflows.get(id).await?))
}

/// Partial update of the editable fields. Content edits (graph,
/// settings, variables) bump the version counter; metadata edits do
/// not.
#[derive(Deserialize, Default)]
pub struct UpdateWorkflowRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub graph: Option<WorkflowGraph>,
    #[serde(default)]
    pub settings: Option<WorkflowSettings>,
    #[serde(default)]
    pub variables: Option<BTreeMap<String, JsonValue>>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWorkflowRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    let mut workflow = state.workflows.get(id).await?;

    if let Some(name) = body.name {
        workflow.name = name;
    }
    if let Some(description) = body.description {
        workflow.description = description;
    }
    if let Some(graph) = body.graph {
        workflow.set_graph(graph);
    }
    if let Some(settings) = body.settings {
        workflow.set_settings(settings);
    }
    if let Some(variables) = body.variables {
        for (name, default) in variables {
            workflow.set_variable(name, default);
        }
    }

    state.workflows.update(&workflow).await?;
    Ok(Json(workflow))
}

pub async fn delete_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    state.workflows.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: WorkflowStatus,
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    let mut workflow = state.workflows.get(id).await?;
    workflow.transition(body.status)?;
    state.workflows.update(&workflow).await?;
    Ok(Json(workflow))
}

#[derive(Deserialize, Default)]
pub struct PublishRequest {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<WorkflowSnapshot>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    let snapshot = state.versions.publish(id, body.note).await?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
pub struct RollbackRequest {
    pub version: i64,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<WorkflowSnapshot>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    let snapshot = state.versions.rollback(id, body.version, body.note).await?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_per_page() -> u32 {
    20
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SnapshotPage>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    let page = state
        .versions
        .list_history(id, query.page, query.per_page.min(100))
        .await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let id: WorkflowId = parse_id(&id, "workflow id")?;
    // Confirm the workflow exists so a bad ID is a 404, not an empty list.
    state.workflows.get(id).await?;
    let executions = state
        .executions
        .list_for_workflow(id, query.limit.min(500))
        .await?;
    Ok(Json(executions))
}
