//! Execution inspection and operator controls.

use super::error::ApiError;
use super::events::{DispatchResponse, IntakeResponse};
use super::{parse_id, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use flowline_core::ExecutionId;
use flowline_execution::{Execution, ExecutionLogEntry};

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    let id: ExecutionId = parse_id(&id, "execution id")?;
    Ok(Json(state.executions.get(id).await?))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExecutionLogEntry>>, ApiError> {
    let id: ExecutionId = parse_id(&id, "execution id")?;
    // A bad ID should read as a 404, not an empty log.
    state.executions.get(id).await?;
    Ok(Json(state.logs.read(id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ExecutionId = parse_id(&id, "execution id")?;
    state.engine.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ExecutionId = parse_id(&id, "execution id")?;
    state.engine.retry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn replay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IntakeResponse>), ApiError> {
    let id: ExecutionId = parse_id(&id, "execution id")?;
    let dispatch = state.engine.replay(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IntakeResponse {
            dispatches: vec![DispatchResponse::from(dispatch)],
        }),
    ))
}
