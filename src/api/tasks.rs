//! Task query, cancellation and concurrency settings endpoints

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::AppState;
use crate::db::MAX_PARALLEL_TASKS_KEY;
use crate::tasks::{MAX_PARALLEL_TASKS, MIN_PARALLEL_TASKS, SerializedTask};

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxParallelResponse {
    pub max_parallel_tasks: usize,
    pub min: usize,
    pub max: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxParallelRequest {
    pub max_parallel_tasks: i64,
}

/// Retained tasks, running first
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<SerializedTask>> {
    Json(state.registry.list_active())
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SerializedTask>> {
    state
        .registry
        .get_serialized(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Task {id} not found")))
}

/// Request cancellation; `cancelled` is false for unknown or finished tasks
async fn cancel_task(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<CancelResponse> {
    let cancelled = state.registry.request_cancellation(id);
    info!(task_id = %id, cancelled, "Cancellation requested");
    Json(CancelResponse { cancelled })
}

fn max_parallel_response(value: usize) -> Json<MaxParallelResponse> {
    Json(MaxParallelResponse {
        max_parallel_tasks: value,
        min: MIN_PARALLEL_TASKS,
        max: MAX_PARALLEL_TASKS,
    })
}

async fn get_max_parallel(State(state): State<AppState>) -> Json<MaxParallelResponse> {
    max_parallel_response(state.registry.max_parallel_tasks())
}

/// Clamp, apply and persist the concurrency limit
async fn set_max_parallel(
    State(state): State<AppState>,
    Json(body): Json<MaxParallelRequest>,
) -> ApiResult<Json<MaxParallelResponse>> {
    let applied = state
        .registry
        .set_max_parallel_tasks(body.max_parallel_tasks);
    state
        .db
        .settings()
        .set(MAX_PARALLEL_TASKS_KEY, applied as i64)
        .await?;

    info!(
        requested = body.max_parallel_tasks,
        applied, "Max parallel tasks updated"
    );
    Ok(max_parallel_response(applied))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route(
            "/settings/max-parallel-tasks",
            get(get_max_parallel).put(set_max_parallel),
        )
}
