//! Endpoints that start background tasks

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::AppState;
use crate::jobs::submit_analysis;
use crate::tasks::{TaskStatus, TaskTracker};
use crate::workers::WorkerJob;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreatedResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

impl From<TaskTracker> for TaskCreatedResponse {
    fn from(tracker: TaskTracker) -> Self {
        Self {
            task_id: tracker.id(),
            // A task that finished before we looked still reports a status
            status: tracker.status().unwrap_or(TaskStatus::Completed),
        }
    }
}

type Created = (StatusCode, Json<TaskCreatedResponse>);

fn created(tracker: TaskTracker) -> Created {
    (StatusCode::ACCEPTED, Json(tracker.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowIdsRequest {
    pub show_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub scan_type: String,
    pub show_id: Option<Uuid>,
    pub status: String,
    pub files_scanned: i64,
    pub files_added: i64,
    pub files_updated: i64,
    pub files_deleted: i64,
    pub error_count: i64,
    pub started_at: String,
    pub completed_at: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

async fn start_library_scan(State(state): State<AppState>) -> Created {
    created(state.scans.submit_library_scan())
}

async fn start_show_scan(
    State(state): State<AppState>,
    Path(show_id): Path<Uuid>,
) -> ApiResult<Created> {
    let show = state
        .db
        .tv_shows()
        .get_by_id(show_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Show {show_id} not found")))?;

    Ok(created(state.scans.submit_show_scan(show.id, &show.name)))
}

fn require_show_ids(body: ShowIdsRequest) -> ApiResult<Vec<Uuid>> {
    if body.show_ids.is_empty() {
        return Err(ApiError::bad_request("showIds must not be empty"));
    }
    Ok(body.show_ids)
}

async fn start_bulk_match(
    State(state): State<AppState>,
    Json(body): Json<ShowIdsRequest>,
) -> ApiResult<Created> {
    let show_ids = require_show_ids(body)?;
    Ok(created(state.workers.submit(WorkerJob::BulkMatch { show_ids })))
}

async fn start_bulk_refresh(
    State(state): State<AppState>,
    Json(body): Json<ShowIdsRequest>,
) -> ApiResult<Created> {
    let show_ids = require_show_ids(body)?;
    Ok(created(state.workers.submit(WorkerJob::BulkRefresh { show_ids })))
}

async fn start_sync_missing(State(state): State<AppState>) -> Created {
    created(state.workers.submit(WorkerJob::SyncMissing))
}

async fn start_import(
    State(state): State<AppState>,
    Path(show_id): Path<Uuid>,
) -> ApiResult<Created> {
    if state.db.tv_shows().get_by_id(show_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Show {show_id} not found")));
    }
    Ok(created(state.workers.submit(WorkerJob::Import { show_id })))
}

async fn start_analysis(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> ApiResult<Created> {
    if state.db.media_files().get_by_id(file_id).await?.is_none() {
        return Err(ApiError::not_found(format!("Media file {file_id} not found")));
    }
    Ok(created(submit_analysis(
        &state.registry,
        state.db.clone(),
        state.ffmpeg.clone(),
        file_id,
    )))
}

async fn scan_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ScanHistoryEntry>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let records = state.db.scan_history().list_recent(limit).await?;

    Ok(Json(
        records
            .into_iter()
            .map(|r| ScanHistoryEntry {
                id: r.id,
                task_id: r.task_id,
                scan_type: r.scan_type,
                show_id: r.show_id,
                status: r.status,
                files_scanned: r.files_scanned,
                files_added: r.files_added,
                files_updated: r.files_updated,
                files_deleted: r.files_deleted,
                error_count: r.error_count,
                started_at: r.started_at.to_rfc3339(),
                completed_at: r.completed_at.to_rfc3339(),
            })
            .collect(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scans", post(start_library_scan))
        .route("/scans/history", get(scan_history))
        .route("/shows/{id}/scan", post(start_show_scan))
        .route("/shows/{id}/import", post(start_import))
        .route("/metadata/match", post(start_bulk_match))
        .route("/metadata/refresh", post(start_bulk_refresh))
        .route("/metadata/sync", post(start_sync_missing))
        .route("/files/{id}/analyze", post(start_analysis))
}
