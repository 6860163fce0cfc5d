//! REST API tests against the full router

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use curator::config::Config;
use curator::db::{Database, MAX_PARALLEL_TASKS_KEY};
use curator::scanner::ScanService;
use curator::services::FfmpegService;
use curator::tasks::{RegistryConfig, TaskRegistry};
use curator::workers::{TmdbProviderFactory, WorkerConfig, WorkerDispatcher};
use curator::{AppState, api};

fn test_config(media_paths: Vec<PathBuf>) -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        media_paths,
        tmdb_api_key: None,
        ffprobe_path: "ffprobe".to_string(),
        max_parallel_tasks: 2,
        task_retention: Duration::from_secs(3600),
        metadata_item_delay: Duration::ZERO,
        scan_schedule: "0 0 * * * *".to_string(),
    }
}

async fn app(media_paths: Vec<PathBuf>) -> (Router, AppState) {
    let config = Arc::new(test_config(media_paths));
    let db = Database::connect_and_sync(&config.database_url).await.unwrap();
    let registry = TaskRegistry::new(RegistryConfig::default());
    let scans = ScanService::new(
        registry.clone(),
        Arc::new(db.clone()),
        config.media_paths.clone(),
    );
    let workers = WorkerDispatcher::new(
        registry.clone(),
        WorkerConfig::new(db.url(), Duration::ZERO).unwrap(),
        Arc::new(TmdbProviderFactory::new(None)),
    );

    let state = AppState {
        config,
        db,
        registry,
        scans,
        workers,
        ffmpeg: Arc::new(FfmpegService::default()),
    };
    (api::router(state.clone()), state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_healthz() {
    let (app, _) = app(Vec::new()).await;
    let (status, body) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let (app, _) = app(Vec::new()).await;
    let (status, body) = send(&app, "GET", &format!("/api/tasks/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);
}

#[tokio::test]
async fn test_scan_creates_pollable_task() {
    let library = tempfile::tempdir().unwrap();
    std::fs::write(library.path().join("Bluey S01E01.mkv"), b"x").unwrap();
    let (app, _) = app(vec![library.path().to_path_buf()]).await;

    let (status, body) = send(&app, "POST", "/api/scans", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "running");
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let mut task = Value::Null;
    for _ in 0..200 {
        let (_, body) = send(&app, "GET", &format!("/api/tasks/{task_id}"), None).await;
        task = body;
        if task["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(task["status"], "completed");
    assert_eq!(task["type"], "scan");
    assert_eq!(task["processed"], 1);
    assert_eq!(task["filesAdded"], 1);

    let (_, list) = send(&app, "GET", "/api/tasks", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, history) = send(&app, "GET", "/api/scans/history", None).await;
    assert_eq!(history[0]["taskId"], task_id.as_str());
}

#[tokio::test]
async fn test_cancel_finished_or_unknown_task() {
    let (app, _) = app(Vec::new()).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/tasks/{}/cancel", Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn test_max_parallel_setting_is_clamped_and_persisted() {
    let (app, state) = app(Vec::new()).await;

    let (status, body) = send(
        &app,
        "PUT",
        "/api/settings/max-parallel-tasks",
        Some(json!({ "maxParallelTasks": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["maxParallelTasks"], 10);
    assert_eq!(state.registry.max_parallel_tasks(), 10);

    let stored: Option<i64> = state
        .db
        .settings()
        .get_value(MAX_PARALLEL_TASKS_KEY)
        .await
        .unwrap();
    assert_eq!(stored, Some(10));

    let (_, body) = send(
        &app,
        "PUT",
        "/api/settings/max-parallel-tasks",
        Some(json!({ "maxParallelTasks": 0 })),
    )
    .await;
    assert_eq!(body["maxParallelTasks"], 1);
}

#[tokio::test]
async fn test_metadata_match_requires_show_ids() {
    let (app, _) = app(Vec::new()).await;
    let (status, _) = send(
        &app,
        "POST",
        "/api/metadata/match",
        Some(json!({ "showIds": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_show_and_file_are_404() {
    let (app, _) = app(Vec::new()).await;
    let id = Uuid::new_v4();

    let (status, _) = send(&app, "POST", &format!("/api/shows/{id}/scan"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", &format!("/api/shows/{id}/import"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", &format!("/api/files/{id}/analyze"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
