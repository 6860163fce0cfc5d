//! Curator server
//!
//! Serves the task REST API and runs the scheduled library scan.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curator::config::Config;
use curator::db::{Database, MAX_PARALLEL_TASKS_KEY};
use curator::scanner::ScanService;
use curator::services::FfmpegService;
use curator::tasks::{RegistryConfig, TaskRegistry};
use curator::workers::{TmdbProviderFactory, WorkerConfig, WorkerDispatcher};
use curator::{AppState, api, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Curator");

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        port = config.port,
        media_paths = ?config.media_paths,
        "Configuration loaded"
    );

    let db = Database::connect_and_sync(&config.database_url).await?;
    tracing::info!(url = db.url(), "Database connected");

    // The persisted setting wins over the environment default
    let max_parallel_tasks = db
        .settings()
        .get_or_default(MAX_PARALLEL_TASKS_KEY, config.max_parallel_tasks)
        .await?;
    let registry = TaskRegistry::new(RegistryConfig {
        max_parallel_tasks,
        retention: config.task_retention,
    });
    tracing::info!(
        max_parallel_tasks = registry.max_parallel_tasks(),
        retention_secs = config.task_retention.as_secs(),
        "Task registry initialized"
    );

    let scans = ScanService::new(
        registry.clone(),
        Arc::new(db.clone()),
        config.media_paths.clone(),
    );

    if config.tmdb_api_key.is_none() {
        tracing::warn!("TMDB_API_KEY not set, metadata tasks will fail");
    }
    let workers = WorkerDispatcher::new(
        registry.clone(),
        WorkerConfig::new(db.url(), config.metadata_item_delay)?,
        Arc::new(TmdbProviderFactory::new(config.tmdb_api_key.clone())),
    );

    let ffmpeg = Arc::new(FfmpegService::with_ffprobe_path(config.ffprobe_path.clone()));
    if !ffmpeg.is_available().await {
        tracing::warn!(path = %config.ffprobe_path, "ffprobe not found, file analysis will fail");
    }

    let _scheduler =
        jobs::start_scheduler(&config.scan_schedule, scans.clone(), registry.clone()).await?;

    let state = AppState {
        config: config.clone(),
        db,
        registry,
        scans,
        workers,
        ffmpeg,
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
