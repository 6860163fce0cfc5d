//! Curator - background task core of a self-hosted TV library dashboard
//!
//! Library scans, bulk metadata sync and per-file analysis run as tracked
//! background tasks. Every task goes through one [tasks::TaskRegistry],
//! which enforces the concurrency limit, queues the overflow and keeps a
//! pollable snapshot of progress.

pub mod api;
pub mod config;
pub mod db;
pub mod jobs;
pub mod scanner;
pub mod services;
pub mod tasks;
pub mod workers;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::scanner::ScanService;
use crate::services::FfmpegService;
use crate::tasks::TaskRegistry;
use crate::workers::WorkerDispatcher;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub registry: TaskRegistry,
    pub scans: ScanService,
    pub workers: Arc<WorkerDispatcher>,
    pub ffmpeg: Arc<FfmpegService>,
}
