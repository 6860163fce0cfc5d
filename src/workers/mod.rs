//! Worker dispatcher
//!
//! Bulk metadata tasks run on their own OS thread with a private
//! current-thread runtime and database pool, so rate-limited provider calls
//! never block the HTTP runtime. The thread reports back over a message
//! channel; the dispatcher relays those messages into the task registry.

pub mod jobs;
pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::normalize_database_url;
use crate::tasks::{NewTask, TaskRegistry, TaskStatus, TaskTracker};
use jobs::{EXIT_PANICKED, WorkerContext, worker_main};
use messages::{WorkerMessage, progress_update};

pub use jobs::{ProviderFactory, TmdbProviderFactory, WorkerJob};
pub use messages::ProgressReporter;

/// Default delay between items inside a worker
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Absolute `sqlite:` URL the worker opens its own pool from
    pub database_url: String,
    pub item_delay: Duration,
}

impl WorkerConfig {
    /// Normalizes `database_url` so a relative path still points at the same
    /// file from inside the worker
    pub fn new(database_url: &str, item_delay: Duration) -> Result<Self> {
        Ok(Self {
            database_url: normalize_database_url(database_url)?,
            item_delay,
        })
    }
}

struct WorkerHandle {
    thread_name: String,
    terminate: Option<oneshot::Sender<()>>,
    started_at: DateTime<Utc>,
}

pub struct WorkerDispatcher {
    registry: TaskRegistry,
    config: WorkerConfig,
    factory: Arc<dyn ProviderFactory>,
    workers: Mutex<HashMap<Uuid, WorkerHandle>>,
}

impl WorkerDispatcher {
    pub fn new(
        registry: TaskRegistry,
        config: WorkerConfig,
        factory: Arc<dyn ProviderFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            factory,
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Create a task for `job` that runs in a worker thread once admitted
    pub fn submit(self: &Arc<Self>, job: WorkerJob) -> TaskTracker {
        let dispatcher = self.clone();
        let new = NewTask::new(job.task_type())
            .with_title(job.title())
            .with_total(job.known_total())
            .with_details(job.details());

        let tracker = self
            .registry
            .create_task(new, move |tracker| dispatcher.run_in_worker(tracker, job));

        info!(task_id = %tracker.id(), status = ?tracker.status(), "Worker task submitted");
        tracker
    }

    /// Run `job` for `tracker` in a worker thread.
    ///
    /// A pending task is handed back to the registry queue instead, so a
    /// thread is only ever spawned for a running task.
    pub fn run_in_worker(
        self: &Arc<Self>,
        tracker: TaskTracker,
        job: WorkerJob,
    ) -> BoxFuture<'static, Result<()>> {
        let dispatcher = self.clone();

        match tracker.status() {
            Some(TaskStatus::Pending) => {
                debug!(task_id = %tracker.id(), "Task still pending, deferring worker");
                let again = dispatcher.clone();
                dispatcher.registry.start(
                    tracker,
                    Box::new(move |t| again.run_in_worker(t, job)),
                );
                futures::future::ready(Ok(())).boxed()
            }
            Some(TaskStatus::Running) => dispatcher.execute(tracker, job).boxed(),
            status => {
                debug!(task_id = %tracker.id(), status = ?status, "Task not runnable, skipping worker");
                futures::future::ready(Ok(())).boxed()
            }
        }
    }

    /// Send the terminate signal to a task's worker
    pub fn terminate(&self, task_id: Uuid) -> bool {
        let mut workers = self.workers.lock();
        let Some(handle) = workers.get_mut(&task_id) else {
            return false;
        };

        match handle.terminate.take() {
            Some(tx) => {
                info!(
                    task_id = %task_id,
                    thread = %handle.thread_name,
                    running_for = ?(Utc::now() - handle.started_at),
                    "Terminating worker"
                );
                tx.send(()).is_ok()
            }
            None => false,
        }
    }

    /// Number of worker threads currently alive
    pub fn active_workers(&self) -> usize {
        self.workers.lock().len()
    }

    async fn execute(self: Arc<Self>, tracker: TaskTracker, job: WorkerJob) -> Result<()> {
        let task_id = tracker.id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (terminate_tx, terminate_rx) = oneshot::channel();

        let ctx = WorkerContext {
            database_url: self.config.database_url.clone(),
            item_delay: self.config.item_delay,
            factory: self.factory.clone(),
        };
        let thread_name = format!("worker-{}", &task_id.simple().to_string()[..8]);

        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_main(job, ctx, tx, terminate_rx))
            .context("Failed to spawn worker thread")?;

        self.workers.lock().insert(
            task_id,
            WorkerHandle {
                thread_name: thread_name.clone(),
                terminate: Some(terminate_tx),
                started_at: Utc::now(),
            },
        );
        info!(task_id = %task_id, thread = %thread_name, "Worker started");

        let cancel = tracker.cancellation_token();
        let mut terminal = false;
        let mut terminated = false;

        loop {
            tokio::select! {
                message = rx.recv() => {
                    // Every sender is gone: the thread has exited
                    let Some(message) = message else { break };
                    terminal |= message.is_terminal();

                    match message {
                        WorkerMessage::Progress { total, succeeded, failed, current_item, new_errors, .. } => {
                            tracker.update(progress_update(total, succeeded, failed, current_item, new_errors));
                        }
                        WorkerMessage::Complete => {
                            tracker.complete();
                        }
                        WorkerMessage::Fail { error } => {
                            error!(task_id = %task_id, error = %error, "Worker reported failure");
                            tracker.fail(error);
                        }
                    }
                }
                _ = cancel.cancelled(), if !terminated => {
                    terminated = true;
                    self.terminate(task_id);
                }
            }
        }

        let exit_code = tokio::task::spawn_blocking(move || thread.join().unwrap_or(EXIT_PANICKED))
            .await
            .unwrap_or(EXIT_PANICKED);
        self.workers.lock().remove(&task_id);

        if terminated {
            tracker.cancel();
            info!(task_id = %task_id, exit_code, "Worker cancelled");
        } else if !terminal {
            warn!(task_id = %task_id, exit_code, "Worker exited without reporting a result");
            tracker.fail(format!("Worker exited unexpectedly with code {exit_code}"));
        } else {
            debug!(task_id = %task_id, exit_code, "Worker exited");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MetadataProvider;
    use crate::tasks::RegistryConfig;
    use anyhow::bail;

    struct PanickingFactory;

    impl ProviderFactory for PanickingFactory {
        fn create(&self) -> Result<Box<dyn MetadataProvider>> {
            panic!("factory exploded");
        }
    }

    struct MissingKeyFactory;

    impl ProviderFactory for MissingKeyFactory {
        fn create(&self) -> Result<Box<dyn MetadataProvider>> {
            bail!("TMDB_API_KEY is not configured")
        }
    }

    async fn setup(factory: Arc<dyn ProviderFactory>) -> (tempfile::TempDir, Arc<WorkerDispatcher>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curator.db");
        crate::db::Database::connect_and_sync(path.to_str().unwrap())
            .await
            .unwrap();

        let registry = TaskRegistry::new(RegistryConfig::default());
        let config = WorkerConfig::new(path.to_str().unwrap(), Duration::ZERO).unwrap();
        (dir, WorkerDispatcher::new(registry, config, factory))
    }

    async fn wait_terminal(tracker: &TaskTracker) -> TaskStatus {
        for _ in 0..200 {
            if let Some(status) = tracker.status().filter(|s| s.is_terminal()) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("task did not finish");
    }

    #[test]
    fn test_config_normalizes_relative_path() {
        let config = WorkerConfig::new("data/curator.db", DEFAULT_ITEM_DELAY).unwrap();
        assert!(config.database_url.starts_with("sqlite:///"));
        assert!(config.database_url.ends_with("data/curator.db"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_configuration_fails_task() {
        let (_dir, dispatcher) = setup(Arc::new(MissingKeyFactory)).await;
        let tracker = dispatcher.submit(WorkerJob::SyncMissing);

        assert_eq!(wait_terminal(&tracker).await, TaskStatus::Failed);
        let state = tracker.snapshot().unwrap();
        assert!(state.error.unwrap().contains("TMDB_API_KEY"));
        assert_eq!(dispatcher.active_workers(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_worker_fails_with_exit_code() {
        let (_dir, dispatcher) = setup(Arc::new(PanickingFactory)).await;
        let tracker = dispatcher.submit(WorkerJob::SyncMissing);

        assert_eq!(wait_terminal(&tracker).await, TaskStatus::Failed);
        assert_eq!(
            tracker.snapshot().unwrap().error.as_deref(),
            Some("Worker exited unexpectedly with code 101")
        );
    }

    #[test]
    fn test_terminate_unknown_task() {
        let dispatcher = WorkerDispatcher::new(
            TaskRegistry::default(),
            WorkerConfig::new("sqlite::memory:", Duration::ZERO).unwrap(),
            Arc::new(MissingKeyFactory),
        );
        assert!(!dispatcher.terminate(Uuid::new_v4()));
    }
}
