//! In-memory task registry with admission control
//!
//! Every task lives here from creation until its retention window expires.
//! The registry owns the concurrency limit: a task is admitted as `running`
//! only while a slot is free and nobody is queued ahead of it, otherwise it
//! waits as `pending` in a FIFO queue that is drained whenever a task
//! reaches a terminal state or the limit is raised.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{AdmissionQueue, DEFAULT_PARALLEL_TASKS, TaskRun, clamp_parallel_limit};
use super::tracker::TaskTracker;
use super::types::{NewTask, SerializedTask, TaskState, TaskStatus, TaskType};

/// Default time a finished task stays visible
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Requested concurrency limit (clamped to 1..=10)
    pub max_parallel_tasks: i64,
    /// How long terminal tasks are kept before being purged
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: DEFAULT_PARALLEL_TASKS as i64,
            retention: DEFAULT_TASK_RETENTION,
        }
    }
}

struct TaskEntry {
    sender: watch::Sender<TaskState>,
    cancel: CancellationToken,
}

impl TaskEntry {
    fn status(&self) -> TaskStatus {
        self.sender.borrow().status
    }
}

struct RegistryState {
    tasks: HashMap<Uuid, TaskEntry>,
    queue: AdmissionQueue,
    max_parallel: usize,
}

impl RegistryState {
    fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status() == status).count()
    }

    /// Move a non-terminal task to a terminal status.
    ///
    /// Must be followed by [TaskRegistry::after_finish] once the lock is released.
    fn finish(&mut self, task_id: Uuid, status: TaskStatus, error: Option<String>) -> bool {
        let Some(entry) = self.tasks.get(&task_id) else {
            return false;
        };
        let previous = entry.status();
        if previous.is_terminal() {
            return false;
        }

        entry.sender.send_modify(|state| state.finish(status, error));
        if status == TaskStatus::Cancelled {
            entry.cancel.cancel();
        }
        if previous == TaskStatus::Pending {
            self.queue.remove(task_id);
        }
        true
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    retention: Duration,
}

/// Shared handle to the task registry. Cloning is cheap.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl TaskRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    tasks: HashMap::new(),
                    queue: AdmissionQueue::default(),
                    max_parallel: clamp_parallel_limit(config.max_parallel_tasks),
                }),
                retention: config.retention,
            }),
        }
    }

    /// Create a task, admitting it as `running` if a slot is free.
    ///
    /// The returned tracker is the only way work reports progress. Call
    /// [TaskRegistry::start] to attach the work itself.
    pub fn create(&self, new: NewTask) -> TaskTracker {
        let task_id = Uuid::new_v4();
        let task_type = new.task_type;

        let status = {
            let mut state = self.inner.state.lock();
            let admit = state.count(TaskStatus::Running) < state.max_parallel
                && state.count(TaskStatus::Pending) == 0;
            let status = if admit {
                TaskStatus::Running
            } else {
                TaskStatus::Pending
            };

            let (sender, _) = watch::channel(TaskState::new(task_id, new, status));
            state.tasks.insert(
                task_id,
                TaskEntry {
                    sender,
                    cancel: CancellationToken::new(),
                },
            );
            status
        };

        info!(task_id = %task_id, task_type = %task_type, status = %status, "Task created");
        TaskTracker::new(task_id, self.clone())
    }

    /// Attach work to a created task.
    ///
    /// Running tasks start immediately; pending tasks are queued and run when
    /// promoted. Work for a task that already finished is dropped.
    pub fn start(&self, tracker: TaskTracker, run: TaskRun) {
        let task_id = tracker.id();
        let status = self.status(task_id);

        match status {
            Some(TaskStatus::Running) => self.spawn_run(tracker, run),
            Some(TaskStatus::Pending) => {
                let queued = {
                    let mut state = self.inner.state.lock();
                    state.queue.push(task_id, run);
                    state.queue.len()
                };
                debug!(task_id = %task_id, queued, "Task queued");
                self.schedule_drain();
            }
            _ => {
                debug!(task_id = %task_id, status = ?status, "Task is not runnable, dropping its work");
            }
        }
    }

    /// Create a task and attach its work in one step
    pub fn create_task<F, Fut>(&self, new: NewTask, run: F) -> TaskTracker
    where
        F: FnOnce(TaskTracker) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let tracker = self.create(new);
        self.start(tracker.clone(), Box::new(move |t| run(t).boxed()));
        tracker
    }

    /// Ask a task to stop.
    ///
    /// Pending tasks are cancelled on the spot and their work never runs.
    /// Running tasks have their cancellation token tripped and reach
    /// `cancelled` when the work notices. Returns false for unknown or
    /// already finished tasks.
    pub fn request_cancellation(&self, task_id: Uuid) -> bool {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.tasks.get(&task_id) else {
            return false;
        };

        match entry.status() {
            TaskStatus::Pending => {
                let finished = state.finish(task_id, TaskStatus::Cancelled, None);
                drop(state);
                if finished {
                    self.after_finish(task_id, TaskStatus::Cancelled);
                }
                true
            }
            TaskStatus::Running => {
                entry.cancel.cancel();
                drop(state);
                info!(task_id = %task_id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Change the concurrency limit. Returns the clamped value in effect.
    pub fn set_max_parallel_tasks(&self, requested: i64) -> usize {
        let limit = clamp_parallel_limit(requested);
        self.inner.state.lock().max_parallel = limit;
        info!(requested, limit, "Max parallel tasks updated");
        self.drain();
        limit
    }

    pub fn max_parallel_tasks(&self) -> usize {
        self.inner.state.lock().max_parallel
    }

    pub fn get(&self, task_id: Uuid) -> Option<TaskTracker> {
        self.inner
            .state
            .lock()
            .tasks
            .contains_key(&task_id)
            .then(|| TaskTracker::new(task_id, self.clone()))
    }

    pub fn snapshot(&self, task_id: Uuid) -> Option<TaskState> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.sender.borrow().clone())
    }

    pub fn get_serialized(&self, task_id: Uuid) -> Option<SerializedTask> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.sender.borrow().serialize())
    }

    /// All retained tasks: running first, then pending, then finished;
    /// most recent first within each group.
    pub fn list_active(&self) -> Vec<SerializedTask> {
        let mut states: Vec<TaskState> = self
            .inner
            .state
            .lock()
            .tasks
            .values()
            .map(|entry| entry.sender.borrow().clone())
            .collect();

        states.sort_by(|a, b| {
            a.status
                .list_rank()
                .cmp(&b.status.list_rank())
                .then_with(|| b.started_at.cmp(&a.started_at))
        });
        states.iter().map(TaskState::serialize).collect()
    }

    /// Whether a task of this type is pending or running
    pub fn has_active(&self, task_type: TaskType) -> bool {
        self.inner.state.lock().tasks.values().any(|entry| {
            let state = entry.sender.borrow();
            state.task_type == task_type && !state.status.is_terminal()
        })
    }

    pub(crate) fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(TaskEntry::status)
    }

    pub(crate) fn subscribe(&self, task_id: Uuid) -> Option<watch::Receiver<TaskState>> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.sender.subscribe())
    }

    pub(crate) fn cancellation_token(&self, task_id: Uuid) -> Option<CancellationToken> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(|entry| entry.cancel.clone())
    }

    /// Mutate a non-terminal task and notify subscribers.
    /// Returns false if the task is gone or already finished.
    pub(crate) fn modify(&self, task_id: Uuid, f: impl FnOnce(&mut TaskState)) -> bool {
        let state = self.inner.state.lock();
        let Some(entry) = state.tasks.get(&task_id) else {
            return false;
        };
        entry.sender.send_if_modified(|task| {
            if task.status.is_terminal() {
                return false;
            }
            f(task);
            true
        })
    }

    /// Terminal transition. Only the first call for a task has any effect.
    pub(crate) fn finish(&self, task_id: Uuid, status: TaskStatus, error: Option<String>) -> bool {
        let finished = self.inner.state.lock().finish(task_id, status, error);
        if finished {
            self.after_finish(task_id, status);
        }
        finished
    }

    fn after_finish(&self, task_id: Uuid, status: TaskStatus) {
        info!(task_id = %task_id, status = %status, "Task finished");
        self.schedule_drain();
        self.schedule_purge(task_id);
    }

    /// Promote queued tasks on a fresh runtime task, never on the stack of
    /// the task that just finished.
    fn schedule_drain(&self) {
        match Handle::try_current() {
            Ok(handle) => {
                let registry = self.clone();
                handle.spawn(async move { registry.drain() });
            }
            Err(_) => debug!("No async runtime, queued tasks stay pending"),
        }
    }

    fn drain(&self) {
        if Handle::try_current().is_err() {
            return;
        }

        let promoted: Vec<(Uuid, TaskRun)> = {
            let mut state = self.inner.state.lock();
            let mut running = state.count(TaskStatus::Running);
            let mut promoted = Vec::new();

            while running < state.max_parallel {
                let Some(entry) = state.queue.pop() else {
                    break;
                };
                let Some(task) = state.tasks.get(&entry.task_id) else {
                    continue;
                };
                if task.status() != TaskStatus::Pending {
                    continue;
                }

                task.sender.send_modify(|s| {
                    s.status = TaskStatus::Running;
                    s.started_at = Utc::now();
                });
                running += 1;
                promoted.push((entry.task_id, entry.run));
            }
            promoted
        };

        for (task_id, run) in promoted {
            info!(task_id = %task_id, "Queued task promoted to running");
            self.spawn_run(TaskTracker::new(task_id, self.clone()), run);
        }
    }

    /// Run the work for a running task and settle its outcome.
    ///
    /// `Ok` on a task the work left open completes it, `Err` or a panic fails
    /// it, and either outcome after a cancellation request cancels it.
    fn spawn_run(&self, tracker: TaskTracker, run: TaskRun) {
        let Ok(handle) = Handle::try_current() else {
            warn!(task_id = %tracker.id(), "No async runtime to run task");
            tracker.fail("No async runtime available to run task");
            return;
        };

        handle.spawn(async move {
            let work = tracker.clone();
            let outcome = AssertUnwindSafe(async move { run(work).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(_) if tracker.is_cancellation_requested() => {
                    tracker.cancel();
                }
                Ok(Ok(())) => {
                    tracker.complete();
                }
                Ok(Err(e)) => {
                    error!(task_id = %tracker.id(), error = %format!("{e:#}"), "Task failed");
                    tracker.fail(format!("{e:#}"));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(task_id = %tracker.id(), panic = %message, "Task panicked");
                    tracker.fail(format!("Task panicked: {message}"));
                }
            }
        });
    }

    fn schedule_purge(&self, task_id: Uuid) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let retention = self.inner.retention;

        handle.spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(inner) = registry.upgrade() {
                if inner.state.lock().tasks.remove(&task_id).is_some() {
                    debug!(task_id = %task_id, "Task purged");
                }
            }
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn registry(max: i64) -> TaskRegistry {
        TaskRegistry::new(RegistryConfig {
            max_parallel_tasks: max,
            retention: Duration::from_secs(60),
        })
    }

    async fn wait_for_status(tracker: &TaskTracker, status: TaskStatus) {
        let mut rx = tracker.subscribe().expect("task exists");
        timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == status))
            .await
            .expect("timed out waiting for status")
            .expect("registry dropped");
    }

    /// Work that blocks until the returned sender fires
    fn gated() -> (
        oneshot::Sender<()>,
        impl FnOnce(TaskTracker) -> futures::future::BoxFuture<'static, anyhow::Result<()>> + Send,
    ) {
        let (tx, rx) = oneshot::channel::<()>();
        let run = move |_t: TaskTracker| {
            async move {
                let _ = rx.await;
                Ok(())
            }
            .boxed()
        };
        (tx, run)
    }

    #[tokio::test]
    async fn test_admission_respects_limit() {
        let registry = registry(2);
        let a = registry.create(NewTask::new(TaskType::Scan));
        let b = registry.create(NewTask::new(TaskType::MetadataSync));
        let c = registry.create(NewTask::new(TaskType::BulkMetadataMatch));

        assert_eq!(a.status(), Some(TaskStatus::Running));
        assert_eq!(b.status(), Some(TaskStatus::Running));
        assert_eq!(c.status(), Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_queued_tasks_promote_in_fifo_order() {
        let registry = registry(1);
        let (tx1, run1) = gated();
        let (_tx2, run2) = gated();
        let (_tx3, run3) = gated();

        let first = registry.create_task(NewTask::new(TaskType::Scan), run1);
        let second = registry.create_task(NewTask::new(TaskType::Scan), run2);
        let third = registry.create_task(NewTask::new(TaskType::Scan), run3);
        assert_eq!(second.status(), Some(TaskStatus::Pending));

        tx1.send(()).unwrap();
        wait_for_status(&first, TaskStatus::Completed).await;
        wait_for_status(&second, TaskStatus::Running).await;
        assert_eq!(third.status(), Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_cancel_pending_never_runs() {
        let registry = registry(1);
        let (_tx, run) = gated();
        registry.create_task(NewTask::new(TaskType::Scan), run);

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();
        let pending = registry.create_task(NewTask::new(TaskType::Scan), move |_| async move {
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        });

        assert!(registry.request_cancellation(pending.id()));
        assert_eq!(pending.status(), Some(TaskStatus::Cancelled));
        assert!(!registry.request_cancellation(pending.id()));

        registry.set_max_parallel_tasks(5);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_running_trips_token() {
        let registry = registry(2);
        let task = registry.create_task(NewTask::new(TaskType::Scan), |t| async move {
            t.cancellation_token().cancelled().await;
            anyhow::Ok(())
        });

        assert!(registry.request_cancellation(task.id()));
        wait_for_status(&task, TaskStatus::Cancelled).await;
        assert!(!registry.request_cancellation(task.id()));
        assert!(!registry.request_cancellation(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_errors_and_panics_fail_the_task() {
        let registry = registry(4);
        let erroring = registry.create_task(NewTask::new(TaskType::MetadataSync), |_| async {
            Err::<(), _>(anyhow::anyhow!("provider unreachable"))
        });
        let panicking = registry.create_task(NewTask::new(TaskType::MetadataSync), |_| async {
            if true {
                panic!("boom");
            }
            anyhow::Ok(())
        });

        wait_for_status(&erroring, TaskStatus::Failed).await;
        wait_for_status(&panicking, TaskStatus::Failed).await;

        let state = erroring.snapshot().unwrap();
        assert_eq!(state.error.as_deref(), Some("provider unreachable"));
        assert_eq!(state.errors.last().map(|e| e.item.as_str()), Some("task"));
        assert!(panicking.snapshot().unwrap().error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_terminal_transitions_fire_once() {
        let registry = registry(2);
        let task = registry.create(NewTask::new(TaskType::Scan));

        assert!(task.complete());
        assert!(!task.complete());
        assert!(!task.fail("late"));
        assert!(!task.cancel());

        let state = task.snapshot().unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert!(state.error.is_none());
        assert!(state.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_raising_limit_promotes_immediately() {
        let registry = registry(1);
        let (_tx1, run1) = gated();
        let (_tx2, run2) = gated();
        registry.create_task(NewTask::new(TaskType::Scan), run1);
        let queued = registry.create_task(NewTask::new(TaskType::Scan), run2);
        assert_eq!(queued.status(), Some(TaskStatus::Pending));

        assert_eq!(registry.set_max_parallel_tasks(3), 3);
        assert_eq!(queued.status(), Some(TaskStatus::Running));
        assert_eq!(registry.set_max_parallel_tasks(99), 10);
    }

    #[tokio::test]
    async fn test_finished_tasks_are_purged_after_retention() {
        let registry = TaskRegistry::new(RegistryConfig {
            max_parallel_tasks: 2,
            retention: Duration::from_millis(20),
        });
        let task = registry.create(NewTask::new(TaskType::Scan));
        task.complete();
        assert!(registry.get(task.id()).is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.get(task.id()).is_none());
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_running_before_pending() {
        let registry = registry(1);
        let running = registry.create(NewTask::new(TaskType::Scan));
        let pending = registry.create(NewTask::new(TaskType::MetadataSync));

        let listed: Vec<Uuid> = registry.list_active().iter().map(|t| t.task_id).collect();
        assert_eq!(listed, vec![running.id(), pending.id()]);
        assert!(registry.has_active(TaskType::MetadataSync));
        assert!(!registry.has_active(TaskType::FileAnalyze));
    }
}
