//! Per-task progress handle

use std::fmt::Display;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::registry::TaskRegistry;
use super::types::{
    ScanDetails, ScanPhase, SerializedTask, TaskDetails, TaskState, TaskStatus, TaskUpdate,
};

/// Handle through which work reports progress on one task.
///
/// Every method is a no-op once the task reached a terminal state or was
/// purged from the registry.
#[derive(Clone)]
pub struct TaskTracker {
    task_id: Uuid,
    registry: TaskRegistry,
}

impl std::fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracker")
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl TaskTracker {
    pub(crate) fn new(task_id: Uuid, registry: TaskRegistry) -> Self {
        Self { task_id, registry }
    }

    pub fn id(&self) -> Uuid {
        self.task_id
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.registry.status(self.task_id)
    }

    pub fn snapshot(&self) -> Option<TaskState> {
        self.registry.snapshot(self.task_id)
    }

    pub fn serialized(&self) -> Option<SerializedTask> {
        self.registry.get_serialized(self.task_id)
    }

    /// Receiver that sees the current state right away and every later change
    pub fn subscribe(&self) -> Option<watch::Receiver<TaskState>> {
        self.registry.subscribe(self.task_id)
    }

    /// Token tripped when cancellation is requested
    pub fn cancellation_token(&self) -> CancellationToken {
        self.registry
            .cancellation_token(self.task_id)
            .unwrap_or_else(|| {
                // Purged tasks have nothing left to do
                let token = CancellationToken::new();
                token.cancel();
                token
            })
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation_token().is_cancelled()
    }

    /// Merge a partial update
    pub fn update(&self, update: TaskUpdate) {
        self.registry.modify(self.task_id, |state| state.apply(update));
    }

    pub fn set_total(&self, total: u64) {
        self.update(TaskUpdate {
            total: Some(total),
            ..Default::default()
        });
    }

    pub fn set_current_item(&self, item: impl Into<String>) {
        let item = item.into();
        self.registry
            .modify(self.task_id, |state| state.current_item = Some(item));
    }

    pub fn increment_success(&self, item: Option<&str>) {
        let item = item.map(str::to_string);
        self.registry
            .modify(self.task_id, |state| state.record_success(item));
    }

    pub fn increment_failed(&self, item: &str, error: impl Display) {
        let (item, error) = (item.to_string(), error.to_string());
        self.registry
            .modify(self.task_id, |state| state.record_failure(item, error));
    }

    pub fn set_phase(&self, phase: ScanPhase) {
        self.update_scan(|details| details.phase = Some(phase));
    }

    /// Edit the scan details of a scan task
    pub fn update_scan(&self, f: impl FnOnce(&mut ScanDetails)) {
        self.update_details(|details| match details {
            TaskDetails::Scan(scan) => f(scan),
            TaskDetails::None => {
                let mut scan = ScanDetails::default();
                f(&mut scan);
                *details = TaskDetails::Scan(scan);
            }
            _ => {}
        });
    }

    /// Edit the type-specific details
    pub fn update_details(&self, f: impl FnOnce(&mut TaskDetails)) {
        self.registry
            .modify(self.task_id, |state| f(&mut state.details));
    }

    /// Mark the task completed. Returns false if it had already finished.
    pub fn complete(&self) -> bool {
        self.registry
            .finish(self.task_id, TaskStatus::Completed, None)
    }

    /// Mark the task failed, recording `error` as the task-level error.
    /// Returns false if it had already finished.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        self.registry
            .finish(self.task_id, TaskStatus::Failed, Some(error.into()))
    }

    /// Mark the task cancelled. Returns false if it had already finished.
    pub fn cancel(&self) -> bool {
        self.registry
            .finish(self.task_id, TaskStatus::Cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{NewTask, TaskItemError, TaskType};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_counters_and_errors() {
        let registry = TaskRegistry::default();
        let task = registry.create(NewTask::new(TaskType::BulkMetadataRefresh).with_total(3));

        task.increment_success(Some("Show A"));
        task.increment_failed("Show B", "no match");
        task.increment_success(None);

        let state = task.snapshot().unwrap();
        assert_eq!((state.succeeded, state.failed, state.processed), (2, 1, 3));
        assert_eq!(state.current_item.as_deref(), Some("Show B"));
        assert_eq!(state.errors, vec![TaskItemError::new("Show B", "no match")]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_current_state_then_changes() {
        let registry = TaskRegistry::default();
        let task = registry.create(NewTask::new(TaskType::Scan));
        task.set_total(4);

        let mut rx = task.subscribe().unwrap();
        assert_eq!(rx.borrow_and_update().total, 4);

        task.set_phase(ScanPhase::Parsing);
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow_and_update().scan_details().and_then(|d| d.phase),
            Some(ScanPhase::Parsing)
        );

        task.complete();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_subscriber_is_woken_by_updates() {
        let registry = TaskRegistry::default();
        let task = registry.create(NewTask::new(TaskType::MetadataSync));
        let mut rx = task.subscribe().unwrap();
        rx.borrow_and_update();

        let mut changed = tokio_test::task::spawn(rx.changed());
        tokio_test::assert_pending!(changed.poll());

        task.set_current_item("Bluey");
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
    }

    #[tokio::test]
    async fn test_updates_after_finish_are_ignored() {
        let registry = TaskRegistry::default();
        let task = registry.create(NewTask::new(TaskType::Scan));
        task.fail("broken");
        task.increment_success(Some("late"));

        let state = task.snapshot().unwrap();
        assert_eq!(state.succeeded, 0);
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state.current_item.is_none());
    }
}
