//! FIFO admission queue for tasks waiting on a concurrency slot

use std::collections::VecDeque;

use futures::future::BoxFuture;
use uuid::Uuid;

use super::tracker::TaskTracker;

/// Lowest accepted concurrency limit
pub const MIN_PARALLEL_TASKS: usize = 1;
/// Highest accepted concurrency limit
pub const MAX_PARALLEL_TASKS: usize = 10;
/// Limit used when nothing is configured
pub const DEFAULT_PARALLEL_TASKS: usize = 2;

/// Deferred work for a task, invoked once the task is running
pub type TaskRun = Box<dyn FnOnce(TaskTracker) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Clamp a requested concurrency limit into the accepted range
pub fn clamp_parallel_limit(requested: i64) -> usize {
    requested.clamp(MIN_PARALLEL_TASKS as i64, MAX_PARALLEL_TASKS as i64) as usize
}

pub(crate) struct QueueEntry {
    pub task_id: Uuid,
    pub run: TaskRun,
}

/// Pending tasks in creation order
#[derive(Default)]
pub(crate) struct AdmissionQueue {
    entries: VecDeque<QueueEntry>,
}

impl AdmissionQueue {
    pub fn push(&mut self, task_id: Uuid, run: TaskRun) {
        self.entries.push_back(QueueEntry { task_id, run });
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Drop the entry for a task; returns whether one was queued
    pub fn remove(&mut self, task_id: Uuid) -> bool {
        match self.entries.iter().position(|e| e.task_id == task_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop() -> TaskRun {
        Box::new(|_| async { Ok(()) }.boxed())
    }

    #[test]
    fn test_clamp_parallel_limit() {
        assert_eq!(clamp_parallel_limit(0), 1);
        assert_eq!(clamp_parallel_limit(-4), 1);
        assert_eq!(clamp_parallel_limit(4), 4);
        assert_eq!(clamp_parallel_limit(50), 10);
    }

    #[test]
    fn test_fifo_and_remove() {
        let mut queue = AdmissionQueue::default();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.push(a, noop());
        queue.push(b, noop());
        queue.push(c, noop());

        assert!(queue.remove(b));
        assert!(!queue.remove(b));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().map(|e| e.task_id), Some(a));
        assert_eq!(queue.pop().map(|e| e.task_id), Some(c));
        assert!(queue.pop().is_none());
    }
}
