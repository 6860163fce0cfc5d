//! Background task bookkeeping
//!
//! - [TaskRegistry]: owns every task, enforces the concurrency limit and
//!   queues the overflow
//! - [TaskTracker]: handle the work itself uses to report progress
//! - [types]: task records and the serialized snapshot served over HTTP

mod queue;
mod registry;
mod tracker;
pub mod types;

pub use queue::{
    DEFAULT_PARALLEL_TASKS, MAX_PARALLEL_TASKS, MIN_PARALLEL_TASKS, TaskRun, clamp_parallel_limit,
};
pub use registry::{DEFAULT_TASK_RETENTION, RegistryConfig, TaskRegistry};
pub use tracker::TaskTracker;
pub use types::{
    MAX_SERIALIZED_ERRORS, NewTask, ScanDetails, ScanPhase, SerializedTask, TaskDetails,
    TaskItemError, TaskState, TaskStatus, TaskType, TaskUpdate,
};
