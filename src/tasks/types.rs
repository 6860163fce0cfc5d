//! Task records, status machine and the transport snapshot

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors beyond this count are left out of [SerializedTask::errors]; the full
/// list stays in [TaskState::errors].
pub const MAX_SERIALIZED_ERRORS: usize = 100;

/// Item label used for the top-level failure entry appended by `fail`
pub const TASK_ERROR_ITEM: &str = "task";

/// Lifecycle status of a task.
///
/// `pending -> running -> {completed | failed | cancelled}`, plus
/// `pending -> cancelled`. Nothing moves back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Sort rank for task listings: running, then pending, then finished
    pub(crate) fn list_rank(&self) -> u8 {
        match self {
            TaskStatus::Running => 0,
            TaskStatus::Pending => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Scan,
    ShowScan,
    BulkMetadataMatch,
    BulkMetadataRefresh,
    MetadataSync,
    MetadataImport,
    FileAnalyze,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Scan => "scan",
            TaskType::ShowScan => "show-scan",
            TaskType::BulkMetadataMatch => "bulk-metadata-match",
            TaskType::BulkMetadataRefresh => "bulk-metadata-refresh",
            TaskType::MetadataSync => "metadata-sync",
            TaskType::MetadataImport => "metadata-import",
            TaskType::FileAnalyze => "file-analyze",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of a library scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Discovering,
    Parsing,
    Saving,
    Cleanup,
    Complete,
}

/// Scan-specific task fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ScanPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_id: Option<Uuid>,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
}

/// Type-specific extension of a task record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TaskDetails {
    #[default]
    None,
    Scan(ScanDetails),
    Analyze { file_id: Uuid },
    Metadata { show_ids: Vec<Uuid> },
}

/// One failed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItemError {
    pub item: String,
    pub error: String,
}

impl TaskItemError {
    pub fn new(item: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            error: error.into(),
        }
    }
}

/// Parameters for a new task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub title: Option<String>,
    pub total: u64,
    pub details: TaskDetails,
}

impl NewTask {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            title: None,
            total: 0,
            details: TaskDetails::None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    pub fn with_details(mut self, details: TaskDetails) -> Self {
        self.details = details;
        self
    }
}

/// Partial update merged into a [TaskState].
///
/// Counters are absolute values; the merge never lets them decrease and
/// recomputes `processed` from them.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub total: Option<u64>,
    pub succeeded: Option<u64>,
    pub failed: Option<u64>,
    pub current_item: Option<String>,
    pub new_errors: Vec<TaskItemError>,
    pub details: Option<TaskDetails>,
}

/// Canonical in-memory state of a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub task_id: Uuid,
    pub task_type: TaskType,
    pub title: Option<String>,
    pub status: TaskStatus,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub current_item: Option<String>,
    pub errors: Vec<TaskItemError>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub details: TaskDetails,
}

impl TaskState {
    pub(crate) fn new(task_id: Uuid, new: NewTask, status: TaskStatus) -> Self {
        Self {
            task_id,
            task_type: new.task_type,
            title: new.title,
            status,
            total: new.total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            current_item: None,
            errors: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            details: new.details,
        }
    }

    /// Merge a partial update
    pub(crate) fn apply(&mut self, update: TaskUpdate) {
        if let Some(total) = update.total {
            // total is write-once: 0 means "not known yet"
            if self.total == 0 {
                self.total = total;
            } else if total != self.total {
                tracing::debug!(
                    task_id = %self.task_id,
                    current = self.total,
                    ignored = total,
                    "Ignoring change to task total"
                );
            }
        }
        if let Some(succeeded) = update.succeeded {
            self.succeeded = self.succeeded.max(succeeded);
        }
        if let Some(failed) = update.failed {
            self.failed = self.failed.max(failed);
        }
        self.processed = self.succeeded + self.failed;

        if update.current_item.is_some() {
            self.current_item = update.current_item;
        }
        self.errors.extend(update.new_errors);
        if let Some(details) = update.details {
            self.details = details;
        }
    }

    pub(crate) fn record_success(&mut self, item: Option<String>) {
        self.succeeded += 1;
        self.processed = self.succeeded + self.failed;
        if item.is_some() {
            self.current_item = item;
        }
    }

    pub(crate) fn record_failure(&mut self, item: String, error: String) {
        self.failed += 1;
        self.processed = self.succeeded + self.failed;
        self.current_item = Some(item.clone());
        self.errors.push(TaskItemError { item, error });
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, error: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.current_item = None;
        if let Some(error) = error {
            self.errors.push(TaskItemError::new(TASK_ERROR_ITEM, error.clone()));
            self.error = Some(error);
        }
    }

    /// Scan details, if this is a scan task
    pub fn scan_details(&self) -> Option<&ScanDetails> {
        match &self.details {
            TaskDetails::Scan(details) => Some(details),
            _ => None,
        }
    }

    /// Transport-safe snapshot
    pub fn serialize(&self) -> SerializedTask {
        let (scan, file_id, show_ids) = match &self.details {
            TaskDetails::None => (None, None, None),
            TaskDetails::Scan(details) => (Some(details.clone()), None, None),
            TaskDetails::Analyze { file_id } => (None, Some(*file_id), None),
            TaskDetails::Metadata { show_ids } => (None, None, Some(show_ids.clone())),
        };

        SerializedTask {
            task_id: self.task_id,
            task_type: self.task_type,
            title: self.title.clone(),
            status: self.status,
            total: self.total,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            current_item: self.current_item.clone(),
            errors: self
                .errors
                .iter()
                .take(MAX_SERIALIZED_ERRORS)
                .cloned()
                .collect(),
            error_count: self.errors.len(),
            error: self.error.clone(),
            started_at: self.started_at.to_rfc3339(),
            completed_at: self.completed_at.map(|dt| dt.to_rfc3339()),
            scan,
            file_id,
            show_ids,
        }
    }
}

/// Snapshot handed to the HTTP boundary (dates as RFC 3339 strings)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTask {
    pub task_id: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub status: TaskStatus,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    pub errors: Vec<TaskItemError>,
    pub error_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(flatten)]
    pub scan: Option<ScanDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_ids: Option<Vec<Uuid>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> TaskState {
        TaskState::new(Uuid::new_v4(), NewTask::new(TaskType::Scan), TaskStatus::Running)
    }

    #[test]
    fn test_apply_keeps_processed_consistent() {
        let mut s = state();
        s.apply(TaskUpdate {
            total: Some(5),
            succeeded: Some(3),
            failed: Some(1),
            ..Default::default()
        });
        assert_eq!(s.processed, 4);

        // Counters never go backwards
        s.apply(TaskUpdate {
            succeeded: Some(2),
            ..Default::default()
        });
        assert_eq!((s.succeeded, s.failed, s.processed), (3, 1, 4));
    }

    #[test]
    fn test_total_is_write_once() {
        let mut s = state();
        s.apply(TaskUpdate {
            total: Some(10),
            ..Default::default()
        });
        s.apply(TaskUpdate {
            total: Some(20),
            ..Default::default()
        });
        assert_eq!(s.total, 10);
    }

    #[test]
    fn test_finish_with_error_appends_entry() {
        let mut s = state();
        s.record_failure("a.mkv".into(), "bad".into());
        s.finish(TaskStatus::Failed, Some("disk gone".into()));

        assert_eq!(s.errors.len(), 2);
        assert_eq!(s.errors[1], TaskItemError::new(TASK_ERROR_ITEM, "disk gone"));
        assert_eq!(s.error.as_deref(), Some("disk gone"));
        assert!(s.completed_at.is_some());
        assert_eq!(s.processed, s.succeeded + s.failed);
    }

    #[test]
    fn test_serialized_shape() {
        let mut s = state();
        s.details = TaskDetails::Scan(ScanDetails {
            phase: Some(ScanPhase::Saving),
            files_added: 2,
            ..Default::default()
        });
        for i in 0..(MAX_SERIALIZED_ERRORS + 5) {
            s.record_failure(format!("file-{i}"), "oops".into());
        }

        let json = serde_json::to_value(s.serialize()).unwrap();
        assert_eq!(json["type"], "scan");
        assert_eq!(json["status"], "running");
        assert_eq!(json["phase"], "saving");
        assert_eq!(json["filesAdded"], 2);
        assert_eq!(json["errorCount"], MAX_SERIALIZED_ERRORS + 5);
        assert_eq!(json["errors"].as_array().unwrap().len(), MAX_SERIALIZED_ERRORS);
        assert!(json["startedAt"].is_string());
        assert!(json.get("completedAt").is_none());
    }
}
