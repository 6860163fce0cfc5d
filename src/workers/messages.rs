//! Messages a worker thread sends back to the dispatcher

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::tasks::{TaskItemError, TaskUpdate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Absolute counters plus the errors recorded since the last message
    #[serde(rename_all = "camelCase")]
    Progress {
        total: Option<u64>,
        processed: u64,
        succeeded: u64,
        failed: u64,
        current_item: Option<String>,
        new_errors: Vec<TaskItemError>,
    },
    Complete,
    Fail { error: String },
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerMessage::Progress { .. })
    }
}

/// Progress fields of a message as a tracker update
pub(crate) fn progress_update(
    total: Option<u64>,
    succeeded: u64,
    failed: u64,
    current_item: Option<String>,
    new_errors: Vec<TaskItemError>,
) -> TaskUpdate {
    TaskUpdate {
        total,
        succeeded: Some(succeeded),
        failed: Some(failed),
        current_item,
        new_errors,
        details: None,
    }
}

/// Worker-side counters, sent as a [WorkerMessage::Progress] after every item
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    total: Option<u64>,
    succeeded: u64,
    failed: u64,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self {
            tx,
            total: None,
            succeeded: 0,
            failed: 0,
        }
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = Some(total);
        self.send(None, Vec::new());
    }

    pub fn success(&mut self, item: &str) {
        self.succeeded += 1;
        self.send(Some(item.to_string()), Vec::new());
    }

    pub fn failure(&mut self, item: &str, error: impl Into<String>) {
        self.failed += 1;
        self.send(
            Some(item.to_string()),
            vec![TaskItemError::new(item, error.into())],
        );
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn complete(&self) {
        let _ = self.tx.send(WorkerMessage::Complete);
    }

    pub fn fail(&self, error: impl Into<String>) {
        let _ = self.tx.send(WorkerMessage::Fail {
            error: error.into(),
        });
    }

    fn send(&self, current_item: Option<String>, new_errors: Vec<TaskItemError>) {
        // The dispatcher may already be gone; nothing left to report to then
        let _ = self.tx.send(WorkerMessage::Progress {
            total: self.total,
            processed: self.succeeded + self.failed,
            succeeded: self.succeeded,
            failed: self.failed,
            current_item,
            new_errors,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_reporter_sends_absolute_counts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(tx);
        reporter.set_total(2);
        reporter.success("Bluey");
        reporter.failure("Bad Show", "no match");
        reporter.complete();

        assert_matches!(rx.try_recv(), Ok(WorkerMessage::Progress { total: Some(2), processed: 0, .. }));
        assert_matches!(rx.try_recv(), Ok(WorkerMessage::Progress { processed: 1, succeeded: 1, .. }));
        let msg = rx.try_recv().unwrap();
        assert_matches!(&msg, WorkerMessage::Progress { processed: 2, failed: 1, new_errors, .. } if new_errors.len() == 1);
        assert!(!msg.is_terminal());
        assert_matches!(rx.try_recv(), Ok(WorkerMessage::Complete));
    }

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_value(WorkerMessage::Fail {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "fail");
        assert_eq!(json["error"], "boom");
    }
}
