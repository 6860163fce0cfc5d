//! Scheduled library scan

use tracing::info;

use crate::scanner::ScanService;
use crate::tasks::{TaskRegistry, TaskTracker, TaskType};

/// Submit a full library scan unless one is already pending or running
pub fn run_scheduled_scan(scans: &ScanService, registry: &TaskRegistry) -> Option<TaskTracker> {
    if registry.has_active(TaskType::Scan) {
        info!("Library scan already active, skipping scheduled run");
        return None;
    }

    let tracker = scans.submit_library_scan();
    info!(task_id = %tracker.id(), "Scheduled library scan submitted");
    Some(tracker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::tasks::RegistryConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_skips_when_scan_active() {
        let db = Database::connect_and_sync("sqlite::memory:").await.unwrap();
        let registry = TaskRegistry::new(RegistryConfig::default());
        let scans = ScanService::new(registry.clone(), Arc::new(db), Vec::new());

        // Nothing yields between the calls, so the first scan is still running
        let first = run_scheduled_scan(&scans, &registry);
        assert!(first.is_some());
        assert!(run_scheduled_scan(&scans, &registry).is_none());
    }
}
