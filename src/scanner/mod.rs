//! Library scan orchestration
//!
//! A scan runs on the host runtime in five phases:
//! discovering → parsing → saving → cleanup → complete.
//! It yields regularly so other tasks and HTTP handlers keep running, and it
//! checks for cancellation before every item and batch.

pub mod discovery;
pub mod store;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{FileChange, ScanHistoryRecord};
use crate::services::parse_episode;
use crate::tasks::{
    NewTask, ScanDetails, ScanPhase, TaskDetails, TaskRegistry, TaskStatus, TaskTracker, TaskType,
};

pub use discovery::{DiscoveredFile, WalkEntry, discover_files, walk_library};
pub use store::{LibraryStore, ParsedFile, ShowScope};

/// Entries walked between two yields to the runtime
pub const DISCOVERY_YIELD_INTERVAL: usize = 100;
/// Files stored per transaction
pub const SAVE_BATCH_SIZE: usize = 100;

/// What a scan covers
#[derive(Debug, Clone)]
pub enum ScanTarget {
    /// Every library root
    Library { roots: Vec<PathBuf> },
    /// One show's directory
    Show { show_id: Uuid },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
}

impl ScanStats {
    fn record(&mut self, change: FileChange) {
        match change {
            FileChange::Added => self.files_added += 1,
            FileChange::Updated => self.files_updated += 1,
            FileChange::Unchanged => self.files_unchanged += 1,
        }
    }

    fn write_to(&self, details: &mut ScanDetails) {
        details.files_added = self.files_added;
        details.files_updated = self.files_updated;
        details.files_unchanged = self.files_unchanged;
        details.files_deleted = self.files_deleted;
    }
}

/// Scan ended early because cancellation was requested
struct Cancelled;

enum ScanError {
    Cancelled,
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for ScanError {
    fn from(e: anyhow::Error) -> Self {
        ScanError::Failed(e)
    }
}

impl From<Cancelled> for ScanError {
    fn from(_: Cancelled) -> Self {
        ScanError::Cancelled
    }
}

fn check_cancelled(tracker: &TaskTracker) -> Result<(), Cancelled> {
    if tracker.is_cancellation_requested() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// Runs scans against a [LibraryStore]
pub struct ScanOrchestrator {
    store: Arc<dyn LibraryStore>,
}

impl ScanOrchestrator {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    /// Run a scan to its terminal state.
    ///
    /// The outcome is reported through `tracker` and a scan history row
    /// written just before the terminal transition. A history write that
    /// fails is logged and does not change the outcome.
    pub async fn run(&self, tracker: TaskTracker, target: ScanTarget) -> Result<()> {
        let started_at = Utc::now();
        let mut stats = ScanStats::default();

        info!(task_id = %tracker.id(), target = ?target, "Starting scan");
        let outcome = self.execute(&tracker, &target, &mut stats).await;

        // Cancellation wins over whatever error the interrupted work produced
        let (status, error) = match outcome {
            _ if tracker.is_cancellation_requested() => (TaskStatus::Cancelled, None),
            Ok(()) => (TaskStatus::Completed, None),
            Err(ScanError::Cancelled) => (TaskStatus::Cancelled, None),
            Err(ScanError::Failed(e)) => (TaskStatus::Failed, Some(format!("{e:#}"))),
        };

        tracker.update_scan(|details| stats.write_to(details));
        let history = self.history_record(&tracker, &target, &stats, status, started_at);
        if let Err(e) = self.store.record_scan(&history).await {
            warn!(task_id = %tracker.id(), error = %e, "Failed to write scan history");
        }

        match status {
            TaskStatus::Completed => {
                tracker.set_phase(ScanPhase::Complete);
                tracker.complete();
            }
            TaskStatus::Cancelled => {
                tracker.cancel();
            }
            _ => {
                let error = error.unwrap_or_default();
                warn!(task_id = %tracker.id(), error = %error, "Scan failed");
                tracker.fail(error);
            }
        }

        info!(
            task_id = %tracker.id(),
            status = %status,
            files_scanned = stats.files_scanned,
            files_added = stats.files_added,
            files_updated = stats.files_updated,
            files_deleted = stats.files_deleted,
            "Scan finished"
        );
        Ok(())
    }

    fn history_record(
        &self,
        tracker: &TaskTracker,
        target: &ScanTarget,
        stats: &ScanStats,
        status: TaskStatus,
        started_at: chrono::DateTime<Utc>,
    ) -> ScanHistoryRecord {
        let (scan_type, show_id) = match target {
            ScanTarget::Library { .. } => (TaskType::Scan, None),
            ScanTarget::Show { show_id } => (TaskType::ShowScan, Some(*show_id)),
        };
        let error_count = tracker
            .snapshot()
            .map(|s| s.errors.len() as i64)
            .unwrap_or_default();

        ScanHistoryRecord {
            id: Uuid::new_v4(),
            task_id: tracker.id(),
            scan_type: scan_type.as_str().to_string(),
            show_id,
            status: status.as_str().to_string(),
            files_scanned: stats.files_scanned as i64,
            files_added: stats.files_added as i64,
            files_updated: stats.files_updated as i64,
            files_deleted: stats.files_deleted as i64,
            // A failure adds its own task-level entry after this snapshot
            error_count: error_count + i64::from(status == TaskStatus::Failed),
            started_at,
            completed_at: Utc::now(),
        }
    }

    async fn execute(
        &self,
        tracker: &TaskTracker,
        target: &ScanTarget,
        stats: &mut ScanStats,
    ) -> Result<(), ScanError> {
        let (roots, target_show) = match target {
            ScanTarget::Library { roots } => (roots.clone(), None),
            ScanTarget::Show { show_id } => {
                let scope = self
                    .store
                    .show_scope(*show_id)
                    .await?
                    .with_context(|| format!("Show {show_id} not found"))?;
                let path = scope
                    .path
                    .with_context(|| format!("Show '{}' has no directory", scope.name))?;
                (vec![PathBuf::from(path)], Some(*show_id))
            }
        };

        // Discovering
        tracker.set_phase(ScanPhase::Discovering);
        let mut discovered = Vec::new();
        for (walked, entry) in walk_library(&roots).enumerate() {
            check_cancelled(tracker)?;
            if let WalkEntry::Video(file) = entry {
                discovered.push(file);
            }
            if (walked + 1) % DISCOVERY_YIELD_INTERVAL == 0 {
                debug!(
                    task_id = %tracker.id(),
                    walked = walked + 1,
                    discovered = discovered.len(),
                    "Discovery progress"
                );
                tokio::task::yield_now().await;
            }
        }
        stats.files_scanned = discovered.len() as u64;
        tracker.set_total(discovered.len() as u64);
        info!(task_id = %tracker.id(), files = discovered.len(), "Discovery finished");

        let seen: HashSet<String> = discovered.iter().map(DiscoveredFile::path_string).collect();

        // Parsing
        tracker.set_phase(ScanPhase::Parsing);
        let mut parsed = Vec::with_capacity(discovered.len());
        for file in discovered {
            check_cancelled(tracker)?;
            match parse_file(file, target_show.is_some()) {
                Ok(mut item) => {
                    if target_show.is_none() {
                        item.show_dir = show_directory(&item.file.path, &roots);
                    }
                    parsed.push(item);
                }
                Err((file, reason)) => {
                    debug!(path = %file.path.display(), "Unparseable filename");
                    tracker.increment_failed(&file.path_string(), reason);
                }
            }
        }
        tokio::task::yield_now().await;

        // Saving
        tracker.set_phase(ScanPhase::Saving);
        for batch in parsed.chunks(SAVE_BATCH_SIZE) {
            check_cancelled(tracker)?;
            self.save_batch(tracker, batch, target_show, stats).await;
            tokio::task::yield_now().await;
        }

        // Cleanup
        check_cancelled(tracker)?;
        tracker.set_phase(ScanPhase::Cleanup);
        tokio::task::yield_now().await;

        let missing: Vec<Uuid> = self
            .store
            .present_files(target_show)
            .await?
            .into_iter()
            .filter(|(_, path)| !seen.contains(path) && is_under_any(path, &roots))
            .map(|(id, _)| id)
            .collect();

        if !missing.is_empty() {
            stats.files_deleted = self.store.mark_missing(&missing).await?;
            info!(task_id = %tracker.id(), count = stats.files_deleted, "Marked files missing");
        }
        tracker.update_scan(|details| stats.write_to(details));
        tokio::task::yield_now().await;

        Ok(())
    }

    /// Save one batch; a failing batch marks each of its items failed and
    /// the scan moves on.
    async fn save_batch(
        &self,
        tracker: &TaskTracker,
        batch: &[ParsedFile],
        target_show: Option<Uuid>,
        stats: &mut ScanStats,
    ) {
        match self.store.save_batch(batch, target_show).await {
            Ok(changes) => {
                for (item, change) in batch.iter().zip(changes) {
                    stats.record(change);
                    tracker.increment_success(Some(&item.file.path_string()));
                }
                tracker.update_scan(|details| stats.write_to(details));
            }
            Err(e) => {
                let reason = format!("Batch save failed: {e:#}");
                warn!(task_id = %tracker.id(), files = batch.len(), error = %e, "Batch save failed");
                for item in batch {
                    tracker.increment_failed(&item.file.path_string(), &reason);
                }
            }
        }
    }
}

fn parse_file(file: DiscoveredFile, show_scan: bool) -> Result<ParsedFile, (DiscoveredFile, String)> {
    let parsed = parse_episode(&file.file_name());

    let numbered = parsed.season.is_some() && parsed.episode.is_some();
    // Show scans attach files to the target show, so a name is optional there
    if !numbered || (!show_scan && !parsed.is_complete()) {
        let reason = format!(
            "Could not parse show, season and episode from '{}'",
            file.file_name()
        );
        return Err((file, reason));
    }

    Ok(ParsedFile {
        show_name: parsed.show_name.unwrap_or_default(),
        year: parsed.year.map(|y| y as i32),
        season: parsed.season.unwrap_or_default() as i32,
        episode: parsed.episode.unwrap_or_default() as i32,
        resolution: parsed.resolution,
        video_codec: parsed.codec,
        show_dir: None,
        file,
    })
}

/// The top-level directory under a library root that holds `path`.
///
/// `Bluey/Season 1/Bluey S01E01.mkv` under `/tv` gives `/tv/Bluey`. Files
/// directly in a root have no show directory.
fn show_directory(path: &Path, roots: &[PathBuf]) -> Option<PathBuf> {
    roots.iter().find_map(|root| {
        let mut components = path.strip_prefix(root).ok()?.components();
        let first = components.next()?;
        components.next()?;
        Some(root.join(first))
    })
}

fn is_under_any(path: &str, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| Path::new(path).starts_with(root))
}

/// Creates scan tasks through the registry
#[derive(Clone)]
pub struct ScanService {
    registry: TaskRegistry,
    orchestrator: Arc<ScanOrchestrator>,
    library_roots: Vec<PathBuf>,
}

impl ScanService {
    pub fn new(
        registry: TaskRegistry,
        store: Arc<dyn LibraryStore>,
        library_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            registry,
            orchestrator: Arc::new(ScanOrchestrator::new(store)),
            library_roots,
        }
    }

    /// Scan every library root
    pub fn submit_library_scan(&self) -> TaskTracker {
        let orchestrator = self.orchestrator.clone();
        let target = ScanTarget::Library {
            roots: self.library_roots.clone(),
        };

        self.registry.create_task(
            NewTask::new(TaskType::Scan)
                .with_title("Library scan")
                .with_details(TaskDetails::Scan(ScanDetails::default())),
            move |tracker| async move { orchestrator.run(tracker, target).await },
        )
    }

    /// Scan one show's directory
    pub fn submit_show_scan(&self, show_id: Uuid, show_name: &str) -> TaskTracker {
        let orchestrator = self.orchestrator.clone();

        self.registry.create_task(
            NewTask::new(TaskType::ShowScan)
                .with_title(format!("Scan: {show_name}"))
                .with_details(TaskDetails::Scan(ScanDetails {
                    show_id: Some(show_id),
                    ..Default::default()
                })),
            move |tracker| async move {
                orchestrator
                    .run(tracker, ScanTarget::Show { show_id })
                    .await
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from("/tv/Show").join(name),
            size: 1,
            modified_ms: 1,
        }
    }

    #[test]
    fn test_parse_file_requires_show_for_library_scans() {
        assert!(parse_file(file("S01E02.mkv"), false).is_err());
        let item = parse_file(file("S01E02.mkv"), true).unwrap();
        assert_eq!((item.season, item.episode), (1, 2));
    }

    #[test]
    fn test_parse_file_reports_reason() {
        let (_, reason) = parse_file(file("trailer.mkv"), false).unwrap_err();
        assert!(reason.contains("trailer.mkv"));
    }

    #[test]
    fn test_show_directory_is_first_level_under_root() {
        let roots = vec![PathBuf::from("/media/other"), PathBuf::from("/media/tv")];
        assert_eq!(
            show_directory(Path::new("/media/tv/Bluey/Season 1/Bluey S01E01.mkv"), &roots),
            Some(PathBuf::from("/media/tv/Bluey"))
        );
        assert_eq!(
            show_directory(Path::new("/media/tv/Bluey/Bluey S01E01.mkv"), &roots),
            Some(PathBuf::from("/media/tv/Bluey"))
        );
        assert_eq!(show_directory(Path::new("/media/tv/Bluey S01E01.mkv"), &roots), None);
        assert_eq!(show_directory(Path::new("/elsewhere/Bluey/a.mkv"), &roots), None);
    }

    #[test]
    fn test_is_under_any() {
        let roots = vec![PathBuf::from("/media/tv")];
        assert!(is_under_any("/media/tv/Bluey/a.mkv", &roots));
        assert!(!is_under_any("/media/tv2/a.mkv", &roots));
    }
}
