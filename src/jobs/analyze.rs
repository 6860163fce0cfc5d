//! Per-file media analysis task

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::services::FfmpegService;
use crate::tasks::{NewTask, TaskDetails, TaskRegistry, TaskTracker, TaskType};

/// Create a `file-analyze` task that probes one file and stores the result
pub fn submit_analysis(
    registry: &TaskRegistry,
    db: Database,
    ffmpeg: Arc<FfmpegService>,
    file_id: Uuid,
) -> TaskTracker {
    registry.create_task(
        NewTask::new(TaskType::FileAnalyze)
            .with_title("Analyze media file")
            .with_total(1)
            .with_details(TaskDetails::Analyze { file_id }),
        move |tracker| async move { analyze_file(tracker, db, ffmpeg, file_id).await },
    )
}

async fn analyze_file(
    tracker: TaskTracker,
    db: Database,
    ffmpeg: Arc<FfmpegService>,
    file_id: Uuid,
) -> Result<()> {
    let file = db
        .media_files()
        .get_by_id(file_id)
        .await?
        .with_context(|| format!("Media file {file_id} not found"))?;

    if tracker.is_cancellation_requested() {
        return Ok(());
    }
    tracker.set_current_item(file.path.clone());

    let analysis = match ffmpeg.analyze(Path::new(&file.path)).await {
        Ok(analysis) => analysis,
        Err(e) => {
            warn!(task_id = %tracker.id(), path = %file.path, error = %e, "Media analysis failed");
            tracker.increment_failed(&file.path, format!("{e:#}"));
            return Err(e);
        }
    };

    let result = analysis.to_file_analysis();
    db.media_files().record_analysis(file.id, &result).await?;
    tracker.increment_success(Some(&file.path));

    info!(
        task_id = %tracker.id(),
        path = %file.path,
        resolution = ?result.resolution,
        direct_play = result.direct_play,
        "Media file analyzed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{DiscoveredFile, LibraryStore, ParsedFile};
    use crate::tasks::{RegistryConfig, TaskStatus};
    use std::time::Duration;

    async fn wait_terminal(tracker: &TaskTracker) -> TaskStatus {
        for _ in 0..200 {
            if let Some(status) = tracker.status().filter(|s| s.is_terminal()) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task did not finish");
    }

    #[tokio::test]
    async fn test_unknown_file_fails() {
        let db = Database::connect_and_sync("sqlite::memory:").await.unwrap();
        let registry = TaskRegistry::new(RegistryConfig::default());

        let tracker = submit_analysis(
            &registry,
            db,
            Arc::new(FfmpegService::default()),
            Uuid::new_v4(),
        );

        assert_eq!(wait_terminal(&tracker).await, TaskStatus::Failed);
        assert!(tracker.snapshot().unwrap().error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_probe_failure_records_item_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bluey S01E01.mkv");
        std::fs::write(&path, b"not a video").unwrap();

        let db = Database::connect_and_sync("sqlite::memory:").await.unwrap();
        db.save_batch(
            &[ParsedFile {
                file: DiscoveredFile {
                    path: path.clone(),
                    size: 11,
                    modified_ms: 1,
                },
                show_name: "Bluey".into(),
                year: None,
                season: 1,
                episode: 1,
                resolution: None,
                video_codec: None,
                show_dir: None,
            }],
            None,
        )
        .await
        .unwrap();
        let file = db
            .media_files()
            .get_by_path(&path.to_string_lossy())
            .await
            .unwrap()
            .unwrap();

        let registry = TaskRegistry::new(RegistryConfig::default());
        let ffmpeg = Arc::new(FfmpegService::with_ffprobe_path(
            "/nonexistent/ffprobe".to_string(),
        ));
        let tracker = submit_analysis(&registry, db, ffmpeg, file.id);

        assert_eq!(wait_terminal(&tracker).await, TaskStatus::Failed);
        let state = tracker.snapshot().unwrap();
        assert_eq!((state.processed, state.failed), (1, 1));
        assert_eq!(state.errors.len(), 1);
    }
}
