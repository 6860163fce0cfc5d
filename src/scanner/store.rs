//! Persistence seam for the scan orchestrator

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::discovery::DiscoveredFile;
use crate::db::{
    CreateTvShow, Database, FileChange, ScanHistoryRecord, ScannedFile, episodes, media_files,
    tv_shows,
};
use crate::services::normalize_show_name;

/// A discovered file whose name parsed into show/season/episode
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file: DiscoveredFile,
    pub show_name: String,
    pub year: Option<i32>,
    pub season: i32,
    pub episode: i32,
    pub resolution: Option<String>,
    pub video_codec: Option<String>,
    /// Directory a newly created show is rooted at
    pub show_dir: Option<PathBuf>,
}

/// Directory and display name of a show, for show-scoped scans
#[derive(Debug, Clone)]
pub struct ShowScope {
    pub show_id: Uuid,
    pub name: String,
    pub path: Option<String>,
}

/// Storage operations a scan needs
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn show_scope(&self, show_id: Uuid) -> Result<Option<ShowScope>>;

    /// Store one batch atomically. Files attach to `target_show` when given,
    /// otherwise to the show resolved from the parsed name.
    async fn save_batch(
        &self,
        batch: &[ParsedFile],
        target_show: Option<Uuid>,
    ) -> Result<Vec<FileChange>>;

    /// `(id, path)` of files not flagged missing, optionally for one show
    async fn present_files(&self, show_id: Option<Uuid>) -> Result<Vec<(Uuid, String)>>;

    async fn mark_missing(&self, ids: &[Uuid]) -> Result<u64>;

    async fn record_scan(&self, record: &ScanHistoryRecord) -> Result<()>;
}

#[async_trait]
impl LibraryStore for Database {
    async fn show_scope(&self, show_id: Uuid) -> Result<Option<ShowScope>> {
        Ok(self.tv_shows().get_by_id(show_id).await?.map(|show| ShowScope {
            show_id: show.id,
            name: show.name,
            path: show.path,
        }))
    }

    async fn save_batch(
        &self,
        batch: &[ParsedFile],
        target_show: Option<Uuid>,
    ) -> Result<Vec<FileChange>> {
        let mut tx = self.pool().begin().await?;
        let mut shows: HashMap<(String, Option<i32>), Uuid> = HashMap::new();
        let mut changes = Vec::with_capacity(batch.len());

        for item in batch {
            let show_id = match target_show {
                Some(id) => id,
                None => {
                    let normalized = normalize_show_name(&item.show_name);
                    let key = (normalized.clone(), item.year);
                    match shows.get(&key) {
                        Some(id) => *id,
                        None => {
                            let id = match tv_shows::find_by_normalized_name(&mut tx, &normalized, item.year)
                                .await?
                            {
                                Some(show) => show.id,
                                None => {
                                    let input = CreateTvShow {
                                        name: item.show_name.clone(),
                                        normalized_name: normalized,
                                        year: item.year,
                                        path: item
                                            .show_dir
                                            .as_ref()
                                            .map(|p| p.to_string_lossy().to_string()),
                                    };
                                    tv_shows::insert(&mut tx, &input).await?.id
                                }
                            };
                            shows.insert(key, id);
                            id
                        }
                    }
                }
            };

            let episode_id = episodes::find_or_create(&mut tx, show_id, item.season, item.episode)
                .await
                .with_context(|| format!("Failed to store episode for {}", item.file.path_string()))?;

            let change = media_files::upsert_scanned(
                &mut tx,
                &ScannedFile {
                    path: item.file.path_string(),
                    size_bytes: item.file.size as i64,
                    modified_ms: item.file.modified_ms,
                    show_id,
                    episode_id,
                    resolution: item.resolution.clone(),
                    video_codec: item.video_codec.clone(),
                    audio_codec: None,
                    container: item
                        .file
                        .path
                        .extension()
                        .map(|e| e.to_string_lossy().to_lowercase()),
                },
            )
            .await?;
            changes.push(change);
        }

        tx.commit().await?;
        Ok(changes)
    }

    async fn present_files(&self, show_id: Option<Uuid>) -> Result<Vec<(Uuid, String)>> {
        self.media_files().list_present(show_id).await
    }

    async fn mark_missing(&self, ids: &[Uuid]) -> Result<u64> {
        self.media_files().mark_missing(ids).await
    }

    async fn record_scan(&self, record: &ScanHistoryRecord) -> Result<()> {
        self.scan_history().create(record).await
    }
}
