//! Media files database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{
    bool_to_int, decode_err, int_to_bool, now_iso8601, str_to_datetime, str_to_datetime_opt,
    str_to_uuid, str_to_uuid_opt, uuid_to_str,
};

/// Media file record from database
#[derive(Debug, Clone)]
pub struct MediaFileRecord {
    pub id: Uuid,
    pub path: String,
    pub size_bytes: i64,
    pub modified_ms: i64,
    pub show_id: Option<Uuid>,
    pub episode_id: Option<Uuid>,
    pub resolution: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
    pub direct_play: Option<bool>,
    pub missing: bool,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for MediaFileRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let show_id: Option<String> = row.try_get("show_id")?;
        let episode_id: Option<String> = row.try_get("episode_id")?;
        let direct_play: Option<i32> = row.try_get("direct_play")?;
        let missing: i32 = row.try_get("missing")?;
        let analyzed_at: Option<String> = row.try_get("analyzed_at")?;
        let added_at: String = row.try_get("added_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            id: str_to_uuid(&id).map_err(decode_err)?,
            path: row.try_get("path")?,
            size_bytes: row.try_get("size_bytes")?,
            modified_ms: row.try_get("modified_ms")?,
            show_id: str_to_uuid_opt(show_id.as_deref()).map_err(decode_err)?,
            episode_id: str_to_uuid_opt(episode_id.as_deref()).map_err(decode_err)?,
            resolution: row.try_get("resolution")?,
            video_codec: row.try_get("video_codec")?,
            audio_codec: row.try_get("audio_codec")?,
            container: row.try_get("container")?,
            direct_play: direct_play.map(int_to_bool),
            missing: int_to_bool(missing),
            analyzed_at: str_to_datetime_opt(analyzed_at.as_deref()).map_err(decode_err)?,
            added_at: str_to_datetime(&added_at).map_err(decode_err)?,
            updated_at: str_to_datetime(&updated_at).map_err(decode_err)?,
        })
    }
}

/// A file observed by a scan, ready to be stored
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: String,
    pub size_bytes: i64,
    pub modified_ms: i64,
    pub show_id: Uuid,
    pub episode_id: Uuid,
    pub resolution: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
}

/// How an upsert changed the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    Added,
    Updated,
    Unchanged,
}

/// Stream details recorded by file analysis
#[derive(Debug, Clone, Default)]
pub struct MediaFileAnalysis {
    pub resolution: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
    pub direct_play: bool,
}

const FILE_COLUMNS: &str = "id, path, size_bytes, modified_ms, show_id, episode_id, resolution, \
     video_codec, audio_codec, container, direct_play, missing, analyzed_at, added_at, updated_at";

/// Insert or refresh a scanned file.
///
/// A file whose size, modification time, show and episode match the stored
/// record, and which was not flagged missing, is left untouched.
pub async fn upsert_scanned(conn: &mut SqliteConnection, file: &ScannedFile) -> Result<FileChange> {
    let existing: Option<(String, i64, i64, i32, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT id, size_bytes, modified_ms, missing, show_id, episode_id FROM media_files WHERE path = ?1",
    )
    .bind(&file.path)
    .fetch_optional(&mut *conn)
    .await?;

    let now = now_iso8601();
    let show_id = uuid_to_str(file.show_id);
    let episode_id = uuid_to_str(file.episode_id);

    match existing {
        Some((_, size, modified, missing, stored_show, stored_episode))
            if size == file.size_bytes
                && modified == file.modified_ms
                && missing == 0
                && stored_show.as_deref() == Some(show_id.as_str())
                && stored_episode.as_deref() == Some(episode_id.as_str()) =>
        {
            Ok(FileChange::Unchanged)
        }
        Some((id, ..)) => {
            sqlx::query(
                r#"
                UPDATE media_files SET
                    size_bytes = ?2,
                    modified_ms = ?3,
                    show_id = ?4,
                    episode_id = ?5,
                    resolution = COALESCE(?6, resolution),
                    video_codec = COALESCE(?7, video_codec),
                    audio_codec = COALESCE(?8, audio_codec),
                    container = COALESCE(?9, container),
                    missing = 0,
                    analyzed_at = NULL,
                    updated_at = ?10
                WHERE id = ?1
                "#,
            )
            .bind(&id)
            .bind(file.size_bytes)
            .bind(file.modified_ms)
            .bind(&show_id)
            .bind(&episode_id)
            .bind(&file.resolution)
            .bind(&file.video_codec)
            .bind(&file.audio_codec)
            .bind(&file.container)
            .bind(&now)
            .execute(&mut *conn)
            .await?;

            Ok(FileChange::Updated)
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO media_files (
                    id, path, size_bytes, modified_ms, show_id, episode_id,
                    resolution, video_codec, audio_codec, container, missing, added_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)
                "#,
            )
            .bind(uuid_to_str(Uuid::new_v4()))
            .bind(&file.path)
            .bind(file.size_bytes)
            .bind(file.modified_ms)
            .bind(&show_id)
            .bind(&episode_id)
            .bind(&file.resolution)
            .bind(&file.video_codec)
            .bind(&file.audio_codec)
            .bind(&file.container)
            .bind(&now)
            .execute(&mut *conn)
            .await?;

            Ok(FileChange::Added)
        }
    }
}

pub struct MediaFileRepository {
    pool: SqlitePool,
}

impl MediaFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a media file by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM media_files WHERE id = ?1"
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a media file by path
    pub async fn get_by_path(&self, path: &str) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM media_files WHERE path = ?1"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List every file record, including missing ones
    pub async fn list_all(&self) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM media_files ORDER BY path"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List `(id, path)` of present files, optionally limited to one show
    pub async fn list_present(&self, show_id: Option<Uuid>) -> Result<Vec<(Uuid, String)>> {
        let rows: Vec<(String, String)> = match show_id {
            Some(show_id) => {
                sqlx::query_as(
                    "SELECT id, path FROM media_files WHERE missing = 0 AND show_id = ?1",
                )
                .bind(uuid_to_str(show_id))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT id, path FROM media_files WHERE missing = 0")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter()
            .map(|(id, path)| Ok((str_to_uuid(&id)?, path)))
            .collect()
    }

    /// Flag files as missing from disk
    pub async fn mark_missing(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = now_iso8601();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for id in ids {
            affected += sqlx::query(
                "UPDATE media_files SET missing = 1, updated_at = ?2 WHERE id = ?1 AND missing = 0",
            )
            .bind(uuid_to_str(*id))
            .bind(&now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;

        Ok(affected)
    }

    /// Store the result of a file analysis
    pub async fn record_analysis(&self, id: Uuid, analysis: &MediaFileAnalysis) -> Result<bool> {
        let now = now_iso8601();
        let result = sqlx::query(
            r#"
            UPDATE media_files SET
                resolution = COALESCE(?2, resolution),
                video_codec = COALESCE(?3, video_codec),
                audio_codec = COALESCE(?4, audio_codec),
                container = COALESCE(?5, container),
                direct_play = ?6,
                analyzed_at = ?7,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&analysis.resolution)
        .bind(&analysis.video_codec)
        .bind(&analysis.audio_codec)
        .bind(&analysis.container)
        .bind(bool_to_int(analysis.direct_play))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
