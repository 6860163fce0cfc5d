//! Database connection and operations

pub mod episodes;
pub mod media_files;
pub mod scan_history;
pub mod schema;
pub mod settings;
pub mod sqlite_helpers;
pub mod tv_shows;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use episodes::{EpisodeRecord, EpisodeRepository, UpsertEpisode};
pub use media_files::{
    FileChange, MediaFileAnalysis, MediaFileRecord, MediaFileRepository, ScannedFile,
};
pub use scan_history::{ScanHistoryRecord, ScanHistoryRepository};
pub use schema::SchemaSyncResult;
pub use settings::{MAX_PARALLEL_TASKS_KEY, SettingsRepository};
pub use tv_shows::{
    CreateTvShow, SeasonRecord, ShowMetadataUpdate, TvShowRecord, TvShowRepository,
};

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    url: String,
}

impl Database {
    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Open a connection pool for a SQLite path or URL.
    ///
    /// The URL is normalized first (see [normalize_database_url]) so that
    /// [Database::url] can be handed to a worker thread and reopened there.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = normalize_database_url(url)?;

        let base = if url == IN_MEMORY_URL {
            SqliteConnectOptions::from_str(IN_MEMORY_URL)?
        } else {
            let path = database_file(&url);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        let options = base
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        // An in-memory database only exists for the lifetime of one connection
        let max_connections = if url == IN_MEMORY_URL {
            1
        } else {
            Self::get_max_connections()
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database {}", url))?;

        Ok(Self { pool, url })
    }

    /// Connect and make sure every table exists
    pub async fn connect_and_sync(url: &str) -> Result<Self> {
        let db = Self::connect(url).await?;
        db.sync_schema().await?;
        Ok(db)
    }

    /// Create missing tables and indexes
    pub async fn sync_schema(&self) -> Result<SchemaSyncResult> {
        schema::sync_schema(&self.pool).await
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Normalized connection URL (absolute path for file databases)
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get a TV show repository
    pub fn tv_shows(&self) -> TvShowRepository {
        TvShowRepository::new(self.pool.clone())
    }

    /// Get an episode repository
    pub fn episodes(&self) -> EpisodeRepository {
        EpisodeRepository::new(self.pool.clone())
    }

    /// Get a media files repository
    pub fn media_files(&self) -> MediaFileRepository {
        MediaFileRepository::new(self.pool.clone())
    }

    /// Get a scan history repository
    pub fn scan_history(&self) -> ScanHistoryRepository {
        ScanHistoryRepository::new(self.pool.clone())
    }

    /// Get a settings repository
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }
}

/// Normalize a SQLite path or URL into `sqlite://<absolute path>`.
///
/// Relative paths are resolved against the current working directory so the
/// resulting string means the same file from any thread or process.
pub fn normalize_database_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("Database URL is empty");
    }
    if raw == IN_MEMORY_URL || raw == ":memory:" {
        return Ok(IN_MEMORY_URL.to_string());
    }

    let path = raw
        .strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
        .unwrap_or(raw);
    // Drop query parameters such as `?mode=rwc`; options are set on connect
    let path = path.split('?').next().unwrap_or(path);

    let path = Path::new(path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read current directory")?
            .join(path)
    };

    Ok(format!("sqlite://{}", absolute.display()))
}

fn database_file(normalized: &str) -> PathBuf {
    PathBuf::from(normalized.trim_start_matches("sqlite://"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative_path() {
        let url = normalize_database_url("./data/curator.db").unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains(&cwd.display().to_string()));
        assert!(url.ends_with("curator.db"));
    }

    #[test]
    fn test_normalize_keeps_absolute_path() {
        assert_eq!(
            normalize_database_url("sqlite:///var/lib/curator.db?mode=rwc").unwrap(),
            "sqlite:///var/lib/curator.db"
        );
        assert_eq!(
            normalize_database_url("/var/lib/curator.db").unwrap(),
            "sqlite:///var/lib/curator.db"
        );
    }

    #[test]
    fn test_normalize_memory() {
        assert_eq!(normalize_database_url(":memory:").unwrap(), IN_MEMORY_URL);
        assert!(normalize_database_url("  ").is_err());
    }

    #[tokio::test]
    async fn test_connect_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("curator.db");
        let db = Database::connect_and_sync(path.to_str().unwrap()).await.unwrap();

        assert!(path.exists());
        assert_eq!(db.url(), format!("sqlite://{}", path.display()));
        let second = db.sync_schema().await.unwrap();
        assert!(second.errors.is_empty());
    }
}
