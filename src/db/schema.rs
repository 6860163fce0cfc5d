//! Schema bootstrap
//!
//! Every statement is idempotent (`IF NOT EXISTS`) so the sync can run on
//! each startup and from every worker that opens its own connection.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub errors: Vec<String>,
}

const TABLES: &[(&str, &str)] = &[
    (
        "tv_shows",
        r#"
        CREATE TABLE IF NOT EXISTS tv_shows (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            year INTEGER,
            path TEXT,
            tmdb_id INTEGER,
            overview TEXT,
            status TEXT,
            poster_path TEXT,
            first_air_date TEXT,
            metadata_updated_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "seasons",
        r#"
        CREATE TABLE IF NOT EXISTS seasons (
            id TEXT PRIMARY KEY,
            show_id TEXT NOT NULL REFERENCES tv_shows(id) ON DELETE CASCADE,
            season_number INTEGER NOT NULL,
            name TEXT,
            episode_count INTEGER,
            UNIQUE (show_id, season_number)
        )
        "#,
    ),
    (
        "episodes",
        r#"
        CREATE TABLE IF NOT EXISTS episodes (
            id TEXT PRIMARY KEY,
            show_id TEXT NOT NULL REFERENCES tv_shows(id) ON DELETE CASCADE,
            season_id TEXT NOT NULL REFERENCES seasons(id) ON DELETE CASCADE,
            season_number INTEGER NOT NULL,
            episode_number INTEGER NOT NULL,
            title TEXT,
            air_date TEXT,
            overview TEXT,
            UNIQUE (show_id, season_number, episode_number)
        )
        "#,
    ),
    (
        "media_files",
        r#"
        CREATE TABLE IF NOT EXISTS media_files (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            size_bytes INTEGER NOT NULL,
            modified_ms INTEGER NOT NULL,
            show_id TEXT REFERENCES tv_shows(id) ON DELETE SET NULL,
            episode_id TEXT REFERENCES episodes(id) ON DELETE SET NULL,
            resolution TEXT,
            video_codec TEXT,
            audio_codec TEXT,
            container TEXT,
            direct_play INTEGER,
            missing INTEGER NOT NULL DEFAULT 0,
            analyzed_at TEXT,
            added_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "scan_history",
        r#"
        CREATE TABLE IF NOT EXISTS scan_history (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            scan_type TEXT NOT NULL,
            show_id TEXT,
            status TEXT NOT NULL,
            files_scanned INTEGER NOT NULL,
            files_added INTEGER NOT NULL,
            files_updated INTEGER NOT NULL,
            files_deleted INTEGER NOT NULL,
            error_count INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "app_settings",
        r#"
        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tv_shows_normalized_name ON tv_shows(normalized_name)",
    "CREATE INDEX IF NOT EXISTS idx_media_files_show_id ON media_files(show_id)",
    "CREATE INDEX IF NOT EXISTS idx_scan_history_started_at ON scan_history(started_at)",
];

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Create all missing tables and indexes
pub async fn sync_schema(pool: &SqlitePool) -> Result<SchemaSyncResult> {
    let mut result = SchemaSyncResult::default();

    for (table, sql) in TABLES {
        let existed = table_exists(pool, table).await?;
        match sqlx::query(sql).execute(pool).await {
            Ok(_) if !existed => {
                debug!(table = %table, "Created table");
                result.tables_created.push(table.to_string());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(table = %table, error = %e, "Failed to create table");
                result.errors.push(format!("{}: {}", table, e));
            }
        }
    }

    for sql in INDEXES {
        if let Err(e) = sqlx::query(sql).execute(pool).await {
            warn!(error = %e, "Failed to create index");
            result.errors.push(e.to_string());
        }
    }

    if !result.tables_created.is_empty() {
        info!(tables = ?result.tables_created, "Schema sync created tables");
    }

    Ok(result)
}
