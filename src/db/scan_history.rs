//! Scan history database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{
    datetime_to_str, decode_err, str_to_datetime, str_to_uuid, str_to_uuid_opt, uuid_to_str,
};

/// One finished (or aborted) scan
#[derive(Debug, Clone)]
pub struct ScanHistoryRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub scan_type: String,
    pub show_id: Option<Uuid>,
    pub status: String,
    pub files_scanned: i64,
    pub files_added: i64,
    pub files_updated: i64,
    pub files_deleted: i64,
    pub error_count: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for ScanHistoryRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let task_id: String = row.try_get("task_id")?;
        let show_id: Option<String> = row.try_get("show_id")?;
        let started_at: String = row.try_get("started_at")?;
        let completed_at: String = row.try_get("completed_at")?;

        Ok(Self {
            id: str_to_uuid(&id).map_err(decode_err)?,
            task_id: str_to_uuid(&task_id).map_err(decode_err)?,
            scan_type: row.try_get("scan_type")?,
            show_id: str_to_uuid_opt(show_id.as_deref()).map_err(decode_err)?,
            status: row.try_get("status")?,
            files_scanned: row.try_get("files_scanned")?,
            files_added: row.try_get("files_added")?,
            files_updated: row.try_get("files_updated")?,
            files_deleted: row.try_get("files_deleted")?,
            error_count: row.try_get("error_count")?,
            started_at: str_to_datetime(&started_at).map_err(decode_err)?,
            completed_at: str_to_datetime(&completed_at).map_err(decode_err)?,
        })
    }
}

pub struct ScanHistoryRepository {
    pool: SqlitePool,
}

impl ScanHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a history row
    pub async fn create(&self, record: &ScanHistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_history (
                id, task_id, scan_type, show_id, status, files_scanned, files_added,
                files_updated, files_deleted, error_count, started_at, completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(uuid_to_str(record.id))
        .bind(uuid_to_str(record.task_id))
        .bind(&record.scan_type)
        .bind(record.show_id.map(uuid_to_str))
        .bind(&record.status)
        .bind(record.files_scanned)
        .bind(record.files_added)
        .bind(record.files_updated)
        .bind(record.files_deleted)
        .bind(record.error_count)
        .bind(datetime_to_str(record.started_at))
        .bind(datetime_to_str(record.completed_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent scans first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<ScanHistoryRecord>> {
        let records = sqlx::query_as::<_, ScanHistoryRecord>(
            r#"
            SELECT id, task_id, scan_type, show_id, status, files_scanned, files_added,
                   files_updated, files_deleted, error_count, started_at, completed_at
            FROM scan_history
            ORDER BY started_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
