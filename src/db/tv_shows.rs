//! TV show and season database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{
    decode_err, now_iso8601, str_to_datetime, str_to_datetime_opt, str_to_uuid, uuid_to_str,
};

/// TV show record from database
#[derive(Debug, Clone)]
pub struct TvShowRecord {
    pub id: Uuid,
    pub name: String,
    pub normalized_name: String,
    pub year: Option<i32>,
    pub path: Option<String>,
    pub tmdb_id: Option<i64>,
    pub overview: Option<String>,
    pub status: Option<String>,
    pub poster_path: Option<String>,
    pub first_air_date: Option<String>,
    pub metadata_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for TvShowRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let metadata_updated_at: Option<String> = row.try_get("metadata_updated_at")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            id: str_to_uuid(&id).map_err(decode_err)?,
            name: row.try_get("name")?,
            normalized_name: row.try_get("normalized_name")?,
            year: row.try_get("year")?,
            path: row.try_get("path")?,
            tmdb_id: row.try_get("tmdb_id")?,
            overview: row.try_get("overview")?,
            status: row.try_get("status")?,
            poster_path: row.try_get("poster_path")?,
            first_air_date: row.try_get("first_air_date")?,
            metadata_updated_at: str_to_datetime_opt(metadata_updated_at.as_deref())
                .map_err(decode_err)?,
            created_at: str_to_datetime(&created_at).map_err(decode_err)?,
            updated_at: str_to_datetime(&updated_at).map_err(decode_err)?,
        })
    }
}

/// Season record from database
#[derive(Debug, Clone)]
pub struct SeasonRecord {
    pub id: Uuid,
    pub show_id: Uuid,
    pub season_number: i32,
    pub name: Option<String>,
    pub episode_count: Option<i32>,
}

impl sqlx::FromRow<'_, SqliteRow> for SeasonRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let show_id: String = row.try_get("show_id")?;
        Ok(Self {
            id: str_to_uuid(&id).map_err(decode_err)?,
            show_id: str_to_uuid(&show_id).map_err(decode_err)?,
            season_number: row.try_get("season_number")?,
            name: row.try_get("name")?,
            episode_count: row.try_get("episode_count")?,
        })
    }
}

/// Input for creating a TV show
#[derive(Debug, Clone)]
pub struct CreateTvShow {
    pub name: String,
    pub normalized_name: String,
    pub year: Option<i32>,
    pub path: Option<String>,
}

/// Metadata fields written back after a provider lookup
#[derive(Debug, Clone, Default)]
pub struct ShowMetadataUpdate {
    pub tmdb_id: i64,
    pub overview: Option<String>,
    pub status: Option<String>,
    pub poster_path: Option<String>,
    pub first_air_date: Option<String>,
    pub year: Option<i32>,
}

const SHOW_COLUMNS: &str = "id, name, normalized_name, year, path, tmdb_id, overview, status, \
     poster_path, first_air_date, metadata_updated_at, created_at, updated_at";

/// Find a show by normalized name, disambiguated by year.
///
/// With a year, a show carrying that year wins over a show without one; a
/// show with a different year never matches. Without a year, the oldest
/// show with the name matches.
pub async fn find_by_normalized_name(
    conn: &mut SqliteConnection,
    normalized_name: &str,
    year: Option<i32>,
) -> Result<Option<TvShowRecord>> {
    let record = match year {
        Some(year) => {
            sqlx::query_as::<_, TvShowRecord>(&format!(
                "SELECT {SHOW_COLUMNS} FROM tv_shows
                 WHERE normalized_name = ?1 AND (year = ?2 OR year IS NULL)
                 ORDER BY (year IS NULL) ASC, created_at ASC
                 LIMIT 1"
            ))
            .bind(normalized_name)
            .bind(year)
            .fetch_optional(&mut *conn)
            .await?
        }
        None => {
            sqlx::query_as::<_, TvShowRecord>(&format!(
                "SELECT {SHOW_COLUMNS} FROM tv_shows
                 WHERE normalized_name = ?1
                 ORDER BY created_at ASC
                 LIMIT 1"
            ))
            .bind(normalized_name)
            .fetch_optional(&mut *conn)
            .await?
        }
    };

    Ok(record)
}

/// Insert a show on an existing connection (usually inside a transaction)
pub async fn insert(conn: &mut SqliteConnection, input: &CreateTvShow) -> Result<TvShowRecord> {
    let now = now_iso8601();
    let record = sqlx::query_as::<_, TvShowRecord>(&format!(
        "INSERT INTO tv_shows (id, name, normalized_name, year, path, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         RETURNING {SHOW_COLUMNS}"
    ))
    .bind(uuid_to_str(Uuid::new_v4()))
    .bind(&input.name)
    .bind(&input.normalized_name)
    .bind(input.year)
    .bind(&input.path)
    .bind(&now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(record)
}

/// Find a season row or create it
pub async fn find_or_create_season(
    conn: &mut SqliteConnection,
    show_id: Uuid,
    season_number: i32,
) -> Result<Uuid> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM seasons WHERE show_id = ?1 AND season_number = ?2")
            .bind(uuid_to_str(show_id))
            .bind(season_number)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some((id,)) = existing {
        return str_to_uuid(&id);
    }

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO seasons (id, show_id, season_number) VALUES (?1, ?2, ?3)")
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(show_id))
        .bind(season_number)
        .execute(&mut *conn)
        .await?;

    Ok(id)
}

pub struct TvShowRepository {
    pool: SqlitePool,
}

impl TvShowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a show by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<TvShowRecord>> {
        let record = sqlx::query_as::<_, TvShowRecord>(&format!(
            "SELECT {SHOW_COLUMNS} FROM tv_shows WHERE id = ?1"
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List every show ordered by name
    pub async fn list_all(&self) -> Result<Vec<TvShowRecord>> {
        let records = sqlx::query_as::<_, TvShowRecord>(&format!(
            "SELECT {SHOW_COLUMNS} FROM tv_shows ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List the shows with the given IDs, in the order requested. Unknown IDs are skipped.
    pub async fn list_by_ids(&self, ids: &[Uuid]) -> Result<Vec<TvShowRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_by_id(*id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// List shows that have not been matched to TMDB yet
    pub async fn list_unmatched(&self) -> Result<Vec<TvShowRecord>> {
        let records = sqlx::query_as::<_, TvShowRecord>(&format!(
            "SELECT {SHOW_COLUMNS} FROM tv_shows WHERE tmdb_id IS NULL ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Create a show
    pub async fn create(&self, input: CreateTvShow) -> Result<TvShowRecord> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, &input).await
    }

    /// Store provider metadata for a show
    pub async fn apply_metadata(&self, id: Uuid, update: &ShowMetadataUpdate) -> Result<bool> {
        let now = now_iso8601();
        let result = sqlx::query(
            r#"
            UPDATE tv_shows SET
                tmdb_id = ?2,
                overview = COALESCE(?3, overview),
                status = COALESCE(?4, status),
                poster_path = COALESCE(?5, poster_path),
                first_air_date = COALESCE(?6, first_air_date),
                year = COALESCE(year, ?7),
                metadata_updated_at = ?8,
                updated_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(update.tmdb_id)
        .bind(&update.overview)
        .bind(&update.status)
        .bind(&update.poster_path)
        .bind(&update.first_air_date)
        .bind(update.year)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Create or update a season with provider details
    pub async fn upsert_season(
        &self,
        show_id: Uuid,
        season_number: i32,
        name: Option<&str>,
        episode_count: Option<i32>,
    ) -> Result<Uuid> {
        let mut conn = self.pool.acquire().await?;
        let id = find_or_create_season(&mut conn, show_id, season_number).await?;

        sqlx::query(
            "UPDATE seasons SET name = COALESCE(?2, name), episode_count = COALESCE(?3, episode_count)
             WHERE id = ?1",
        )
        .bind(uuid_to_str(id))
        .bind(name)
        .bind(episode_count)
        .execute(&mut *conn)
        .await?;

        Ok(id)
    }

    /// List the seasons of a show
    pub async fn list_seasons(&self, show_id: Uuid) -> Result<Vec<SeasonRecord>> {
        let records = sqlx::query_as::<_, SeasonRecord>(
            "SELECT id, show_id, season_number, name, episode_count FROM seasons
             WHERE show_id = ?1 ORDER BY season_number",
        )
        .bind(uuid_to_str(show_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
