//! Episodes database repository

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::sqlite_helpers::{decode_err, str_to_uuid, uuid_to_str};
use super::tv_shows::find_or_create_season;

/// Episode record from database
#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub id: Uuid,
    pub show_id: Uuid,
    pub season_id: Uuid,
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub air_date: Option<String>,
    pub overview: Option<String>,
}

impl sqlx::FromRow<'_, SqliteRow> for EpisodeRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let id: String = row.try_get("id")?;
        let show_id: String = row.try_get("show_id")?;
        let season_id: String = row.try_get("season_id")?;
        Ok(Self {
            id: str_to_uuid(&id).map_err(decode_err)?,
            show_id: str_to_uuid(&show_id).map_err(decode_err)?,
            season_id: str_to_uuid(&season_id).map_err(decode_err)?,
            season_number: row.try_get("season_number")?,
            episode_number: row.try_get("episode_number")?,
            title: row.try_get("title")?,
            air_date: row.try_get("air_date")?,
            overview: row.try_get("overview")?,
        })
    }
}

/// Provider details for one episode
#[derive(Debug, Clone)]
pub struct UpsertEpisode {
    pub show_id: Uuid,
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub air_date: Option<String>,
    pub overview: Option<String>,
}

/// Find an episode by show/season/episode number or create a placeholder
/// (season row included). Returns the episode ID.
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    show_id: Uuid,
    season_number: i32,
    episode_number: i32,
) -> Result<Uuid> {
    let existing: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM episodes WHERE show_id = ?1 AND season_number = ?2 AND episode_number = ?3",
    )
    .bind(uuid_to_str(show_id))
    .bind(season_number)
    .bind(episode_number)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((id,)) = existing {
        return str_to_uuid(&id);
    }

    let season_id = find_or_create_season(conn, show_id, season_number).await?;
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO episodes (id, show_id, season_id, season_number, episode_number)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(uuid_to_str(id))
    .bind(uuid_to_str(show_id))
    .bind(uuid_to_str(season_id))
    .bind(season_number)
    .bind(episode_number)
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

pub struct EpisodeRepository {
    pool: SqlitePool,
}

impl EpisodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all episodes for a show
    pub async fn list_by_show(&self, show_id: Uuid) -> Result<Vec<EpisodeRecord>> {
        let records = sqlx::query_as::<_, EpisodeRecord>(
            r#"
            SELECT id, show_id, season_id, season_number, episode_number, title, air_date, overview
            FROM episodes
            WHERE show_id = ?1
            ORDER BY season_number, episode_number
            "#,
        )
        .bind(uuid_to_str(show_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Create the episode if needed, then store the provider details
    pub async fn upsert(&self, input: UpsertEpisode) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        let id = find_or_create(
            &mut tx,
            input.show_id,
            input.season_number,
            input.episode_number,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE episodes SET
                title = COALESCE(?2, title),
                air_date = COALESCE(?3, air_date),
                overview = COALESCE(?4, overview)
            WHERE id = ?1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&input.title)
        .bind(&input.air_date)
        .bind(&input.overview)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }
}
