//! Application settings database operations

use anyhow::Result;
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;

use super::sqlite_helpers::now_iso8601;

/// Key of the persisted max-parallel-tasks setting
pub const MAX_PARALLEL_TASKS_KEY: &str = "tasks.max_parallel";

/// Settings repository for database operations
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a raw setting value by key
    pub async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM app_settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Get a setting value as a specific type
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Get a setting value with a default
    pub async fn get_or_default<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T> {
        match self.get_value(key).await? {
            Some(v) => Ok(v),
            None => Ok(default),
        }
    }

    /// Set a setting value
    pub async fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json = serde_json::to_string(&value)?;
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&json)
        .bind(now_iso8601())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect_and_sync(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        let settings = db.settings();

        assert_eq!(settings.get_or_default(MAX_PARALLEL_TASKS_KEY, 3i64).await.unwrap(), 3);
        settings.set(MAX_PARALLEL_TASKS_KEY, 5i64).await.unwrap();
        settings.set(MAX_PARALLEL_TASKS_KEY, 6i64).await.unwrap();
        assert_eq!(settings.get_value::<i64>(MAX_PARALLEL_TASKS_KEY).await.unwrap(), Some(6));
    }
}
