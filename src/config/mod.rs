//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// SQLite database path or `sqlite:` URL
    pub database_url: String,

    /// Library root directories scanned by a full library scan
    pub media_paths: Vec<PathBuf>,

    /// TMDB API key
    pub tmdb_api_key: Option<String>,

    /// Path to the ffprobe binary used by file analysis
    pub ffprobe_path: String,

    /// Default maximum number of concurrently running tasks.
    /// Overridden at startup by the persisted `tasks.max_parallel` setting.
    pub max_parallel_tasks: i64,

    /// How long a finished task stays queryable before it is purged
    pub task_retention: Duration,

    /// Delay between items inside metadata workers (provider rate limit)
    pub metadata_item_delay: Duration,

    /// Cron expression for the scheduled library scan
    pub scan_schedule: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/curator.db".to_string());

        let media_paths = env::var("MEDIA_PATHS")
            .or_else(|_| env::var("MEDIA_PATH"))
            .unwrap_or_else(|_| "./data/media".to_string());

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_url,

            media_paths: parse_path_list(&media_paths),

            tmdb_api_key: env::var("TMDB_API_KEY").ok().filter(|k| !k.trim().is_empty()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            max_parallel_tasks: env::var("MAX_PARALLEL_TASKS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),

            task_retention: Duration::from_secs(
                env::var("TASK_RETENTION_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .context("Invalid TASK_RETENTION_SECS")?,
            ),

            metadata_item_delay: Duration::from_millis(
                env::var("METADATA_ITEM_DELAY_MS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .unwrap_or(250),
            ),

            scan_schedule: env::var("SCAN_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
        })
    }
}

/// Split a comma-separated list of directories, dropping empty entries
fn parse_path_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_list() {
        let paths = parse_path_list("/media/tv, /media/anime,,");
        assert_eq!(paths, vec![PathBuf::from("/media/tv"), PathBuf::from("/media/anime")]);
    }

    #[test]
    fn test_parse_path_list_empty() {
        assert!(parse_path_list("  ").is_empty());
    }
}
