//! TMDB (The Movie Database) API client for TV metadata
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Rate limiting: TMDB allows ~40 requests per 10 seconds.
//! This client uses rate limiting and retry logic to handle this gracefully.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::metadata::{EpisodeMetadata, MetadataProvider, SeasonSummary, ShowMatch, ShowMetadata};
use super::rate_limiter::{Attempt, RateLimitedClient, ResponseExt, RetryConfig, retry_async};

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";

/// TMDB API client with rate limiting and retry logic
pub struct TmdbClient {
    client: Arc<RateLimitedClient>,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbTvSearchResult {
    pub page: i32,
    pub results: Vec<TmdbTvShow>,
    pub total_pages: i32,
    pub total_results: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbTvShow {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub overview: Option<String>,
    pub first_air_date: Option<String>,
    pub poster_path: Option<String>,
    /// Only in show details
    pub status: Option<String>,
    /// Only in show details
    #[serde(default)]
    pub seasons: Vec<TmdbSeasonSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSeasonSummary {
    pub season_number: i32,
    pub name: Option<String>,
    pub episode_count: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbSeason {
    pub season_number: i32,
    #[serde(default)]
    pub episodes: Vec<TmdbEpisode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmdbEpisode {
    pub season_number: i32,
    pub episode_number: i32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
}

impl TmdbTvShow {
    pub fn year(&self) -> Option<i32> {
        self.first_air_date
            .as_ref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

impl TmdbClient {
    /// Create a new TMDB client with the given API key
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: Arc::new(RateLimitedClient::for_tmdb()?),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            retry_config: RetryConfig {
                max_retries: 3,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(10),
                multiplier: 2.0,
            },
        })
    }

    /// Point the client at another server (used by tests and proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Search for TV shows by name
    pub async fn search_tv(&self, query: &str, year: Option<i32>) -> Result<Vec<TmdbTvShow>> {
        info!(
            "Searching TMDB for show '{}'{}",
            query,
            year.map(|y| format!(" ({})", y)).unwrap_or_default()
        );

        let mut params = vec![
            ("query", query.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(y) = year {
            params.push(("first_air_date_year", y.to_string()));
        }

        let results: TmdbTvSearchResult = self
            .get_json("/search/tv", params, "tmdb_search_tv")
            .await?;

        debug!(count = results.results.len(), "TMDB search returned results");
        Ok(results.results)
    }

    /// Get show details by TMDB ID
    pub async fn get_tv(&self, tmdb_id: i64) -> Result<TmdbTvShow> {
        debug!("Fetching show details from TMDB (ID: {})", tmdb_id);
        self.get_json(&format!("/tv/{tmdb_id}"), Vec::new(), "tmdb_get_tv")
            .await
    }

    /// Get one season with its episodes
    pub async fn get_season(&self, tmdb_id: i64, season_number: i32) -> Result<TmdbSeason> {
        debug!(tmdb_id, season_number, "Fetching season from TMDB");
        self.get_json(
            &format!("/tv/{tmdb_id}/season/{season_number}"),
            Vec::new(),
            "tmdb_get_season",
        )
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
        operation: &str,
    ) -> Result<T> {
        if !self.has_api_key() {
            anyhow::bail!("TMDB API key not configured");
        }

        let url = format!("{}{}", self.base_url, path);
        let mut query = vec![("api_key", self.api_key.clone())];
        query.extend(params);

        retry_async(
            || {
                let client = self.client.clone();
                let url = url.clone();
                let query = query.clone();
                async move {
                    let response = client.get_with_query(&url, &query).await?;
                    classify(response).await
                }
            },
            &self.retry_config,
            operation,
        )
        .await
    }
}

async fn classify<T: DeserializeOwned>(response: Response) -> Result<Attempt<T>> {
    let status = response.status();

    if response.is_rate_limited() {
        warn!("TMDB rate limit hit, will retry");
        return Ok(Attempt::Retry(anyhow::anyhow!("Rate limited (429)")));
    }
    if response.is_transient_error() {
        return Ok(Attempt::Retry(anyhow::anyhow!("TMDB request failed with status: {status}")));
    }
    match status.as_u16() {
        401 => anyhow::bail!("TMDB API key is invalid"),
        404 => anyhow::bail!("Not found on TMDB"),
        _ if !status.is_success() => anyhow::bail!("TMDB request failed with status: {status}"),
        _ => {}
    }

    let body = response
        .json()
        .await
        .context("Failed to parse TMDB response")?;
    Ok(Attempt::Done(body))
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    async fn search_show(&self, query: &str, year: Option<i32>) -> Result<Vec<ShowMatch>> {
        let shows = self.search_tv(query, year).await?;
        Ok(shows
            .into_iter()
            .map(|s| ShowMatch {
                provider_id: s.id,
                year: s.year(),
                name: s.name,
                overview: s.overview,
            })
            .collect())
    }

    async fn show_details(&self, provider_id: i64) -> Result<ShowMetadata> {
        let show = self.get_tv(provider_id).await?;
        Ok(ShowMetadata {
            provider_id: show.id,
            name: show.name,
            overview: show.overview,
            status: show.status,
            poster_path: show.poster_path,
            first_air_date: show.first_air_date,
            seasons: show
                .seasons
                .into_iter()
                .map(|s| SeasonSummary {
                    season_number: s.season_number,
                    name: s.name,
                    episode_count: s.episode_count,
                })
                .collect(),
        })
    }

    async fn season_episodes(
        &self,
        provider_id: i64,
        season_number: i32,
    ) -> Result<Vec<EpisodeMetadata>> {
        let season = self.get_season(provider_id, season_number).await?;
        Ok(season
            .episodes
            .into_iter()
            .map(|e| EpisodeMetadata {
                season_number: e.season_number,
                episode_number: e.episode_number,
                title: e.name,
                air_date: e.air_date,
                overview: e.overview,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_details_decode() {
        let json = r#"{
            "id": 82728,
            "name": "Bluey",
            "original_name": "Bluey",
            "overview": "A Blue Heeler puppy",
            "first_air_date": "2018-10-01",
            "poster_path": "/b.jpg",
            "status": "Returning Series",
            "seasons": [{"season_number": 1, "name": "Season 1", "episode_count": 52}]
        }"#;
        let show: TmdbTvShow = serde_json::from_str(json).unwrap();
        assert_eq!(show.year(), Some(2018));
        assert_eq!(show.seasons[0].episode_count, Some(52));
    }

    #[test]
    fn test_search_result_without_seasons() {
        let json = r#"{"page":1,"total_pages":1,"total_results":1,
            "results":[{"id":1,"name":"Chicago Fire","original_name":null,"overview":null,
                        "first_air_date":"2012-10-10","poster_path":null,"status":null}]}"#;
        let result: TmdbTvSearchResult = serde_json::from_str(json).unwrap();
        assert!(result.results[0].seasons.is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_an_error() {
        let client = TmdbClient::new(String::new()).unwrap();
        let err = client.search_tv("Bluey", None).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
