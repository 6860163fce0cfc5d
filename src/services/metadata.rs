//! Metadata provider abstraction
//!
//! Bulk metadata jobs talk to a [MetadataProvider]; TMDB is the production
//! implementation. Matching a local show to a provider result is done here so
//! every provider shares the same rules.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::filename_parser::show_name_similarity;
use crate::db::ShowMetadataUpdate;

/// Minimum name similarity for an automatic match
pub const MATCH_THRESHOLD: f64 = 0.8;

/// Show search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowMatch {
    pub provider_id: i64,
    pub name: String,
    pub year: Option<i32>,
    pub overview: Option<String>,
}

/// Season summary from show details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub season_number: i32,
    pub name: Option<String>,
    pub episode_count: Option<i32>,
}

/// Show details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowMetadata {
    pub provider_id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub status: Option<String>,
    pub poster_path: Option<String>,
    pub first_air_date: Option<String>,
    pub seasons: Vec<SeasonSummary>,
}

impl ShowMetadata {
    pub fn year(&self) -> Option<i32> {
        self.first_air_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }

    pub fn to_update(&self) -> ShowMetadataUpdate {
        ShowMetadataUpdate {
            tmdb_id: self.provider_id,
            overview: self.overview.clone(),
            status: self.status.clone(),
            poster_path: self.poster_path.clone(),
            first_air_date: self.first_air_date.clone(),
            year: self.year(),
        }
    }
}

/// Episode details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub season_number: i32,
    pub episode_number: i32,
    pub title: Option<String>,
    pub air_date: Option<String>,
    pub overview: Option<String>,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search_show(&self, query: &str, year: Option<i32>) -> Result<Vec<ShowMatch>>;

    async fn show_details(&self, provider_id: i64) -> Result<ShowMetadata>;

    async fn season_episodes(
        &self,
        provider_id: i64,
        season_number: i32,
    ) -> Result<Vec<EpisodeMetadata>>;
}

/// Pick the candidate that best matches a local show.
///
/// Candidates below [MATCH_THRESHOLD] never match; among the rest an exact
/// year match breaks ties.
pub fn best_match<'a>(name: &str, year: Option<i32>, candidates: &'a [ShowMatch]) -> Option<&'a ShowMatch> {
    candidates
        .iter()
        .map(|c| {
            let mut score = show_name_similarity(name, &c.name);
            if year.is_some() && c.year == year {
                score += 0.1;
            }
            (c, score)
        })
        .filter(|(c, _)| show_name_similarity(name, &c.name) >= MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, name: &str, year: Option<i32>) -> ShowMatch {
        ShowMatch {
            provider_id: id,
            name: name.to_string(),
            year,
            overview: None,
        }
    }

    #[test]
    fn test_best_match_prefers_year() {
        let candidates = vec![
            candidate(1, "Doctor Who", Some(1963)),
            candidate(2, "Doctor Who", Some(2005)),
        ];
        assert_eq!(best_match("Doctor Who", Some(2005), &candidates).map(|c| c.provider_id), Some(2));
    }

    #[test]
    fn test_best_match_rejects_weak_candidates() {
        let candidates = vec![candidate(1, "Chicago Med", None)];
        assert!(best_match("Bluey", None, &candidates).is_none());
    }

    #[test]
    fn test_metadata_year_from_first_air_date() {
        let meta = ShowMetadata {
            provider_id: 9,
            name: "Bluey".into(),
            overview: None,
            status: None,
            poster_path: None,
            first_air_date: Some("2018-10-01".into()),
            seasons: vec![],
        };
        assert_eq!(meta.to_update().year, Some(2018));
        assert_eq!(meta.to_update().tmdb_id, 9);
    }
}
