//! Filename parser for scene-style episode names
//!
//! Parses filenames like:
//! - "Chicago Fire S14E08 1080p WEB h264-ETHEL"
//! - "Corner.Gas.6x12.Super.Sensitive.720p.HDTV"
//! - "Chicago Fire (2012) Season 2 Episode 3.mkv"
//! - "The.Daily.Show.2026.01.07.Stephen.J.Dubner.720p.WEB.h264-EDITH"

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static SXXEXX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*[Ss](\d{1,2})[Ee](\d{1,3})").unwrap());
static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+(\d{1,2})x(\d{2,3})\b").unwrap());
static VERBOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s*Season\s*(\d+).*?Episode\s*(\d+)").unwrap());
static DAILY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s+((?:19|20)\d{2})\s+(\d{2})\s+(\d{2})\b").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(?(19\d{2}|20\d{2})\)?\s*$").unwrap());
static COUNTRY_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\(?(US|UK|AU|NZ)\)?\s*$").unwrap());
static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(2160p|1080p|720p|576p|480p|4K|UHD)\b").unwrap());
static SPECIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Parsed episode information from a filename
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEpisode {
    pub show_name: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u32>,
    /// YYYY-MM-DD for daily shows
    pub date: Option<String>,
    pub resolution: Option<String>,
    pub codec: Option<String>,
}

impl ParsedEpisode {
    /// Show, season and episode all known
    pub fn is_complete(&self) -> bool {
        self.show_name.as_deref().is_some_and(|s| !s.is_empty())
            && self.season.is_some()
            && self.episode.is_some()
    }
}

/// Parse a filename (with or without extension) to extract episode information
pub fn parse_episode(filename: &str) -> ParsedEpisode {
    let stem = strip_extension(filename);
    let cleaned = SPACE_RE
        .replace_all(&stem.replace(['.', '_'], " "), " ")
        .trim()
        .to_string();

    let mut result = ParsedEpisode::default();

    let numbered = [&*SXXEXX_RE, &*NXNN_RE, &*VERBOSE_RE]
        .into_iter()
        .find_map(|re| re.captures(&cleaned));

    if let Some(caps) = numbered {
        let raw_name = &caps[1];
        result.year = trailing_year(raw_name);
        result.show_name = Some(clean_show_name(raw_name)).filter(|n| !n.is_empty());
        result.season = caps[2].parse().ok();
        result.episode = caps[3].parse().ok();
    } else if let Some(caps) = DAILY_RE.captures(&cleaned) {
        result.show_name = Some(clean_show_name(&caps[1]));
        result.date = Some(format!("{}-{}-{}", &caps[2], &caps[3], &caps[4]));
        result.year = caps[2].parse().ok();
    }

    if result.year.is_none() {
        // A year elsewhere in the name still helps disambiguate remakes
        if let Some(name) = &result.show_name {
            if let Some(caps) = YEAR_RE.captures(name) {
                result.year = caps[1].parse().ok();
            }
        }
    }

    result.resolution = parse_resolution(filename);
    result.codec = parse_codec(filename);

    debug!(
        filename = filename,
        show = ?result.show_name,
        season = ?result.season,
        episode = ?result.episode,
        "Parsed filename"
    );

    result
}

/// Resolution tag, normalized so 4K/UHD read as 2160p
pub fn parse_resolution(filename: &str) -> Option<String> {
    RESOLUTION_RE.captures(filename).map(|caps| {
        match caps[1].to_uppercase().as_str() {
            "4K" | "UHD" => "2160p".to_string(),
            other => other.to_lowercase(),
        }
    })
}

/// Video codec tag
pub fn parse_codec(filename: &str) -> Option<String> {
    let upper = filename.to_uppercase();
    let codec = if ["X265", "H265", "H.265", "H 265", "HEVC"]
        .iter()
        .any(|t| upper.contains(t))
    {
        "HEVC"
    } else if ["X264", "H264", "H.264", "H 264", "AVC"]
        .iter()
        .any(|t| upper.contains(t))
    {
        "H.264"
    } else if upper.contains("AV1") {
        "AV1"
    } else if upper.contains("XVID") {
        "XviD"
    } else {
        return None;
    };
    Some(codec.to_string())
}

fn strip_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if (2..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) => stem,
        _ => filename,
    }
}

fn trailing_year(name: &str) -> Option<u32> {
    TRAILING_YEAR_RE
        .captures(name.trim())
        .and_then(|caps| caps[1].parse().ok())
}

/// Clean up the show name
fn clean_show_name(name: &str) -> String {
    let cleaned = name.replace('-', " ");
    let cleaned = TRAILING_YEAR_RE.replace(cleaned.trim(), "");
    let cleaned = COUNTRY_SUFFIX_RE.replace(&cleaned, "");
    SPACE_RE.replace_all(&cleaned, " ").trim().to_string()
}

/// Key used to match show names regardless of case, punctuation and
/// leading articles
pub fn normalize_show_name(name: &str) -> String {
    let mut normalized = name.to_lowercase();

    for article in ["the ", "a ", "an "] {
        if let Some(rest) = normalized.strip_prefix(article) {
            normalized = rest.to_string();
            break;
        }
    }

    let normalized = normalized.replace('&', "and");
    let normalized = SPECIAL_RE.replace_all(&normalized, "");
    SPACE_RE.replace_all(&normalized, " ").trim().to_string()
}

/// Similarity between two show names (0.0 to 1.0)
pub fn show_name_similarity(name1: &str, name2: &str) -> f64 {
    let n1 = normalize_show_name(name1);
    let n2 = normalize_show_name(name2);

    if n1 == n2 {
        return 1.0;
    }

    strsim::normalized_levenshtein(&n1, &n2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_sxxexx() {
        let result = parse_episode("Chicago Fire S14E08 1080p WEB h264-ETHEL.mkv");
        assert_eq!(result.show_name.as_deref(), Some("Chicago Fire"));
        assert_eq!(result.season, Some(14));
        assert_eq!(result.episode, Some(8));
        assert_eq!(result.resolution.as_deref(), Some("1080p"));
        assert_eq!(result.codec.as_deref(), Some("H.264"));
        assert!(result.is_complete());
    }

    #[test]
    fn test_parse_dotted_with_year() {
        let result = parse_episode("Doctor.Who.2005.S01E01.Rose.720p.mp4");
        assert_eq!(result.show_name.as_deref(), Some("Doctor Who"));
        assert_eq!(result.year, Some(2005));
        assert_eq!((result.season, result.episode), (Some(1), Some(1)));
    }

    #[test]
    fn test_parse_nxnn_and_verbose() {
        let result = parse_episode("Corner.Gas.6x12.Super.Sensitive.avi");
        assert_eq!(result.show_name.as_deref(), Some("Corner Gas"));
        assert_eq!((result.season, result.episode), (Some(6), Some(12)));

        let result = parse_episode("Chicago Fire Season 2 Episode 3.mkv");
        assert_eq!(result.show_name.as_deref(), Some("Chicago Fire"));
        assert_eq!((result.season, result.episode), (Some(2), Some(3)));
    }

    #[test]
    fn test_parse_daily_show_is_incomplete() {
        let result = parse_episode("The.Daily.Show.2026.01.07.Stephen.J.Dubner.720p.WEB.h264-EDITH.mkv");
        assert_eq!(result.show_name.as_deref(), Some("The Daily Show"));
        assert_eq!(result.date.as_deref(), Some("2026-01-07"));
        assert!(!result.is_complete());
    }

    #[test]
    fn test_parse_bare_episode_number() {
        let result = parse_episode("S02E05.mkv");
        assert_eq!(result.show_name, None);
        assert_eq!((result.season, result.episode), (Some(2), Some(5)));
        assert!(!result.is_complete());
    }

    #[test]
    fn test_unparseable_name() {
        let result = parse_episode("holiday-video.mkv");
        assert!(result.show_name.is_none());
        assert!(!result.is_complete());
    }

    #[test]
    fn test_normalize_show_name() {
        assert_eq!(normalize_show_name("The Office (US)"), "office us");
        assert_eq!(normalize_show_name("Law & Order: SVU"), "law and order svu");
        assert_eq!(normalize_show_name("  Chicago   Fire "), "chicago fire");
    }

    #[test]
    fn test_show_name_similarity() {
        assert!(show_name_similarity("Chicago Fire", "chicago fire") > 0.99);
        assert!(show_name_similarity("The Office", "Office") > 0.99);
        assert!(show_name_similarity("Chicago Fire", "Chicago PD") > 0.5);
        assert!(show_name_similarity("Chicago Fire", "Bluey") < 0.3);
    }
}
