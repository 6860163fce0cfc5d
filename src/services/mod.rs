//! External service integrations

pub mod ffmpeg;
pub mod filename_parser;
pub mod metadata;
pub mod rate_limiter;
pub mod tmdb;

pub use ffmpeg::{FfmpegService, MediaAnalysis};
pub use filename_parser::{ParsedEpisode, normalize_show_name, parse_episode};
pub use metadata::{EpisodeMetadata, MetadataProvider, ShowMatch, ShowMetadata};
pub use tmdb::TmdbClient;
