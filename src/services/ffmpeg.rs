//! ffprobe-based media analysis
//!
//! Uses the ffprobe command line tool; its JSON output format is stable and
//! well documented.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::db::MediaFileAnalysis;

/// Video codecs every supported client decodes natively
const DIRECT_PLAY_VIDEO: &[&str] = &["h264", "hevc"];
/// Audio codecs every supported client decodes natively
const DIRECT_PLAY_AUDIO: &[&str] = &["aac", "ac3", "eac3", "mp3"];
/// Containers clients can open without remuxing
const DIRECT_PLAY_CONTAINERS: &[&str] = &["mp4", "mkv"];

/// Result of probing a media file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAnalysis {
    pub path: String,
    /// Short container name ("mkv", "mp4", or ffprobe's first format name)
    pub container: String,
    pub duration_secs: Option<f64>,
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStream {
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStream {
    pub index: usize,
    pub codec: String,
    pub channels: Option<u16>,
    pub language: Option<String>,
    pub is_default: bool,
}

/// FFprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub index: usize,
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub channels: Option<u16>,
        pub disposition: Option<Disposition>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Disposition {
        pub default: Option<i32>,
    }
}

impl MediaAnalysis {
    pub fn primary_video_stream(&self) -> Option<&VideoStream> {
        self.video_streams
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.video_streams.first())
    }

    pub fn primary_audio_stream(&self) -> Option<&AudioStream> {
        self.audio_streams
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.audio_streams.first())
    }

    pub fn resolution(&self) -> Option<&'static str> {
        self.primary_video_stream()
            .map(|v| detect_resolution(v.width, v.height))
    }

    /// Whether a typical client can play the file without transcoding
    pub fn is_direct_play(&self) -> bool {
        let video_ok = self
            .primary_video_stream()
            .is_some_and(|v| DIRECT_PLAY_VIDEO.contains(&v.codec.as_str()));
        let audio_ok = self
            .primary_audio_stream()
            .is_none_or(|a| DIRECT_PLAY_AUDIO.contains(&a.codec.as_str()));

        video_ok && audio_ok && DIRECT_PLAY_CONTAINERS.contains(&self.container.as_str())
    }

    /// Fields stored on the media file record
    pub fn to_file_analysis(&self) -> MediaFileAnalysis {
        MediaFileAnalysis {
            resolution: self.resolution().map(str::to_string),
            video_codec: self.primary_video_stream().map(|v| v.codec.clone()),
            audio_codec: self.primary_audio_stream().map(|a| a.codec.clone()),
            container: Some(self.container.clone()),
            direct_play: self.is_direct_play(),
        }
    }
}

/// Resolution category from video dimensions
pub fn detect_resolution(width: u32, height: u32) -> &'static str {
    if height >= 2160 || width >= 3840 {
        "2160p"
    } else if height >= 1080 || width >= 1920 {
        "1080p"
    } else if height >= 720 || width >= 1280 {
        "720p"
    } else if height >= 480 || width >= 854 {
        "480p"
    } else {
        "SD"
    }
}

/// ffprobe format names are comma-separated aliases
fn short_container(format_name: &str) -> String {
    let names: Vec<&str> = format_name.split(',').collect();
    if names.contains(&"matroska") {
        "mkv".to_string()
    } else if names.contains(&"mp4") || names.contains(&"mov") {
        "mp4".to_string()
    } else {
        names.first().copied().unwrap_or_default().to_string()
    }
}

/// Media analysis service using ffprobe
pub struct FfmpegService {
    ffprobe_path: String,
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::with_ffprobe_path("ffprobe".to_string())
    }
}

impl FfmpegService {
    pub fn with_ffprobe_path(ffprobe_path: String) -> Self {
        Self { ffprobe_path }
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Probe a media file
    pub async fn analyze(&self, path: &Path) -> Result<MediaAnalysis> {
        debug!(path = %path.display(), "Analyzing media file with ffprobe");

        if !path.exists() {
            anyhow::bail!(
                "ffprobe failed for '{}': file does not exist",
                path.display()
            );
        }

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!(
                "ffprobe failed for '{}' (exit code {}): {}",
                path.display(),
                exit_code,
                if stderr.is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            );
        }

        let analysis = parse_probe_output(&path.to_string_lossy(), &output.stdout)?;

        info!(
            path = %path.display(),
            container = %analysis.container,
            video_streams = analysis.video_streams.len(),
            audio_streams = analysis.audio_streams.len(),
            direct_play = analysis.is_direct_play(),
            "Media analysis complete"
        );

        Ok(analysis)
    }
}

/// Convert raw ffprobe JSON into a [MediaAnalysis]
pub fn parse_probe_output(path: &str, json: &[u8]) -> Result<MediaAnalysis> {
    let probe: ffprobe::FfprobeOutput =
        serde_json::from_slice(json).context("Failed to parse ffprobe JSON output")?;

    let (container, duration_secs) = match probe.format {
        Some(format) => (
            format
                .format_name
                .as_deref()
                .map(short_container)
                .unwrap_or_default(),
            format.duration.and_then(|d| d.parse::<f64>().ok()),
        ),
        None => (String::new(), None),
    };

    let mut video_streams = Vec::new();
    let mut audio_streams = Vec::new();

    for stream in probe.streams.unwrap_or_default() {
        let is_default = stream
            .disposition
            .as_ref()
            .and_then(|d| d.default)
            .is_some_and(|d| d == 1);
        let codec = stream.codec_name.clone().unwrap_or_default();

        match stream.codec_type.as_deref() {
            Some("video") => {
                // Cover art shows up as a video stream without dimensions
                if let (Some(width), Some(height)) = (stream.width, stream.height) {
                    video_streams.push(VideoStream {
                        index: stream.index,
                        codec,
                        width,
                        height,
                        is_default,
                    });
                }
            }
            Some("audio") => audio_streams.push(AudioStream {
                index: stream.index,
                codec,
                channels: stream.channels,
                language: stream.tags.as_ref().and_then(|t| t.get("language").cloned()),
                is_default,
            }),
            _ => {}
        }
    }

    Ok(MediaAnalysis {
        path: path.to_string(),
        container,
        duration_secs,
        video_streams,
        audio_streams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROBE: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "hevc", "codec_type": "video", "width": 1920, "height": 1080,
             "disposition": {"default": 1}},
            {"index": 1, "codec_name": "eac3", "codec_type": "audio", "channels": 6,
             "disposition": {"default": 1}, "tags": {"language": "eng"}},
            {"index": 2, "codec_name": "subrip", "codec_type": "subtitle"}
        ],
        "format": {"format_name": "matroska,webm", "duration": "2640.5"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let analysis = parse_probe_output("/tv/a.mkv", PROBE.as_bytes()).unwrap();
        assert_eq!(analysis.container, "mkv");
        assert_eq!(analysis.resolution(), Some("1080p"));
        assert_eq!(analysis.primary_audio_stream().unwrap().language.as_deref(), Some("eng"));
        assert!(analysis.is_direct_play());

        let stored = analysis.to_file_analysis();
        assert_eq!(stored.video_codec.as_deref(), Some("hevc"));
        assert_eq!(stored.audio_codec.as_deref(), Some("eac3"));
        assert!(stored.direct_play);
    }

    #[test]
    fn test_unsupported_audio_blocks_direct_play() {
        let json = PROBE.replace("eac3", "truehd");
        let analysis = parse_probe_output("/tv/a.mkv", json.as_bytes()).unwrap();
        assert!(!analysis.is_direct_play());
    }

    #[test]
    fn test_short_container() {
        assert_eq!(short_container("mov,mp4,m4a,3gp,3g2,mj2"), "mp4");
        assert_eq!(short_container("avi"), "avi");
    }

    #[test]
    fn test_detect_resolution() {
        assert_eq!(detect_resolution(3840, 2160), "2160p");
        assert_eq!(detect_resolution(1280, 536), "720p");
        assert_eq!(detect_resolution(640, 360), "SD");
    }
}
