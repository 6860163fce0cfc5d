//! Filesystem discovery of video files

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Video file extensions we recognize
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "ts", "m2ts",
];

/// A video file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub modified_ms: i64,
}

impl DiscoveredFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    // Roots are taken as given even when they start with a dot
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// One entry visited by a library walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Video(DiscoveredFile),
    /// Directories, non-video files and unreadable entries
    Other,
}

impl WalkEntry {
    pub fn into_video(self) -> Option<DiscoveredFile> {
        match self {
            WalkEntry::Video(file) => Some(file),
            WalkEntry::Other => None,
        }
    }
}

/// Lazily walk `roots`, yielding every visited entry.
///
/// Every call starts a fresh walk. Hidden files and directories are not
/// descended into, unreadable entries are logged and reported as
/// [WalkEntry::Other], and roots that do not exist are skipped.
pub fn walk_library(roots: &[PathBuf]) -> impl Iterator<Item = WalkEntry> + Send + 'static {
    let roots: Vec<PathBuf> = roots
        .iter()
        .filter(|root| {
            let exists = root.is_dir();
            if !exists {
                warn!(path = %root.display(), "Library root does not exist, skipping");
            }
            exists
        })
        .cloned()
        .collect();

    roots.into_iter().flat_map(|root| {
        WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() && is_video_file(entry.path()) => {
                    video_entry(entry)
                }
                Ok(_) => WalkEntry::Other,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    WalkEntry::Other
                }
            })
    })
}

/// Lazily walk `roots` for video files
pub fn discover_files(roots: &[PathBuf]) -> impl Iterator<Item = DiscoveredFile> + Send + 'static {
    walk_library(roots).filter_map(WalkEntry::into_video)
}

fn video_entry(entry: DirEntry) -> WalkEntry {
    let metadata = match entry.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!(path = %entry.path().display(), error = %e, "Skipping unreadable file");
            return WalkEntry::Other;
        }
    };
    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    WalkEntry::Video(DiscoveredFile {
        path: entry.into_path(),
        size: metadata.len(),
        modified_ms,
    })
}
