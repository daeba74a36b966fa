use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Recognized source video extensions (matched case-insensitively)
pub const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "mov", "avi", "flv", "wmv", "webm"];

/// Check if a path has a supported video extension
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// List the video files directly inside `dir`, sorted by path.
///
/// Subdirectories are not descended into and dangling symlinks are skipped. An
/// empty result is not an error; a missing or unreadable directory is.
pub fn discover_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("Input directory does not exist: {}", dir.display()));
    }

    let mut videos = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();

        // Symlinks count when they resolve to a regular file
        if !path.is_file() {
            debug!("Skipping non-file entry: {}", path.display());
            continue;
        }

        if is_video_file(path) {
            videos.push(path.to_path_buf());
        }
    }

    videos.sort();

    info!("🔍 Discovered {} videos in {}", videos.len(), dir.display());
    Ok(videos)
}
