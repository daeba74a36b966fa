use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::audio::stderr_tail;

/// yt-dlp format selector: best single file no taller than 720p
pub const DOWNLOAD_FORMAT: &str = "best[height<=720]";

/// Fetches a remote video into a local directory so it can be batch processed
#[derive(Debug, Clone)]
pub struct VideoDownloader {
    pub ytdlp_bin: String,
}

impl VideoDownloader {
    pub fn new() -> Self {
        Self {
            ytdlp_bin: "yt-dlp".to_string(),
        }
    }

    pub fn with_ytdlp_bin(mut self, bin: impl Into<String>) -> Self {
        self.ytdlp_bin = bin.into();
        self
    }

    pub fn download_args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            DOWNLOAD_FORMAT.to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            dest_dir.join("%(title)s.%(ext)s").to_string_lossy().to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            url.to_string(),
        ]
    }

    /// Download `url` into `dest_dir` and return the path of the saved file
    pub async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        if url.trim().is_empty() {
            return Err(anyhow!("Empty video URL"));
        }

        info!("🌐 Downloading {} into {}", url, dest_dir.display());
        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Cannot create download directory {}", dest_dir.display()))?;

        let args = self.download_args(url, dest_dir);
        debug!("Executing {} {:?}", self.ytdlp_bin, args);

        let output = Command::new(&self.ytdlp_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ytdlp_bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.ytdlp_bin,
                output.status,
                stderr_tail(&stderr, 5)
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = downloaded_path(&stdout)
            .ok_or_else(|| anyhow!("{} did not report a downloaded file", self.ytdlp_bin))?;

        info!("✅ Downloaded: {}", path.display());
        Ok(path)
    }
}

impl Default for VideoDownloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Last non-empty line of yt-dlp's `--print after_move:filepath` output
fn downloaded_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_download_args() {
        let downloader = VideoDownloader::new();
        let args = downloader.download_args("https://example.com/v", Path::new("/tmp/dl"));

        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "best[height<=720]");
        assert!(args.contains(&"/tmp/dl/%(title)s.%(ext)s".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/v");
    }

    #[test]
    fn test_downloaded_path_takes_last_line() {
        let stdout = "[info] something\n/tmp/dl/My Talk.mp4\n\n";
        assert_eq!(downloaded_path(stdout), Some(PathBuf::from("/tmp/dl/My Talk.mp4")));
        assert_eq!(downloaded_path("  \n"), None);
    }

    #[test]
    fn test_empty_url_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = VideoDownloader::new();
        let result = tokio_test::block_on(downloader.download("  ", temp_dir.path()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_fails() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = VideoDownloader::new().with_ytdlp_bin("definitely-not-yt-dlp-binary");
        let result = downloader.download("https://example.com/v", temp_dir.path()).await;
        assert!(result.is_err());
    }
}
