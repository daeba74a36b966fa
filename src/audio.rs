use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AudioFormat;
use crate::error::{PipelineError, PipelineResult};

/// Extraction collaborator: turns a video into an audio file inside `output_dir`
#[async_trait]
pub trait AudioExtract: Send + Sync {
    /// Extract the audio track of `video_path` to `<output_dir>/<stem>.<format>`
    async fn extract(
        &self,
        video_path: &Path,
        output_dir: &Path,
        stem: &str,
        format: AudioFormat,
    ) -> PipelineResult<PathBuf>;
}

/// Path of the audio artifact for a given output stem
pub fn audio_output_path(output_dir: &Path, stem: &str, format: AudioFormat) -> PathBuf {
    output_dir.join(format!("{}.{}", stem, format.extension()))
}

/// ffmpeg-backed audio extractor
#[derive(Debug, Clone)]
pub struct AudioExtractor {
    /// ffmpeg executable
    pub ffmpeg_bin: String,
    /// Sample rate used for WAV output (16kHz, Whisper's native rate)
    pub target_sample_rate: u32,
}

impl AudioExtractor {
    pub fn new() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            target_sample_rate: 16000,
        }
    }

    pub fn with_ffmpeg_bin(mut self, bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = bin.into();
        self
    }

    /// ffmpeg arguments for one extraction
    pub fn ffmpeg_args(&self, video_path: &Path, audio_path: &Path, format: AudioFormat) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            video_path.to_string_lossy().to_string(),
            "-vn".to_string(), // No video stream
        ];

        match format {
            AudioFormat::Wav => {
                args.extend([
                    "-ac".to_string(),
                    "1".to_string(), // Mono channel
                    "-ar".to_string(),
                    self.target_sample_rate.to_string(),
                ]);
            }
            AudioFormat::Mp3 => {
                args.extend(["-acodec".to_string(), "libmp3lame".to_string()]);
            }
        }

        args.push(audio_path.to_string_lossy().to_string());
        args
    }

    /// Check that ffmpeg can be executed
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for AudioExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioExtract for AudioExtractor {
    async fn extract(
        &self,
        video_path: &Path,
        output_dir: &Path,
        stem: &str,
        format: AudioFormat,
    ) -> PipelineResult<PathBuf> {
        let audio_path = audio_output_path(output_dir, stem, format);

        info!("🎵 Extracting audio from {} -> {}", video_path.display(), audio_path.display());

        tokio::fs::create_dir_all(output_dir).await?;

        let args = self.ffmpeg_args(video_path, &audio_path, format);
        debug!("Executing {} {:?}", self.ffmpeg_bin, args);

        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::Extraction(format!("failed to spawn {}: {}", self.ffmpeg_bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Extraction(format!(
                "{} exited with {}: {}",
                self.ffmpeg_bin,
                output.status,
                stderr_tail(&stderr, 5)
            )));
        }

        match tokio::fs::metadata(&audio_path).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => {
                return Err(PipelineError::Extraction(format!(
                    "no audio produced for {}",
                    video_path.display()
                )))
            }
        }

        info!("✅ Audio saved at: {}", audio_path.display());
        Ok(audio_path)
    }
}

/// Last `lines` non-empty lines of a tool's stderr, joined for an error message
pub(crate) fn stderr_tail(stderr: &str, lines: usize) -> String {
    let tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = tail.len().saturating_sub(lines);
    tail[start..].join(" | ")
}
