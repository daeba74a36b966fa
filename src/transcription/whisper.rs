use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{DecodeOptions, TranscriberFactory, Transcribe, TranscriptSegment};
use crate::audio::stderr_tail;
use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

/// Command-line Whisper implementation selected at load time
#[derive(Debug, Clone, PartialEq)]
pub enum WhisperBackend {
    /// whisper.cpp (`whisper-cli` / `whisper-cpp`) with a resolved ggml model file
    Cpp { bin: String, model_path: PathBuf },
    /// Python front-ends sharing the openai-whisper flags
    /// (`whisper-ctranslate2`, `whisper`)
    Python { bin: String, vad_filter: bool },
}

impl WhisperBackend {
    pub fn name(&self) -> &str {
        match self {
            WhisperBackend::Cpp { bin, .. } => bin,
            WhisperBackend::Python { bin, .. } => bin,
        }
    }
}

/// Loads one `WhisperTranscriber` per worker
#[derive(Debug, Clone)]
pub struct WhisperFactory {
    model: String,
    timeout: Duration,
    backend: Option<WhisperBackend>,
}

impl WhisperFactory {
    pub fn new(model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            timeout,
            backend: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.model.clone(),
            Duration::from_secs(config.transcribe_timeout_secs),
        )
    }

    /// Skip backend detection and use this backend
    pub fn with_backend(mut self, backend: WhisperBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TranscriberFactory for WhisperFactory {
    type Transcriber = WhisperTranscriber;

    async fn load(&self) -> PipelineResult<WhisperTranscriber> {
        let backend = match &self.backend {
            Some(backend) => backend.clone(),
            None => detect_backend(&self.model)
                .await
                .map_err(|e| PipelineError::ModelLoad(e.to_string()))?,
        };

        info!("⚙️  Loaded {} backend with model {}", backend.name(), self.model);

        Ok(WhisperTranscriber {
            backend,
            model: self.model.clone(),
            timeout: self.timeout,
        })
    }
}

/// Whisper transcriber driving one command-line backend
#[derive(Debug, Clone)]
pub struct WhisperTranscriber {
    backend: WhisperBackend,
    model: String,
    timeout: Duration,
}

impl WhisperTranscriber {
    pub fn backend(&self) -> &WhisperBackend {
        &self.backend
    }

    /// Command line for one transcription, writing JSON into `scratch_dir`
    pub fn build_command(
        &self,
        audio_path: &Path,
        scratch_dir: &Path,
        options: &DecodeOptions,
    ) -> Command {
        match &self.backend {
            WhisperBackend::Cpp { bin, model_path } => {
                let base_name = audio_path.file_stem().unwrap_or_default().to_string_lossy().to_string();
                let output_prefix = scratch_dir.join(base_name);

                let mut cmd = Command::new(bin);
                cmd.arg("-m").arg(model_path)
                    .arg("-f").arg(audio_path)
                    .arg("-oj") // JSON output
                    .arg("-of").arg(&output_prefix)
                    .arg("-bs").arg(options.beam_size.to_string())
                    .arg("-l").arg(options.language.as_hint().unwrap_or("auto"));

                // whisper.cpp has no patience knob
                debug!("Patience {} ignored by {}", options.patience, bin);
                cmd
            }
            WhisperBackend::Python { bin, vad_filter } => {
                let mut cmd = Command::new(bin);
                cmd.arg(audio_path)
                    .arg("--model").arg(&self.model)
                    .arg("--output_dir").arg(scratch_dir)
                    .arg("--output_format").arg("json")
                    .arg("--verbose").arg("False")
                    .arg("--beam_size").arg(options.beam_size.to_string())
                    .arg("--patience").arg(options.patience.to_string());

                if let Some(language) = options.language.as_hint() {
                    cmd.arg("--language").arg(language);
                }

                if *vad_filter {
                    cmd.arg("--vad_filter").arg("True");
                } else {
                    cmd.arg("--fp16").arg("False");
                }
                cmd
            }
        }
    }
}

#[async_trait]
impl Transcribe for WhisperTranscriber {
    async fn transcribe(
        &mut self,
        audio_path: &Path,
        options: &DecodeOptions,
    ) -> PipelineResult<Vec<TranscriptSegment>> {
        let start_time = Instant::now();
        let backend_name = self.backend.name().to_string();

        info!("🎤 Starting {} transcription for: {}", backend_name, audio_path.display());

        // Private scratch directory next to the audio, removed on drop
        let scratch_parent = audio_path.parent().unwrap_or_else(|| Path::new("."));
        let scratch_dir = tempfile::Builder::new()
            .prefix(".whisper_")
            .tempdir_in(scratch_parent)?;

        let mut cmd = self.build_command(audio_path, scratch_dir.path(), options);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing command: {:?}", cmd);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("❌ Failed to spawn {} command: {}", backend_name, e);
                return Err(PipelineError::Transcription(format!(
                    "failed to spawn {}: {}",
                    backend_name, e
                )));
            }
            Err(_) => {
                error!("⏰ {} command timed out after {}s", backend_name, self.timeout.as_secs());
                return Err(PipelineError::Transcription(format!(
                    "{} timed out after {} seconds",
                    backend_name,
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Transcription(format!(
                "{} exited with {}: {}",
                backend_name,
                output.status,
                stderr_tail(&stderr, 5)
            )));
        }

        let json_path = find_json_output(scratch_dir.path())
            .await?
            .ok_or_else(|| PipelineError::Transcription(format!("no {} JSON output found", backend_name)))?;

        let json_content = tokio::fs::read_to_string(&json_path).await?;
        let segments = parse_whisper_json(&json_content)
            .map_err(|e| PipelineError::Transcription(e.to_string()))?;

        info!(
            "🎉 Transcription completed in {:.1}s: {} segments",
            start_time.elapsed().as_secs_f64(),
            segments.len()
        );

        Ok(segments)
    }
}

/// Backend candidates in order of preference, with whether they are whisper.cpp
const BACKENDS: [(&str, bool); 4] = [
    ("whisper-ctranslate2", false), // faster-whisper front-end
    ("whisper-cli", true),          // whisper.cpp via Homebrew
    ("whisper-cpp", true),
    ("whisper", false),             // Python OpenAI Whisper (fallback)
];

/// Find the first installed Whisper backend and resolve its model
pub async fn detect_backend(model: &str) -> Result<WhisperBackend> {
    info!("🔍 Detecting available Whisper backends...");

    for (cmd_name, is_cpp) in BACKENDS {
        if !check_command_available(cmd_name).await {
            debug!("❌ {} not available", cmd_name);
            continue;
        }

        info!("✅ Found {} backend", cmd_name);

        if !is_cpp {
            return Ok(WhisperBackend::Python {
                bin: cmd_name.to_string(),
                vad_filter: cmd_name == "whisper-ctranslate2",
            });
        }

        match resolve_ggml_model(model) {
            Some(model_path) => {
                return Ok(WhisperBackend::Cpp {
                    bin: cmd_name.to_string(),
                    model_path,
                })
            }
            None => warn!("⚠️  {} found but no ggml model for '{}'", cmd_name, model),
        }
    }

    Err(anyhow!(
        "No usable Whisper backend found. Install whisper-ctranslate2, whisper.cpp \
         (with a ggml-{}.bin model) or openai-whisper",
        model
    ))
}

/// Candidate locations of a whisper.cpp model file
pub fn ggml_model_candidates(model: &str) -> Vec<PathBuf> {
    let file_name = format!("ggml-{}.bin", model);
    let mut candidates = vec![PathBuf::from(model)];

    if let Ok(dir) = std::env::var("WHISPER_MODEL_DIR") {
        candidates.push(PathBuf::from(dir).join(&file_name));
    }

    candidates.extend([
        PathBuf::from("models").join(&file_name),
        PathBuf::from("/usr/local/share/whisper-cpp").join(&file_name),
        PathBuf::from("/opt/homebrew/share/whisper-cpp").join(&file_name),
    ]);

    candidates
}

fn resolve_ggml_model(model: &str) -> Option<PathBuf> {
    ggml_model_candidates(model).into_iter().find(|path| path.is_file())
}

/// Check if a command can be spawned
async fn check_command_available(cmd_name: &str) -> bool {
    Command::new(cmd_name)
        .arg("--help")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok()
}

async fn find_json_output(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

/// Parse the JSON written by either backend family into ordered segments
pub fn parse_whisper_json(json: &str) -> Result<Vec<TranscriptSegment>> {
    let output: WhisperOutput = serde_json::from_str(json)?;

    if let Some(transcription) = output.transcription {
        // whisper.cpp: millisecond offsets
        return Ok(transcription
            .into_iter()
            .map(|seg| {
                TranscriptSegment::new(
                    seg.offsets.from as f64 / 1000.0,
                    seg.offsets.to as f64 / 1000.0,
                    seg.text,
                )
            })
            .collect());
    }

    if let Some(segments) = output.segments {
        return Ok(segments
            .into_iter()
            .map(|seg| TranscriptSegment::new(seg.start, seg.end, seg.text))
            .collect());
    }

    Err(anyhow!("Whisper JSON contains neither 'transcription' nor 'segments'"))
}

/// Whisper JSON output (both backend families)
#[derive(Debug, Clone, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    transcription: Option<Vec<WhisperTranscriptionSegment>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperTranscriptionSegment {
    offsets: WhisperOffsets,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}
