use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default location of the key/value configuration file
pub const DEFAULT_CONFIG_FILE: &str = "Config.txt";

/// Prefix for environment variable overrides (`SUBTITLER_MODEL=base`, ...)
pub const ENV_PREFIX: &str = "SUBTITLER_";

/// Audio container produced by the extraction stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    /// `wav` selects WAV, anything else falls back to MP3.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("wav") {
            AudioFormat::Wav
        } else {
            AudioFormat::Mp3
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Transcription language: a fixed ISO code or auto-detection by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Auto,
    Code(String),
}

impl Language {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("auto") {
            Language::Auto
        } else {
            Language::Code(value.to_string())
        }
    }

    /// Language hint to hand to the backend, `None` meaning auto-detect
    pub fn as_hint(&self) -> Option<&str> {
        match self {
            Language::Auto => None,
            Language::Code(code) => Some(code.as_str()),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Auto => f.write_str("auto"),
            Language::Code(code) => f.write_str(code),
        }
    }
}

/// Run parameters for one batch invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for source videos
    pub input_dir: PathBuf,

    /// Destination for extracted audio and subtitle files
    pub output_dir: PathBuf,

    /// Extracted audio format
    pub audio_format: AudioFormat,

    /// Whisper model identifier
    pub model: String,

    /// Transcription language
    pub language: Language,

    /// Decoder beam width
    pub beam_size: u32,

    /// Decoder patience factor
    pub patience: f64,

    /// Optional cap on parallel workers (`None` = number of logical CPUs)
    pub max_workers: Option<usize>,

    /// Timeout for a single transcription call (seconds)
    pub transcribe_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./input"),
            output_dir: PathBuf::from("./output"),
            audio_format: AudioFormat::Wav,
            model: "tiny".to_string(),
            language: Language::Code("en".to_string()),
            beam_size: 5,
            patience: 1.0,
            max_workers: None,
            transcribe_timeout_secs: 3600, // 60 minutes for large files
        }
    }
}

impl Config {
    /// Resolve configuration from a key/value file, then environment overrides.
    ///
    /// Never fails: a missing or unreadable file falls back to the defaults.
    pub fn resolve(path: &Path) -> Self {
        let mut config = Self::load_file(path);
        config.apply_env();
        config
    }

    /// Read the key/value file alone, defaults when it cannot be read
    pub fn load_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                info!("📄 Loaded configuration from: {}", path.display());
                Self::from_key_values(&content)
            }
            Err(e) => {
                warn!("Config not found at {} ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse the `KEY=VALUE` format on top of the defaults
    pub fn from_key_values(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            config.set(key.trim(), value.trim());
        }

        config
    }

    /// Apply `SUBTITLER_<KEY>` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                if self.set(key, value.trim()) {
                    info!("🔧 Environment override: {}", name);
                }
            }
        }
    }

    /// Set one recognized key. Returns false for unknown keys.
    fn set(&mut self, key: &str, value: &str) -> bool {
        match key {
            "INPUT_DIR" => self.input_dir = PathBuf::from(value),
            "OUTPUT_DIR" => self.output_dir = PathBuf::from(value),
            "AUDIO_FORMAT" => self.audio_format = AudioFormat::parse_lenient(value),
            "MODEL" => {
                if value.is_empty() {
                    warn!("Empty MODEL, keeping {}", self.model);
                } else {
                    self.model = value.to_string();
                }
            }
            "LANGUAGE" => self.language = Language::parse(value),
            "BEAM_SIZE" => match value.parse::<u32>() {
                Ok(beam) if beam > 0 => self.beam_size = beam,
                _ => warn!("Invalid BEAM_SIZE '{}', keeping {}", value, self.beam_size),
            },
            "PATIENCE" => match value.parse::<f64>() {
                Ok(patience) if patience.is_finite() && patience > 0.0 => self.patience = patience,
                _ => warn!("Invalid PATIENCE '{}', keeping {}", value, self.patience),
            },
            "WORKERS" => match value.parse::<usize>() {
                Ok(workers) if workers > 0 => self.max_workers = Some(workers),
                _ => warn!("Invalid WORKERS '{}', using available parallelism", value),
            },
            "TRANSCRIBE_TIMEOUT" => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => self.transcribe_timeout_secs = secs,
                _ => warn!(
                    "Invalid TRANSCRIBE_TIMEOUT '{}', keeping {}s",
                    value, self.transcribe_timeout_secs
                ),
            },
            _ => return false,
        }
        true
    }

    /// Parallelism available to the pool before clamping to the task count
    pub fn available_parallelism(&self) -> usize {
        self.max_workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Batch Subtitler Configuration:\n\
            - Input Directory: {}\n\
            - Output Directory: {}\n\
            - Audio Format: {}\n\
            - Model: {}\n\
            - Language: {}\n\
            - Beam Size: {}\n\
            - Patience: {}\n\
            - Parallelism: {}",
            self.input_dir.display(),
            self.output_dir.display(),
            self.audio_format,
            self.model,
            self.language,
            self.beam_size,
            self.patience,
            self.available_parallelism(),
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn with_input_dir(mut self, dir: PathBuf) -> Self {
        self.config.input_dir = dir;
        self
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output_dir = dir;
        self
    }

    pub fn with_audio_format(mut self, format: AudioFormat) -> Self {
        self.config.audio_format = format;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.config.language = language;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = Some(workers.max(1));
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
