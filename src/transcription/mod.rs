pub mod whisper;
pub mod srt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Language;
use crate::error::PipelineResult;

pub use whisper::{WhisperBackend, WhisperFactory, WhisperTranscriber};
pub use srt::{SRTEntry, SRTGenerator};

/// Timed span of transcribed text, offsets in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Decoder parameters handed opaquely to the transcription backend
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub language: Language,
    pub beam_size: u32,
    pub patience: f64,
}

/// A loaded transcription engine. Owned by exactly one worker.
#[async_trait]
pub trait Transcribe: Send {
    async fn transcribe(
        &mut self,
        audio_path: &Path,
        options: &DecodeOptions,
    ) -> PipelineResult<Vec<TranscriptSegment>>;
}

/// Creates transcription engines; called at most once per worker between failures
#[async_trait]
pub trait TranscriberFactory: Send + Sync {
    type Transcriber: Transcribe + 'static;

    async fn load(&self) -> PipelineResult<Self::Transcriber>;
}
