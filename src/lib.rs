/// Batch Subtitler
///
/// Converts every video in a directory into an SRT subtitle file: ffmpeg pulls the
/// audio track, a Whisper backend transcribes it, and a bounded pool of workers
/// runs the files in parallel with per-file failure isolation.

pub mod audio;
pub mod config;
pub mod error;
pub mod processing;
pub mod remote;
pub mod summary;
pub mod transcription;
pub mod video;

// Re-export main types for easy access
pub use crate::audio::{AudioExtract, AudioExtractor};
pub use crate::config::{AudioFormat, Config, ConfigBuilder, Language};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::processing::{BatchProcessor, PipelineStage, TaskResult, VideoTask, WorkerSlot};
pub use crate::remote::VideoDownloader;
pub use crate::summary::{RunReport, RunSummary};
pub use crate::transcription::{
    DecodeOptions, SRTGenerator, TranscriberFactory, Transcribe, TranscriptSegment, WhisperFactory,
    WhisperTranscriber,
};
pub use crate::video::discover_videos;
