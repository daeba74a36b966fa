/// Task-level failures. Every variant is contained at the pipeline boundary and
/// ends up as the error message of a failed `TaskResult`.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio extraction failed: {0}")]
    Extraction(String),

    #[error("Transcriber initialization failed: {0}")]
    ModelLoad(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("cancelled")]
    Cancelled,

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Build a `Panicked` error from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        PipelineError::Panicked(message)
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
