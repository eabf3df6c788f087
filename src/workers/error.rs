use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Everything that can fail a job. The `Display` text is what lands in the job's `error` column.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot resolve source object from '{0}'")]
    InvalidSource(String),

    #[error("Download of '{key}' failed: {message}")]
    Download { key: String, message: String },

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Source has no decodable video stream")]
    NoVideoStream,

    #[error("Encoder not found: {0}")]
    EncoderMissing(String),

    #[error("Encoding {rung} failed: {message}")]
    Encoder { rung: String, message: String },

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error("Failed to write master playlist: {0}")]
    Manifest(#[source] std::io::Error),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Job store error: {0}")]
    Store(String),
}

impl PipelineError {
    pub fn encoder(rung: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encoder {
            rung: rung.into(),
            message: message.into(),
        }
    }

    pub fn download(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Download {
            key: key.into(),
            message: err.to_string(),
        }
    }
}
