use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy shared by every stage.
///
/// Fatal variants abort a run; the rest are caught at the item boundary,
/// logged, and the enclosing loop moves on.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External API error ({endpoint}): {message}")]
    ExternalApi { endpoint: String, message: String },

    #[error("Download failed for {video_id}: {message}")]
    Download { video_id: String, message: String },

    #[error("Decode error in {path:?}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Failed to load model {path:?}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image error on {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Configuration(_) | PipelineError::ModelLoad { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        PipelineError::Image {
            path: path.into(),
            source,
        }
    }

    pub fn external(endpoint: &str, message: impl std::fmt::Display) -> Self {
        PipelineError::ExternalApi {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
