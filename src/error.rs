use std::path::PathBuf;

use thiserror::Error;

use crate::source::PhotoReference;

/// Failure of a single photo's pipeline run. Never fatal to the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch {reference}: {message}")]
    Fetch {
        reference: PhotoReference,
        message: String,
    },
    #[error("failed to resolve sender attribution: {0}")]
    Attribution(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("failed to publish to {channel}: {message}")]
    Publish { channel: String, message: String },
}

impl PipelineError {
    /// Short, stable name of the failure kind for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Fetch { .. } => "fetch",
            PipelineError::Attribution(_) => "attribution",
            PipelineError::Decode(_) => "decode",
            PipelineError::Classification(_) => "classification",
            PipelineError::Publish { .. } => "publish",
        }
    }
}

/// Startup failure. The process exits before any polling begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable '{0}' required")]
    MissingEnv(&'static str),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("failed to load classifier model: {0}")]
    Model(String),
}
