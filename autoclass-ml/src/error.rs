//! Error types for the autoclass-ml crate.

use autoclass_core::ConfigError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for dataset, training and inference operations.
#[derive(Debug, Error)]
pub enum AutoClassError {
    /// The dataset layout or content is unusable. Not retried.
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// Fetching or unpacking a remote dataset archive failed. Not retried.
    #[error("Download error: {0}")]
    Download(String),

    /// A single trial failed; the scheduler records it and moves on.
    #[error("Trial {trial_id} failed: {message}")]
    TrialExecution { trial_id: Uuid, message: String },

    /// The search ended without any trial producing a checkpoint.
    #[error("No trial produced a checkpoint ({attempted} attempted, {failed} failed)")]
    NoTrialCompleted { attempted: usize, failed: usize },

    #[error("Model not fitted: no checkpoint has been promoted")]
    ModelNotFitted,

    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl AutoClassError {
    pub fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn trial(trial_id: Uuid, msg: impl Into<String>) -> Self {
        Self::TrialExecution {
            trial_id,
            message: msg.into(),
        }
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AutoClassError>;
