//! Error types for configuration handling.

use std::path::PathBuf;

/// Errors raised while loading or validating a [`FitConfig`](crate::FitConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<Box<figment::Error>> for ConfigError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}
