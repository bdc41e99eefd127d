use std::path::PathBuf;
use thiserror::Error;

use crate::provider::ProviderError;

/// Main error type for the ragraph crate
#[derive(Error, Debug)]
pub enum RagraphError {
    /// Graph construction was given an empty chunk sequence
    #[error("cannot build a knowledge graph from an empty corpus")]
    EmptyCorpus,

    /// Provider boundary errors (embedding or completion)
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// An in-flight query was cancelled
    #[error("query was cancelled")]
    Cancelled,

    /// Configuration related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for ragraph operations
pub type Result<T> = std::result::Result<T, RagraphError>;
