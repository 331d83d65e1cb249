// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::Stage;

#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("unexpected artifact type for artifact '{artifact}': expected exactly one backend, found [{}]", found.join(", "))]
    UnexpectedArtifactType {
        artifact: String,
        found: Vec<&'static str>,
    },

    #[error("deployment {0} depends on itself")]
    SelfDependency(String),

    #[error("circular dependency detected involving {0}")]
    CircularDependency(String),

    #[error("{backend} {stage} failed: {message}")]
    BackendExecution {
        backend: String,
        stage: Stage,
        message: String,
    },

    #[error(
        "builder doesn't support building for platforms {requested} (supported: {supported}). Cannot build artifact '{artifact}'"
    )]
    PlatformIncompatible {
        artifact: String,
        requested: String,
        supported: String,
    },

    #[error("transform stage '{stage}' failed: {message}")]
    Transform { stage: &'static str, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RolloutError {
    /// Shorthand for wrapping a failed external tool.
    pub fn backend(backend: impl Into<String>, stage: Stage, message: impl Into<String>) -> Self {
        RolloutError::BackendExecution {
            backend: backend.into(),
            stage,
            message: message.into(),
        }
    }

    /// Cancellation is always safe to retry by rerunning the command.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RolloutError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, RolloutError>;
