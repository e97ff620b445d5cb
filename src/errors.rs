// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StratrunError {
    /// Malformed or missing run configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset missing, corrupt or unparseable after a repair attempt.
    #[error("Data error: {0}")]
    Data(String),

    /// Engine launch failure, non-zero exit or unavailable binary.
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Execution error: {what} timed out after {after_secs}s")]
    Timeout { what: String, after_secs: u64 },

    /// Neither an export archive nor the captured output produced a result.
    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StratrunError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StratrunError>;
