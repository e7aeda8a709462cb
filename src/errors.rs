// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssayerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The queue service could not be reached (enqueue, claim, signal...).
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The watched directory could not be listed.
    #[error("Scan of {directory} failed: {reason}")]
    ScanFailed { directory: String, reason: String },

    #[error("Evaluator not found: {0}")]
    EvaluatorNotFound(String),

    #[error("Evaluator failed: {0}")]
    EvaluatorFailed(String),

    #[error("Worker unreachable: {0}")]
    WorkerUnreachable(String),

    /// The watch chain could not enqueue its successor and has stopped.
    #[error("Watch chain broken for stream {stream}: {reason}")]
    ChainBroken { stream: String, reason: String },

    #[error("A watch chain for stream {0} is already queued or running")]
    ChainAlreadyActive(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AssayerError {
    fn from(err: serde_json::Error) -> Self {
        AssayerError::InvalidPayload(err.to_string())
    }
}

impl From<rusqlite::Error> for AssayerError {
    fn from(err: rusqlite::Error) -> Self {
        AssayerError::BrokerUnavailable(err.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AssayerError>;
