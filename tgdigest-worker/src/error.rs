//! Error types for the worker.

use crate::config::ConfigError;
use tgdigest_core::{DigestError, LlmError};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Pipeline setup failed: {0}")]
    Pipeline(#[from] DigestError),
    #[error("Model client setup failed: {0}")]
    Model(#[from] LlmError),
    #[error("Failed to encode result: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to initialize telemetry: {0}")]
    Telemetry(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
