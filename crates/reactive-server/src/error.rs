//! Error types for the coordinator and gateway.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("core error: {0}")]
    Core(#[from] reactive_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("kernel process is not running")]
    KernelUnavailable,

    #[error("storage error: {0}")]
    Storage(String),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;
