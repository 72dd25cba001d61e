//! Error types for reactive-core.

use thiserror::Error;

/// Result type for reactive-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reactive-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Dependency extraction failed (syntactically invalid cell source).
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Registering a cell would introduce a cycle in the dependency graph.
    #[error("cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// Referenced cell is not present in the graph or registry.
    #[error("cell not found: {0}")]
    CellNotFound(String),

    /// User code raised, or a cell-level runtime failure (e.g. a missing SQL
    /// template identifier, a database error) occurred during execution.
    #[error("execution error: {0}")]
    Execution(String),

    /// Failed to encode or decode a message.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IPC framing or transport error (length prefix, truncated body, closed pipe).
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
