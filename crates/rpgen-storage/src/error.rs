//! Storage error types for rpgen-storage.

use thiserror::Error;

/// Errors produced by checkpoint storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run not found: {0}")]
    RunNotFound(i64),

    #[error("node not found: run={run}, node={node}")]
    NodeNotFound { run: i64, node: String },

    /// Stored structure no longer matches its recorded digest.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// Failed to rebuild a graph from stored data.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}
