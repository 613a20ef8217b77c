//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// The record was rejected before it was written (wrong thread, step not increasing)
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// A stored record could not be decoded into the checkpoint shape.
    ///
    /// Fatal for the affected thread only.
    #[error("Corrupt checkpoint for thread '{thread_id}': {reason}")]
    Corruption { thread_id: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
