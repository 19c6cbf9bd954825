//! Error types for the persistence store.

use thiserror::Error;

/// Errors that can occur during persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk I/O failed (already retried once).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required file or directory is missing.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
