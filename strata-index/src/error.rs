//! Error types for the index layer

use thiserror::Error;

/// Index errors
#[derive(Error, Debug)]
pub enum IndexError {
    /// Error from strata-core
    #[error("Core error: {0}")]
    Core(#[from] strata_core::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// On-disk data failed an integrity check
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Malformed chunk or hierarchy bytes
    #[error("Format error: {0}")]
    Format(String),

    /// Compression or decompression failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Chunk eviction write failed
    #[error("Eviction write failed: {0}")]
    Eviction(String),

    /// Merge precondition violated
    #[error("Merge precondition: {0}")]
    Merge(String),
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Format(e.to_string())
    }
}

/// Result type for index operations
pub type Result<T> = std::result::Result<T, IndexError>;
