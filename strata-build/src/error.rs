//! Error types for the build layer

use thiserror::Error;

/// Build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Error from strata-core
    #[error("Core error: {0}")]
    Core(#[from] strata_core::Error),

    /// Error from strata-index
    #[error("Index error: {0}")]
    Index(#[from] strata_index::IndexError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Source file's layout is missing or mistypes a required dimension
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Source file could not be opened or read
    #[error("Source error: {0}")]
    Source(String),

    /// A point routed past the deepest storable depth in a lossless build
    #[error("Depth overflow: {0}")]
    DepthOverflow(String),

    /// Merge precondition violated
    #[error("Merge precondition: {0}")]
    Merge(String),

    /// The build hit an unrecoverable error; the manifest was preserved so
    /// a later invocation can continue from the last checkpoint
    #[error("Build failed: {0}")]
    Failed(String),
}

impl From<serde_json::Error> for BuildError {
    fn from(e: serde_json::Error) -> Self {
        BuildError::Core(strata_core::Error::Json(e))
    }
}

/// Result type for build operations
pub type Result<T> = std::result::Result<T, BuildError>;
