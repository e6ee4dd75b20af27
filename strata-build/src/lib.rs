//! # Strata Build
//!
//! Build orchestration for the strata point-cloud index: source readers,
//! pooled streaming tables, the builder state machine, subset partitioning,
//! merge, and inference.
//!
//! The typical flow:
//!
//! ```ignore
//! let inference = infer(&provider, &inputs)?;
//! let mut config = BuildConfig::default();
//! config.bounds = Some(inference.bounds);
//! config.schema = Some(inference.schema);
//! config.inputs = inference.files;
//!
//! let builder = Builder::create(config, store)?;
//! builder.go(&provider, 0)?;
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod infer;
pub mod manifest;
pub mod merge;
pub mod metadata;
pub mod source;
pub mod subset;
pub mod table;

// Re-export main types
pub use builder::Builder;
pub use config::BuildConfig;
pub use error::{BuildError, Result};
pub use infer::{infer, Inference};
pub use manifest::{FileInfo, FileStats, FileStatus, Manifest, PointStats};
pub use merge::{merge, MergeSummary};
pub use metadata::{Metadata, HIERARCHY_PATH, MANIFEST_PATH, METADATA_PATH};
pub use source::{
    encode_packed, FileSourceProvider, MemorySourceProvider, PackedSource, PointSource,
    SliceSource, SourceProvider,
};
pub use subset::Subset;
pub use table::PooledPointTable;
