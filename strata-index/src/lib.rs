//! # Strata Index
//!
//! The octree-like index itself: id arithmetic, per-point descent, pooled
//! point memory, chunk bodies, the on-disk chunk format, and the concurrent
//! registry that owns every live chunk.
//!
//! The tree maps each point to a chunk id through three tiers: a discarded
//! null tier, a single always-resident base chunk, and the cold tier of
//! fixed-span chunks that migrate between memory and the object store.
//!
//! ## Layering
//!
//! - [`id`], [`structure`]: pure arithmetic, no state
//! - [`climber`]: one point's descent through the tree
//! - [`pool`], [`chunk`]: in-memory point storage
//! - [`format`], [`hierarchy`]: byte-level serialization
//! - [`registry`]: the concurrent owner tying it all together

pub mod chunk;
pub mod climber;
pub mod error;
pub mod format;
pub mod hierarchy;
pub mod id;
pub mod pool;
pub mod registry;
pub mod structure;

// Re-export main types
pub use chunk::{BaseChunk, BaseInsert, Chunk, ChunkType, Tube};
pub use climber::{Climber, MAX_TICK_DEPTH};
pub use error::{IndexError, Result};
pub use format::{Format, HierarchyCodec, TailField, Unpacker, COMPRESSION_LEVEL};
pub use hierarchy::Hierarchy;
pub use id::Id;
pub use pool::{Cell, CellStack, DataNode, PointPool, POOL_BLOCK};
pub use registry::{ChunkRef, Registry};
pub use structure::{child_index, level_index, ChunkInfo, Structure, StructureParams};
