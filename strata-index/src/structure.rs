//! Tree shape parameters and chunk-id arithmetic.
//!
//! The tree is octree-like with branching `factor` (8, or 4 in the hybrid
//! mode that collapses z into tube ticks). Node indices are assigned
//! breadth-first: `level_index(d) = (factor^d - 1) / (factor - 1)` is the
//! first index at depth d, and a node's children start at
//! `parent * factor + 1`.
//!
//! Depths are tiered:
//!
//! ```text
//! [0, null_depth_end)            discarded
//! [null_depth_end, base_depth_end)    base chunk, always resident
//! [base_depth_end, cold_depth_end)    cold tier, one chunk per span of
//!                                     points_per_chunk indices
//! ```
//!
//! `cold_depth_end == 0` means unbounded (lossless).

use crate::error::{IndexError, Result};
use crate::id::Id;
use serde::{Deserialize, Serialize};
use strata_core::sha256_hex;

/// Upper bound on directly-indexed (contiguous-tier) chunk slots.
const MAX_FAST_CHUNKS: u64 = 1 << 22;

/// Raw, user-facing tree parameters. Zero means "derive a default" for the
/// optional depths. The resolved `Structure` serializes back to fully
/// resolved params so continuations reconstruct the identical tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructureParams {
    pub null_depth: u64,
    pub base_depth: u64,
    pub cold_depth: u64,
    pub points_per_chunk: u64,
    pub factor: u64,
    pub num_points_hint: u64,
    pub mapped_depth: u64,
    pub sparse_depth: u64,
    pub bump_depth: u64,
    pub prefix_ids: bool,
}

impl Default for StructureParams {
    fn default() -> Self {
        Self {
            null_depth: 6,
            base_depth: 10,
            cold_depth: 0,
            points_per_chunk: 262_144,
            factor: 4,
            num_points_hint: 0,
            mapped_depth: 0,
            sparse_depth: 0,
            bump_depth: 0,
            prefix_ids: false,
        }
    }
}

/// Resolved, immutable tree shape.
#[derive(Debug, Clone)]
pub struct Structure {
    factor: u64,
    null_depth_end: u64,
    base_depth_end: u64,
    cold_depth_end: u64,
    points_per_chunk: u64,
    nominal_chunk_depth: u64,
    mapped_depth_begin: u64,
    sparse_depth_begin: u64,
    bump_depth: u64,
    prefix_ids: bool,
    num_points_hint: u64,

    base_index_begin: Id,
    cold_index_begin: Id,
    cold_index_end: Option<Id>,
    mapped_index_begin: Id,
    num_fast_chunks: usize,
}

impl Structure {
    pub fn new(params: StructureParams) -> Result<Self> {
        let factor = params.factor;
        if factor != 4 && factor != 8 {
            return Err(IndexError::Config(format!(
                "branching factor must be 4 or 8, got {factor}"
            )));
        }

        let ppc = params.points_per_chunk;
        if ppc == 0 {
            return Err(IndexError::Config("points per chunk must be nonzero".into()));
        }
        let nominal_chunk_depth = log_n(ppc, factor);
        if factor.pow(nominal_chunk_depth as u32) != ppc {
            return Err(IndexError::Config(format!(
                "points per chunk must be a power of {factor}, got {ppc}"
            )));
        }

        let null_depth_end = params.null_depth;
        let base_depth_end = params
            .base_depth
            .max(null_depth_end)
            .max(nominal_chunk_depth);
        if base_depth_end < 4 {
            return Err(IndexError::Config(format!(
                "base depth {base_depth_end} too small, need at least 4"
            )));
        }

        let cold_depth_end = if params.cold_depth > 0 {
            params.cold_depth.max(base_depth_end)
        } else {
            0
        };

        // Derive the mapped (contiguous/sparse) boundary from the expected
        // point count when unspecified.
        let active_min_depth = if params.bump_depth > 0 {
            params.bump_depth
        } else {
            base_depth_end
        };
        let hint = params.num_points_hint.max(10_000_000);
        let mut mapped_depth_begin = if params.mapped_depth > 0 {
            params.mapped_depth
        } else {
            ((hint as f64).log2() / (factor as f64).log2()).ceil() as u64 + 1
        };
        mapped_depth_begin = mapped_depth_begin.max(active_min_depth);
        let sparse_depth_begin = params.sparse_depth.max(mapped_depth_begin);

        let base_index_begin = level_index(factor, null_depth_end);
        let cold_index_begin = level_index(factor, base_depth_end);
        let cold_index_end = (cold_depth_end > 0).then(|| level_index(factor, cold_depth_end));
        let mapped_index_begin = level_index(factor, mapped_depth_begin);

        let fast_span = &mapped_index_begin - &cold_index_begin;
        let num_fast_chunks = (&fast_span / ppc).to_u64().filter(|n| *n <= MAX_FAST_CHUNKS);
        let num_fast_chunks = match num_fast_chunks {
            Some(n) => n as usize,
            None => {
                return Err(IndexError::Config(format!(
                    "mapped depth {mapped_depth_begin} puts too many chunks in the contiguous tier"
                )))
            }
        };

        Ok(Self {
            factor,
            null_depth_end,
            base_depth_end,
            cold_depth_end,
            points_per_chunk: ppc,
            nominal_chunk_depth,
            mapped_depth_begin,
            sparse_depth_begin,
            bump_depth: params.bump_depth,
            prefix_ids: params.prefix_ids,
            num_points_hint: params.num_points_hint,
            base_index_begin,
            cold_index_begin,
            cold_index_end,
            mapped_index_begin,
            num_fast_chunks,
        })
    }

    /// Fully-resolved parameters, suitable for persistence.
    pub fn params(&self) -> StructureParams {
        StructureParams {
            null_depth: self.null_depth_end,
            base_depth: self.base_depth_end,
            cold_depth: self.cold_depth_end,
            points_per_chunk: self.points_per_chunk,
            factor: self.factor,
            num_points_hint: self.num_points_hint,
            mapped_depth: self.mapped_depth_begin,
            sparse_depth: self.sparse_depth_begin,
            bump_depth: self.bump_depth,
            prefix_ids: self.prefix_ids,
        }
    }

    pub fn factor(&self) -> u64 {
        self.factor
    }

    /// The hybrid tree branches in x and y only, recording z as a tube tick.
    pub fn is_hybrid(&self) -> bool {
        self.factor == 4
    }

    pub fn null_depth_end(&self) -> u64 {
        self.null_depth_end
    }

    pub fn base_depth_begin(&self) -> u64 {
        self.null_depth_end
    }

    pub fn base_depth_end(&self) -> u64 {
        self.base_depth_end
    }

    pub fn cold_depth_begin(&self) -> u64 {
        self.base_depth_end
    }

    /// Zero when the build is lossless (unbounded depth).
    pub fn cold_depth_end(&self) -> u64 {
        self.cold_depth_end
    }

    pub fn is_lossless(&self) -> bool {
        self.cold_depth_end == 0
    }

    pub fn sparse_depth_begin(&self) -> u64 {
        self.sparse_depth_begin
    }

    pub fn mapped_depth_begin(&self) -> u64 {
        self.mapped_depth_begin
    }

    pub fn bump_depth(&self) -> u64 {
        self.bump_depth
    }

    pub fn prefix_ids(&self) -> bool {
        self.prefix_ids
    }

    pub fn base_points_per_chunk(&self) -> u64 {
        self.points_per_chunk
    }

    pub fn nominal_chunk_depth(&self) -> u64 {
        self.nominal_chunk_depth
    }

    pub fn base_index_begin(&self) -> &Id {
        &self.base_index_begin
    }

    pub fn cold_index_begin(&self) -> &Id {
        &self.cold_index_begin
    }

    pub fn cold_index_end(&self) -> Option<&Id> {
        self.cold_index_end.as_ref()
    }

    pub fn mapped_index_begin(&self) -> &Id {
        &self.mapped_index_begin
    }

    /// Number of chunk slots in the directly-indexed contiguous tier.
    pub fn num_fast_chunks(&self) -> usize {
        self.num_fast_chunks
    }

    /// First index at the given depth.
    pub fn level_index(&self, depth: u64) -> Id {
        level_index(self.factor, depth)
    }

    /// Number of nodes at the given depth.
    pub fn points_at_depth(&self, depth: u64) -> Id {
        Id::pow(self.factor, depth as u32)
    }

    /// Largest depth whose level index does not exceed `id`.
    pub fn depth_of(&self, id: &Id) -> u64 {
        let mut depth = 0;
        while &self.level_index(depth + 1) <= id {
            depth += 1;
        }
        depth
    }

    /// Storage path for a cold chunk, SHA-prefixed when configured.
    pub fn maybe_prefix(&self, id: &Id) -> String {
        let name = id.to_string();
        if self.prefix_ids {
            format!("{}/{}", &sha256_hex(name.as_bytes())[..8], name)
        } else {
            name
        }
    }
}

/// First index at `depth` for the given branching factor:
/// `(factor^depth - 1) / (factor - 1)`.
pub fn level_index(factor: u64, depth: u64) -> Id {
    let total = Id::pow(factor, depth as u32);
    &(&total - &Id::from(1u64)) / (factor - 1)
}

/// Index of a node's `octant`-th child.
pub fn child_index(factor: u64, parent: &Id, octant: u64) -> Id {
    debug_assert!(octant < factor);
    &(parent * factor) + (1 + octant)
}

fn log_n(value: u64, n: u64) -> u64 {
    let mut depth = 0;
    let mut acc = 1u64;
    while acc < value {
        acc = acc.saturating_mul(n);
        depth += 1;
    }
    depth
}

/// Placement of a cold-tier index: which chunk owns it, and where.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    chunk_id: Id,
    depth: u64,
    chunk_offset: u64,
    max_points: u64,
    fast_index: Option<usize>,
}

impl ChunkInfo {
    /// Resolve the chunk that owns `index`. The chunk id is `index`
    /// floor-aligned to a `points_per_chunk` boundary relative to the start
    /// of the cold tier.
    pub fn new(structure: &Structure, index: &Id) -> Result<ChunkInfo> {
        let cold_begin = structure.cold_index_begin();
        if index < cold_begin {
            return Err(IndexError::Config(format!(
                "index {index} is below the cold tier"
            )));
        }

        let ppc = structure.base_points_per_chunk();
        let rel = index - cold_begin;
        let chunk_num = &rel / ppc;
        let chunk_id = &(&chunk_num * ppc) + cold_begin;
        let chunk_offset = (index - &chunk_id)
            .to_u64()
            .expect("chunk offset bounded by points per chunk");

        let fast_index = if &chunk_id < structure.mapped_index_begin() {
            Some(
                chunk_num
                    .to_u64()
                    .expect("contiguous-tier chunk number fits u64") as usize,
            )
        } else {
            None
        };

        Ok(ChunkInfo {
            depth: structure.depth_of(&chunk_id),
            chunk_id,
            chunk_offset,
            max_points: ppc,
            fast_index,
        })
    }

    pub fn chunk_id(&self) -> &Id {
        &self.chunk_id
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn chunk_offset(&self) -> u64 {
        self.chunk_offset
    }

    pub fn max_points(&self) -> u64 {
        self.max_points
    }

    /// Direct slot index when the chunk lives in the contiguous tier.
    pub fn fast_index(&self) -> Option<usize> {
        self.fast_index
    }

    pub fn is_sparse(&self) -> bool {
        self.fast_index.is_none()
    }
}
