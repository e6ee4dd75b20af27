//! Build configuration.

use crate::error::Result;
use crate::manifest::FileInfo;
use crate::subset::Subset;
use strata_core::{Bounds, Delta, Schema};
use strata_index::{Format, HierarchyCodec, StructureParams, TailField};

/// Everything a [`crate::Builder`] needs to start (or continue) a build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Source files to index. Entries may carry pre-scanned bounds and
    /// counts from inference, which lets the sequencer omit files early.
    pub inputs: Vec<FileInfo>,
    /// Native bounds. Required for a fresh build; run inference first when
    /// unknown.
    pub bounds: Option<Bounds>,
    /// Native schema; defaults to bare XYZ.
    pub schema: Option<Schema>,
    pub structure: StructureParams,
    pub compress: bool,
    pub tail_fields: Vec<TailField>,
    pub hierarchy_codec: HierarchyCodec,
    /// Scale/offset for integer XYZ storage; `None` stores absolute doubles.
    pub delta: Option<Delta>,
    /// `(id, of)` for a subset build.
    pub subset: Option<(u64, u64)>,
    /// Discard any existing build at the output instead of continuing it.
    pub force: bool,
    pub work_threads: usize,
    pub clip_threads: usize,
    /// Source files inserted between checkpoints.
    pub checkpoint_interval: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            inputs: Vec::new(),
            bounds: None,
            schema: None,
            structure: StructureParams::default(),
            compress: true,
            tail_fields: vec![TailField::NumPoints, TailField::ChunkType],
            hierarchy_codec: HierarchyCodec::default(),
            delta: None,
            subset: None,
            force: false,
            work_threads: (threads - threads / 3).max(1),
            clip_threads: (threads / 3).max(1),
            checkpoint_interval: 8,
        }
    }
}

impl BuildConfig {
    pub fn subset(&self) -> Result<Option<Subset>> {
        self.subset.map(|(id, of)| Subset::new(id, of)).transpose()
    }

    pub fn format(&self) -> Result<Format> {
        Ok(Format::new(
            self.compress,
            self.tail_fields.clone(),
            self.hierarchy_codec,
        )?)
    }

    pub fn file_infos(&self) -> Vec<FileInfo> {
        self.inputs.clone()
    }

    /// Add a plain input path.
    pub fn push_input(&mut self, path: impl Into<String>) {
        self.inputs.push(FileInfo::new(path));
    }
}
