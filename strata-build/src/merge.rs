//! Linking completed subset builds into one whole build.
//!
//! Each subset wrote its cold data chunks at their final paths; only the
//! metadata artifacts and base chunks are per-subset. Merging verifies the
//! subsets describe the same tree, concatenates their base chunks in id
//! order, sums their manifests and hierarchies, and writes the un-postfixed
//! artifacts.

use crate::error::{BuildError, Result};
use crate::manifest::Manifest;
use crate::metadata::Metadata;
use crate::subset::{base_spans, Subset};
use std::sync::Arc;
use strata_core::{ensure_get, ensure_put, ObjectStore};
use strata_index::{BaseChunk, Climber, Hierarchy, PointPool, Structure};

/// What a merge produced.
#[derive(Debug)]
pub struct MergeSummary {
    pub of: u64,
    pub inserts: u64,
    pub chunks: usize,
}

/// Merge the `of` subset builds at the store's root into one build.
pub fn merge(store: Arc<dyn ObjectStore>, of: u64) -> Result<MergeSummary> {
    // Validates `of` itself.
    Subset::new(1, of)?;

    let mut metadata = load_subset_metadata(store.as_ref(), 1, of)?;
    let structure = metadata.build_structure()?;
    if structure.bump_depth() != 0 {
        return Err(BuildError::Merge(
            "bump-depth re-chunking during merge is not supported".into(),
        ));
    }

    let pool = PointPool::new(metadata.schema.point_size());

    let mut base = load_base(store.as_ref(), &metadata, &structure, &pool)?;
    let mut manifest =
        Manifest::from_json(&ensure_get(store.as_ref(), &metadata.manifest_path())?)?;
    let hierarchy =
        Hierarchy::from_bytes(&ensure_get(store.as_ref(), &metadata.hierarchy_path())?)?;

    for id in 2..=of {
        let next = load_subset_metadata(store.as_ref(), id, of)?;
        metadata.compatible_with(&next)?;

        base.merge(load_base(store.as_ref(), &next, &structure, &pool)?)?;
        manifest.merge(&Manifest::from_json(&ensure_get(
            store.as_ref(),
            &next.manifest_path(),
        )?)?)?;
        hierarchy.merge(&Hierarchy::from_bytes(&ensure_get(
            store.as_ref(),
            &next.hierarchy_path(),
        )?)?);
        tracing::info!(subset = id, "subset linked");
    }

    // Write the whole-build artifacts, unpostfixed.
    metadata.subset = None;
    let written = base.save(
        &metadata.format,
        &metadata.schema,
        store.as_ref(),
        &metadata.base_path(&structure),
    )?;
    hierarchy.set(structure.base_index_begin(), written);

    ensure_put(
        store.as_ref(),
        &metadata.hierarchy_path(),
        &hierarchy.to_bytes(metadata.format.hierarchy_codec())?,
    )?;
    ensure_put(
        store.as_ref(),
        &metadata.manifest_path(),
        &manifest.to_json()?,
    )?;
    metadata.save(store.as_ref())?;

    Ok(MergeSummary {
        of,
        inserts: manifest.point_stats().inserts,
        chunks: hierarchy.len(),
    })
}

fn load_subset_metadata(store: &dyn ObjectStore, id: u64, of: u64) -> Result<Metadata> {
    let metadata = Metadata::load(store, Some(id)).map_err(|e| {
        BuildError::Merge(format!("subset {id} of {of} is missing or unreadable: {e}"))
    })?;
    match &metadata.subset {
        Some(s) if s.id == id && s.of == of => Ok(metadata),
        other => Err(BuildError::Merge(format!(
            "subset {id} metadata declares {other:?}, expected ({id} of {of})"
        ))),
    }
}

fn load_base(
    store: &dyn ObjectStore,
    metadata: &Metadata,
    structure: &Structure,
    pool: &PointPool,
) -> Result<BaseChunk> {
    let spans = base_spans(structure, metadata.subset.as_ref())?;
    let mut base = BaseChunk::new(structure, &spans)?;
    let bytes = ensure_get(store, &metadata.base_path(structure))?;
    let mut climber = Climber::new(structure, metadata.bounds_cube);
    base.populate_from(
        bytes,
        &metadata.format,
        &metadata.schema,
        structure,
        &mut climber,
        pool,
    )?;
    Ok(base)
}
