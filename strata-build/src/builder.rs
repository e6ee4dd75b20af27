//! The build orchestrator.
//!
//! A `Builder` streams manifest entries through pooled point tables on a
//! work pool, routing every cell through the climber into the base chunk or
//! the registry, while the registry's clip pool writes evicted chunks behind
//! the inserts.
//!
//! States: a fresh build writes its initial metadata; an existing output
//! becomes a continuation, reloading metadata, manifest, hierarchy and base.
//! `go` alternates running waves with checkpoints (registry flush + manifest
//! persist) and finishes with the terminal save. Unrecoverable errors leave
//! the manifest behind so the next invocation can continue.
//!
//! Insertion descends per point: starting at the base depth, a slot taken by
//! a different point pushes the incoming cell one level down; an identical
//! point stacks. Lossy builds count points that fall off the cold tier as
//! overflows; lossless builds treat hitting the hard depth cap as fatal.

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::manifest::{FileStatus, Manifest, PointStats};
use crate::metadata::Metadata;
use crate::source::SourceProvider;
use crate::table::PooledPointTable;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_core::{ensure_put, Bounds, ObjectStore, Schema, EPSILON_RATIO};
use strata_index::{
    BaseChunk, BaseInsert, CellStack, ChunkInfo, ChunkRef, Climber, Hierarchy, Id, PointPool,
    Registry, Structure,
};

/// Hard routing depth cap; past this, f64 subdivision is meaningless.
const MAX_DEPTH: u64 = 64;

/// Inserts between clipper sweeps.
const SLEEP_COUNT: u64 = 65_536;

/// Per-file cache of acquired chunk refs, aged in two phases: a sweep
/// releases refs not touched since the previous sweep.
struct Clipper<'r> {
    registry: &'r Registry,
    structure: &'r Structure,
    held: FxHashMap<Id, (ChunkRef, bool)>,
    since_sweep: u64,
}

impl<'r> Clipper<'r> {
    fn new(registry: &'r Registry, structure: &'r Structure) -> Self {
        Self {
            registry,
            structure,
            held: FxHashMap::default(),
            since_sweep: 0,
        }
    }

    /// The ref for the chunk owning the climber's index, acquiring on miss.
    fn chunk(&mut self, climber: &Climber<'_>) -> Result<&ChunkRef> {
        let info = ChunkInfo::new(self.structure, climber.index())?;
        match self.held.entry(info.chunk_id().clone()) {
            std::collections::hash_map::Entry::Occupied(e) => {
                let held = e.into_mut();
                held.1 = true;
                Ok(&held.0)
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                let r = self.registry.acquire(climber)?;
                Ok(&v.insert((r, true)).0)
            }
        }
    }

    fn note_insert(&mut self) {
        self.since_sweep += 1;
        if self.since_sweep >= SLEEP_COUNT {
            self.since_sweep = 0;
            self.sweep();
        }
    }

    /// Release refs untouched since the last sweep; age the rest.
    fn sweep(&mut self) {
        let stale: Vec<Id> = self
            .held
            .iter()
            .filter(|(_, (_, fresh))| !fresh)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some((r, _)) = self.held.remove(&id) {
                self.registry.release(r);
            }
        }
        for (_, fresh) in self.held.values_mut() {
            *fresh = false;
        }
    }
}

impl Drop for Clipper<'_> {
    fn drop(&mut self) {
        for (_, (r, _)) in self.held.drain() {
            self.registry.release(r);
        }
    }
}

/// The build driver. Create one per output; it is `Sync` and drives its own
/// thread pools.
pub struct Builder {
    metadata: Metadata,
    structure: Arc<Structure>,
    native_schema: Schema,
    storage_schema: Schema,
    subset_bounds: Option<Bounds>,
    manifest: Mutex<Manifest>,
    errors: Mutex<Vec<String>>,
    fatal: Mutex<Option<String>>,
    registry: Registry,
    base: Mutex<BaseChunk>,
    hierarchy: Arc<Hierarchy>,
    pool: Arc<PointPool>,
    store: Arc<dyn ObjectStore>,
    work_pool: rayon::ThreadPool,
    checkpoint_interval: usize,
    cancel: AtomicBool,
    is_continuation: bool,
}

impl Builder {
    /// Create a fresh builder, or continue the build already present at the
    /// store (unless `force` discards it).
    pub fn create(config: BuildConfig, store: Arc<dyn ObjectStore>) -> Result<Builder> {
        let subset = config.subset()?;
        let subset_id = subset.map(|s| s.id);

        let existing = !config.force && Metadata::exists(store.as_ref(), subset_id)?;
        let (metadata, manifest, hierarchy, is_continuation) = if existing {
            let metadata = Metadata::load(store.as_ref(), subset_id)?;
            let manifest_bytes = strata_core::ensure_get(store.as_ref(), &metadata.manifest_path())?;
            let mut manifest = Manifest::from_json(&manifest_bytes)?;
            manifest.append_files(config.file_infos());
            let hierarchy = match store.get(&metadata.hierarchy_path()) {
                Ok(bytes) => Hierarchy::from_bytes(&bytes)?,
                Err(e) if e.is_not_found() => Hierarchy::new(),
                Err(e) => return Err(e.into()),
            };
            tracing::info!(files = manifest.len(), "continuing existing build");
            (metadata, manifest, hierarchy, true)
        } else {
            let bounds = config.bounds.ok_or_else(|| {
                BuildError::Config("bounds are required for a fresh build".into())
            })?;
            let schema = config.schema.clone().unwrap_or_else(Schema::xyz);
            let metadata = Metadata::new(
                bounds,
                &schema,
                config.structure.clone(),
                config.format()?,
                config.delta,
                subset,
            )?;
            let manifest = Manifest::new(config.file_infos());
            (metadata, manifest, Hierarchy::new(), false)
        };

        let structure = Arc::new(metadata.build_structure()?);
        let storage_schema = metadata.schema.clone();
        let native_schema = metadata.native_schema();
        let pool = Arc::new(PointPool::new(storage_schema.point_size()));
        let hierarchy = Arc::new(hierarchy);

        let registry = Registry::new(
            structure.clone(),
            metadata.bounds_cube,
            metadata.format.clone(),
            storage_schema.clone(),
            pool.clone(),
            store.clone(),
            hierarchy.clone(),
            config.clip_threads,
        )?;

        let spans = crate::subset::base_spans(&structure, metadata.subset.as_ref())?;
        let mut base = BaseChunk::new(&structure, &spans)?;
        if is_continuation {
            match store.get(&metadata.base_path(&structure)) {
                Ok(bytes) => {
                    let mut climber = Climber::new(&structure, metadata.bounds_cube);
                    base.populate_from(
                        bytes,
                        &metadata.format,
                        &storage_schema,
                        &structure,
                        &mut climber,
                        &pool,
                    )?;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let work_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.work_threads.max(1))
            .thread_name(|i| format!("strata-work-{i}"))
            .build()
            .map_err(|e| BuildError::Config(format!("work pool: {e}")))?;

        let subset_bounds = metadata
            .subset
            .as_ref()
            .map(|s| s.bounds(&metadata.bounds_cube).grow(EPSILON_RATIO));

        let builder = Builder {
            subset_bounds,
            native_schema,
            storage_schema,
            manifest: Mutex::new(manifest),
            errors: Mutex::new(metadata.errors.clone()),
            fatal: Mutex::new(None),
            registry,
            base: Mutex::new(base),
            hierarchy,
            pool,
            store,
            work_pool,
            checkpoint_interval: config.checkpoint_interval.max(1),
            cancel: AtomicBool::new(false),
            is_continuation,
            structure,
            metadata,
        };

        if !builder.is_continuation {
            builder.save_metadata()?;
            builder.save_manifest()?;
        }
        Ok(builder)
    }

    pub fn is_continuation(&self) -> bool {
        self.is_continuation
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn manifest(&self) -> Manifest {
        self.manifest.lock().clone()
    }

    pub fn point_stats(&self) -> PointStats {
        self.manifest.lock().point_stats()
    }

    /// Request a soft stop: in-progress files finish, nothing new starts.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Process up to `max_files` outstanding manifest entries (0 = all),
    /// checkpointing between waves, then perform the terminal save.
    ///
    /// Per-file errors are contained in the manifest, but a run in which
    /// files failed and nothing was ever inserted surfaces as a failure
    /// after the save.
    pub fn go(&self, provider: &dyn SourceProvider, max_files: usize) -> Result<()> {
        let mut processed = 0usize;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("cancellation requested; stopping between files");
                break;
            }
            let budget = if max_files == 0 {
                self.checkpoint_interval
            } else {
                self.checkpoint_interval.min(max_files - processed)
            };
            if budget == 0 {
                break;
            }

            let wave = self.next_wave(budget);
            if wave.is_empty() {
                break;
            }

            self.work_pool.scope(|s| {
                for &origin in &wave {
                    s.spawn(move |_| self.insert_file(origin, provider));
                }
            });
            processed += wave.len();

            if let Err(e) = self.checkpoint() {
                return self.fail(e);
            }
            if let Some(msg) = self.fatal.lock().clone() {
                return self.fail(BuildError::Failed(msg));
            }
        }
        self.save()?;

        let file_stats = self.manifest.lock().file_stats();
        if file_stats.errors > 0 && file_stats.inserts == 0 {
            return Err(BuildError::Failed(format!(
                "all {} processed source files failed; see the manifest for per-file errors",
                file_stats.errors
            )));
        }
        Ok(())
    }

    /// Pick the next files to insert, omitting any whose known bounds cannot
    /// contribute.
    fn next_wave(&self, budget: usize) -> Vec<usize> {
        let mut manifest = self.manifest.lock();
        let candidates: Vec<usize> = manifest.outstanding().collect();
        let mut wave = Vec::new();
        for origin in candidates {
            if wave.len() >= budget {
                break;
            }
            let overlaps = match &manifest.get(origin).bounds {
                Some(native) => {
                    let conforming = match &self.metadata.delta {
                        Some(d) => d.quantize_bounds(native),
                        None => *native,
                    };
                    conforming.overlaps(&self.metadata.bounds_epsilon)
                        && self
                            .subset_bounds
                            .map_or(true, |sb| conforming.overlaps(&sb))
                }
                None => true,
            };
            if overlaps {
                wave.push(origin);
            } else {
                manifest.set_status(origin, FileStatus::Omitted);
            }
        }
        wave
    }

    /// Worker entry: stream one source file, then fold its outcome into the
    /// manifest. Errors are contained here; only registry/format failures
    /// mark the whole build fatal.
    fn insert_file(&self, origin: usize, provider: &dyn SourceProvider) {
        let path = self.manifest.lock().get(origin).path.clone();
        tracing::info!(
            origin,
            path = %path,
            chunks = self.registry.chunk_count(),
            allocated = self.pool.allocated(),
            "adding source"
        );

        let result = self.insert_source(origin, &path, provider);
        let mut manifest = self.manifest.lock();
        match result {
            Ok(stats) => {
                manifest.add_stats(origin, &stats);
                manifest.set_status(origin, FileStatus::Inserted);
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "source failed");
                let file = manifest.get_mut(origin);
                file.status = FileStatus::Error;
                file.error = Some(e.to_string());
                self.errors.lock().push(format!("{path}: {e}"));
                if matches!(e, BuildError::Index(_) | BuildError::DepthOverflow(_)) {
                    let mut fatal = self.fatal.lock();
                    if fatal.is_none() {
                        *fatal = Some(e.to_string());
                    }
                }
            }
        }
    }

    fn insert_source(
        &self,
        origin: usize,
        path: &str,
        provider: &dyn SourceProvider,
    ) -> Result<PointStats> {
        let mut source = provider.open(path)?;
        if *source.schema() != self.native_schema {
            return Err(BuildError::SchemaMismatch(format!(
                "{path} produces {:?}, build expects {:?}",
                source.schema(),
                self.native_schema
            )));
        }

        let mut clipper = Clipper::new(&self.registry, &self.structure);
        let mut climber = Climber::new(&self.structure, self.metadata.bounds_cube);
        let mut stats = PointStats::default();
        let mut failure: Option<BuildError> = None;

        {
            let mut process = |cells: CellStack| -> CellStack {
                if failure.is_some() {
                    // Drain mode: recycle everything after a failure.
                    return cells;
                }
                match self.insert_cells(cells, &mut clipper, &mut climber, &mut stats) {
                    Ok(rejected) => rejected,
                    Err(e) => {
                        failure = Some(e);
                        Vec::new()
                    }
                }
            };
            let mut table = PooledPointTable::new(
                &self.pool,
                self.native_schema.clone(),
                self.storage_schema.clone(),
                self.metadata.delta,
                Some(origin as u64),
                &mut process,
            );
            table.run(source.as_mut())?;
        }
        drop(clipper);

        match failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// Route one slab of cells. Returns the cells that were not inserted so
    /// the table can recycle them.
    fn insert_cells(
        &self,
        cells: CellStack,
        clipper: &mut Clipper<'_>,
        climber: &mut Climber<'_>,
        stats: &mut PointStats,
    ) -> Result<CellStack> {
        let base_begin = self.structure.base_depth_begin();
        let base_end = self.structure.base_depth_end();
        let cold_end = self.structure.cold_depth_end();
        let mut rejected = Vec::new();

        for cell in cells {
            let p = *cell.point();
            if !self.metadata.bounds_epsilon.contains(&p) {
                stats.out_of_bounds += 1;
                rejected.push(cell);
                continue;
            }
            if let Some(sb) = &self.subset_bounds {
                if !sb.contains(&p) {
                    rejected.push(cell);
                    continue;
                }
            }

            climber.reset();
            climber.magnify_to(&p, base_begin);
            let mut carried = cell;
            loop {
                let depth = climber.depth();
                if depth >= MAX_DEPTH || (cold_end > 0 && depth >= cold_end) {
                    if cold_end == 0 {
                        return Err(BuildError::DepthOverflow(format!(
                            "point {p} exceeds depth {MAX_DEPTH} in a lossless build"
                        )));
                    }
                    stats.overflows += 1;
                    rejected.push(carried);
                    break;
                }

                if depth < base_end {
                    let outcome = self.base.lock().try_insert(climber, carried);
                    match outcome {
                        BaseInsert::Done => {
                            stats.inserts += 1;
                            break;
                        }
                        BaseInsert::OutOfSpan(c) => {
                            // Subset edge: quietly dropped.
                            rejected.push(c);
                            break;
                        }
                        BaseInsert::Collision(c) => {
                            carried = c;
                            climber.magnify(&p);
                        }
                    }
                } else {
                    let r = clipper.chunk(climber)?;
                    match self.registry.try_insert(r, climber, carried)? {
                        None => {
                            stats.inserts += 1;
                            clipper.note_insert();
                            break;
                        }
                        Some(c) => {
                            carried = c;
                            climber.magnify(&p);
                        }
                    }
                }
            }
        }
        Ok(rejected)
    }

    /// Flush the registry and persist the manifest and hierarchy.
    fn checkpoint(&self) -> Result<()> {
        self.registry.flush()?;
        self.save_manifest()?;
        self.save_hierarchy()?;
        tracing::debug!(chunks = self.hierarchy.len(), "checkpoint");
        Ok(())
    }

    /// Terminal save: flush everything, write the base chunk, persist all
    /// metadata artifacts.
    pub fn save(&self) -> Result<()> {
        self.registry.flush()?;

        let base_path = self.metadata.base_path(&self.structure);
        let written = self.base.lock().save(
            &self.metadata.format,
            &self.storage_schema,
            self.store.as_ref(),
            &base_path,
        )?;
        self.hierarchy.set(self.structure.base_index_begin(), written);

        self.save_hierarchy()?;
        self.save_manifest()?;
        self.save_metadata()?;
        tracing::info!(
            inserts = self.point_stats().inserts,
            chunks = self.hierarchy.len(),
            "build saved"
        );
        Ok(())
    }

    /// Record a fatal error, persist what we can, and surface the failure.
    fn fail(&self, e: BuildError) -> Result<()> {
        tracing::error!(error = %e, "build failed");
        self.errors.lock().push(e.to_string());
        let _ = self.save_manifest();
        let _ = self.save_hierarchy();
        let _ = self.save_metadata();
        Err(e)
    }

    fn save_manifest(&self) -> Result<()> {
        let bytes = self.manifest.lock().to_json()?;
        ensure_put(self.store.as_ref(), &self.metadata.manifest_path(), &bytes)?;
        Ok(())
    }

    fn save_hierarchy(&self) -> Result<()> {
        let bytes = self
            .hierarchy
            .to_bytes(self.metadata.format.hierarchy_codec())?;
        ensure_put(
            self.store.as_ref(),
            &self.metadata.hierarchy_path(),
            &bytes,
        )?;
        Ok(())
    }

    fn save_metadata(&self) -> Result<()> {
        let mut metadata = self.metadata.clone();
        metadata.errors = self.errors.lock().clone();
        metadata.save(self.store.as_ref())
    }
}
