//! The live chunk set.
//!
//! The registry maps cold-tier chunk ids to reference-counted slots. Ids
//! below `mapped_index_begin` resolve through a fixed, directly-indexed slot
//! vector; higher ids go through a concurrent hash map whose entries come and
//! go with their chunks.
//!
//! Lifecycle per slot: `acquire` bumps the refcount and materializes the
//! chunk on first reference, fresh or read back from the store when the
//! hierarchy says it already exists. `release` drops the refcount; at zero
//! an eviction task is queued on the clip pool, so insert threads never block
//! on I/O. The task re-checks the refcount and serializes + uploads while
//! holding the slot lock: a thread acquiring the same chunk mid-write simply
//! blocks until the write lands, then reloads; the chunk can never fork.
//! A chunk is serialized exactly once per eviction, and only with no
//! references outstanding.
//!
//! Lock order is map → slot. The chunk is only touched under its slot lock,
//! and no thread ever holds one slot's lock while taking another's.

use crate::chunk::Chunk;
use crate::climber::Climber;
use crate::error::{IndexError, Result};
use crate::format::Format;
use crate::hierarchy::Hierarchy;
use crate::id::Id;
use crate::pool::{Cell, PointPool};
use crate::structure::{ChunkInfo, Structure};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{ensure_get, ensure_put, Bounds, ObjectStore, Schema};

#[derive(Default)]
struct SlotState {
    refs: usize,
    chunk: Option<Chunk>,
    /// An eviction task is queued for this slot.
    evicting: bool,
    /// The slot was removed from the sparse map; holders must re-resolve.
    retired: bool,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

/// A held reference to a live chunk. Obtained from [`Registry::acquire`] and
/// returned through [`Registry::release`]; the builder treats these as
/// linear values; dropping one without releasing leaks the refcount.
pub struct ChunkRef {
    info: ChunkInfo,
    slot: Arc<Slot>,
}

impl ChunkRef {
    pub fn chunk_id(&self) -> &Id {
        self.info.chunk_id()
    }

    pub fn is_sparse(&self) -> bool {
        self.info.is_sparse()
    }
}

struct Shared {
    structure: Arc<Structure>,
    format: Format,
    storage_schema: Schema,
    pool: Arc<PointPool>,
    store: Arc<dyn ObjectStore>,
    hierarchy: Arc<Hierarchy>,
    slow: DashMap<Id, Arc<Slot>>,
    pending: Mutex<usize>,
    drained: Condvar,
    fatal: Mutex<Option<String>>,
    chunk_count: AtomicU64,
}

impl Shared {
    /// Serialize and upload one evicted chunk, then recycle its memory.
    /// Runs on the clip pool with the owning slot's lock held.
    fn write_out(&self, mut chunk: Chunk) -> Result<()> {
        let path = self.structure.maybe_prefix(chunk.id());
        let num_points = chunk.num_points();
        let chunk_type = chunk.chunk_type();
        let cells = chunk.acquire();
        let bytes = self
            .format
            .pack_cells(&cells, self.storage_schema.point_size(), chunk_type)?;
        ensure_put(self.store.as_ref(), &path, &bytes)?;
        // The write completed; only now may the pool reclaim the nodes.
        self.hierarchy.set(chunk.id(), num_points);
        self.pool.release_cells(cells);
        tracing::trace!(chunk = %chunk.id(), points = num_points, "chunk evicted");
        Ok(())
    }

    /// The eviction task body: evict if still idle, then retire the sparse
    /// map entry if the slot ended up empty.
    fn evict(&self, id: &Id, slot: &Arc<Slot>, is_sparse: bool) {
        {
            let mut state = slot.state.lock();
            state.evicting = false;
            if state.refs == 0 {
                if let Some(chunk) = state.chunk.take() {
                    self.chunk_count.fetch_sub(1, Ordering::Relaxed);
                    if !chunk.is_empty() {
                        if let Err(e) = self.write_out(chunk) {
                            tracing::error!(chunk = %id, error = %e, "chunk eviction failed");
                            let mut fatal = self.fatal.lock();
                            if fatal.is_none() {
                                *fatal = Some(e.to_string());
                            }
                        }
                    }
                }
            }
        }

        if is_sparse {
            // Retire under the slot lock so a holder that raced us observes
            // the removal and re-resolves instead of reviving a dead slot.
            self.slow.remove_if(id, |_, slot| {
                let mut state = slot.state.lock();
                let idle = state.refs == 0 && state.chunk.is_none();
                if idle {
                    state.retired = true;
                }
                idle
            });
        }
    }
}

/// Thread-safe owner of every live cold-tier chunk.
pub struct Registry {
    structure: Arc<Structure>,
    cube: Bounds,
    fast: Vec<Arc<Slot>>,
    shared: Arc<Shared>,
    clip_pool: rayon::ThreadPool,
}

impl Registry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        structure: Arc<Structure>,
        cube: Bounds,
        format: Format,
        storage_schema: Schema,
        pool: Arc<PointPool>,
        store: Arc<dyn ObjectStore>,
        hierarchy: Arc<Hierarchy>,
        clip_threads: usize,
    ) -> Result<Self> {
        let clip_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(clip_threads.max(1))
            .thread_name(|i| format!("strata-clip-{i}"))
            .build()
            .map_err(|e| IndexError::Config(format!("clip pool: {e}")))?;

        let mut fast = Vec::with_capacity(structure.num_fast_chunks());
        fast.resize_with(structure.num_fast_chunks(), || Arc::new(Slot::default()));

        Ok(Self {
            shared: Arc::new(Shared {
                structure: structure.clone(),
                format,
                storage_schema,
                pool,
                store,
                hierarchy,
                slow: DashMap::new(),
                pending: Mutex::new(0),
                drained: Condvar::new(),
                fatal: Mutex::new(None),
                chunk_count: AtomicU64::new(0),
            }),
            structure,
            cube,
            fast,
            clip_pool,
        })
    }

    /// Number of chunks currently resident.
    pub fn chunk_count(&self) -> u64 {
        self.shared.chunk_count.load(Ordering::Relaxed)
    }

    /// Acquire a reference to the chunk owning the climber's current index.
    /// The first reference materializes the chunk, reading it back from the
    /// store if a previous eviction wrote it out.
    pub fn acquire(&self, climber: &Climber<'_>) -> Result<ChunkRef> {
        let info = ChunkInfo::new(&self.structure, climber.index())?;
        loop {
            let slot = match info.fast_index() {
                Some(i) => self.fast[i].clone(),
                None => self
                    .shared
                    .slow
                    .entry(info.chunk_id().clone())
                    .or_default()
                    .value()
                    .clone(),
            };

            let mut state = slot.state.lock();
            if state.retired {
                // Lost a race with eviction cleanup; resolve a fresh slot.
                continue;
            }
            state.refs += 1;
            if state.chunk.is_none() {
                match self.materialize(&info) {
                    Ok(chunk) => {
                        state.chunk = Some(chunk);
                        self.shared.chunk_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        state.refs -= 1;
                        return Err(e);
                    }
                }
            }
            drop(state);
            return Ok(ChunkRef { info, slot });
        }
    }

    fn materialize(&self, info: &ChunkInfo) -> Result<Chunk> {
        let mut chunk = Chunk::new(info);
        if !self.shared.hierarchy.contains(info.chunk_id()) {
            return Ok(chunk);
        }

        // The hierarchy says this chunk exists on disk: load and repopulate.
        let path = self.structure.maybe_prefix(info.chunk_id());
        let bytes = ensure_get(self.shared.store.as_ref(), &path)?;
        let unpacker = self
            .shared
            .format
            .unpack(bytes, self.shared.storage_schema.point_size())?;
        if let Some(stored) = unpacker.chunk_type() {
            if stored != chunk.chunk_type() {
                return Err(IndexError::Integrity(format!(
                    "chunk {} stored as {stored:?} but its id places it as {:?}",
                    info.chunk_id(),
                    chunk.chunk_type()
                )));
            }
        }
        let cells = unpacker.into_cells(&self.shared.pool, &self.shared.storage_schema);
        let mut climber = Climber::new(&self.structure, self.cube);
        chunk.populate(cells, &mut climber)?;
        tracing::trace!(chunk = %info.chunk_id(), "chunk reloaded");
        Ok(chunk)
    }

    /// Insert a cell at the climber's position within an acquired chunk.
    /// A distinct-point collision hands the cell back for descent.
    pub fn try_insert(
        &self,
        r: &ChunkRef,
        climber: &Climber<'_>,
        cell: Cell,
    ) -> Result<Option<Cell>> {
        let offset = climber
            .index()
            .checked_sub(r.info.chunk_id())
            .and_then(|rel| rel.to_u64())
            .filter(|o| *o < r.info.max_points())
            .ok_or_else(|| {
                IndexError::Config(format!(
                    "index {} is outside chunk {}",
                    climber.index(),
                    r.info.chunk_id()
                ))
            })?;
        let tick = climber.tick(cell.point());

        let mut state = r.slot.state.lock();
        let chunk = state.chunk.as_mut().expect("acquired chunk is resident");
        Ok(chunk.try_insert(offset, tick, cell))
    }

    /// Drop a reference. The last reference out queues an eviction task.
    pub fn release(&self, r: ChunkRef) {
        let ChunkRef { info, slot } = r;
        let schedule = {
            let mut state = slot.state.lock();
            debug_assert!(state.refs > 0);
            state.refs -= 1;
            let idle = state.refs == 0 && state.chunk.is_some();
            if idle && !state.evicting {
                state.evicting = true;
                true
            } else {
                false
            }
        };
        if schedule {
            self.spawn_evict(info.chunk_id().clone(), slot, info.is_sparse());
        }
    }

    fn spawn_evict(&self, id: Id, slot: Arc<Slot>, is_sparse: bool) {
        *self.shared.pending.lock() += 1;
        let shared = self.shared.clone();
        self.clip_pool.spawn(move || {
            shared.evict(&id, &slot, is_sparse);
            let mut pending = shared.pending.lock();
            *pending -= 1;
            if *pending == 0 {
                shared.drained.notify_all();
            }
        });
    }

    /// Evict every idle chunk, wait for all queued writes to land, and
    /// surface any write failure. Called at checkpoints and at shutdown.
    pub fn flush(&self) -> Result<()> {
        for slot in &self.fast {
            let id = {
                let mut state = slot.state.lock();
                if state.refs != 0 || state.chunk.is_none() || state.evicting {
                    None
                } else {
                    state.evicting = true;
                    state.chunk.as_ref().map(|c| c.id().clone())
                }
            };
            if let Some(id) = id {
                self.spawn_evict(id, slot.clone(), false);
            }
        }

        let entries: Vec<(Id, Arc<Slot>)> = self
            .shared
            .slow
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (id, slot) in entries {
            let schedule = {
                let mut state = slot.state.lock();
                if state.refs == 0 && state.chunk.is_some() && !state.evicting {
                    state.evicting = true;
                    true
                } else {
                    false
                }
            };
            if schedule {
                self.spawn_evict(id, slot, true);
            }
        }

        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
        drop(pending);

        match self.shared.fatal.lock().take() {
            Some(msg) => Err(IndexError::Eviction(msg)),
            None => Ok(()),
        }
    }
}
