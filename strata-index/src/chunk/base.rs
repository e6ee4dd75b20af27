//! The base chunk: all shallow depths, always resident.
//!
//! Depths `[null_depth_end, base_depth_end)` live in one in-memory chunk for
//! the whole build and are written once, at the end, as a single object.
//! Because a point's depth and tube cannot be recovered from its coordinates
//! alone at read time, the base serializes with a *celled* schema: each point
//! record is prefixed with a u64 tube id: the point's tree index relative to
//! `base_index_begin`. Loading climbs every point again and cross-checks the
//! stored tube id; a mismatch means the object is corrupt.
//!
//! Each depth holds a run of contiguous slabs. A fresh build has one slab per
//! depth (the full level, or the subset's span); merging subset builds
//! concatenates slabs, which must meet end-to-start.

use crate::chunk::{ChunkType, Tube};
use crate::climber::Climber;
use crate::error::{IndexError, Result};
use crate::format::Format;
use crate::id::Id;
use crate::pool::{Cell, PointPool};
use crate::structure::Structure;
use strata_core::Schema;

/// Cap on tubes per base depth, so a misconfigured tree fails fast instead
/// of allocating gigabytes of empty columns.
const MAX_BASE_SPAN: u64 = 1 << 26;

/// Outcome of a base-tier insert attempt.
pub enum BaseInsert {
    /// Inserted (or stacked onto an identical point).
    Done,
    /// The slot holds a different point; descend and retry.
    Collision(Cell),
    /// The index is outside this build's spans (subset edge); drop.
    OutOfSpan(Cell),
}

/// One contiguous span of tubes at a single base depth.
#[derive(Debug)]
pub struct BaseSlab {
    id: Id,
    max_points: u64,
    tubes: Vec<Tube>,
}

impl BaseSlab {
    fn new(id: Id, max_points: u64) -> Self {
        let mut tubes = Vec::new();
        tubes.resize_with(max_points as usize, Tube::default);
        Self {
            id,
            max_points,
            tubes,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn end_id(&self) -> Id {
        &self.id + self.max_points
    }

    fn contains(&self, index: &Id) -> Option<u64> {
        index
            .checked_sub(&self.id)
            .and_then(|rel| rel.to_u64())
            .filter(|offset| *offset < self.max_points)
    }
}

/// The resident chunk covering every base depth.
#[derive(Debug)]
pub struct BaseChunk {
    base_depth_begin: u64,
    base_depth_end: u64,
    base_index_begin: Id,
    /// Indexed by depth; depths below `base_depth_begin` stay empty so the
    /// depth doubles as the vector index.
    runs: Vec<Vec<BaseSlab>>,
    num_points: u64,
}

impl BaseChunk {
    /// Build an empty base over explicit per-depth spans
    /// (`spans[d] = (begin_index, count)` for base depths).
    pub fn new(structure: &Structure, spans: &[(Id, u64)]) -> Result<Self> {
        let begin = structure.base_depth_begin();
        let end = structure.base_depth_end();
        debug_assert_eq!(spans.len() as u64, end);

        let mut runs = Vec::with_capacity(end as usize);
        for d in 0..end {
            if d < begin {
                runs.push(Vec::new());
                continue;
            }
            let (id, count) = &spans[d as usize];
            if *count > MAX_BASE_SPAN {
                return Err(IndexError::Config(format!(
                    "base depth {d} spans {count} tubes, exceeding the resident limit"
                )));
            }
            runs.push(vec![BaseSlab::new(id.clone(), *count)]);
        }

        Ok(Self {
            base_depth_begin: begin,
            base_depth_end: end,
            base_index_begin: structure.base_index_begin().clone(),
            runs,
            num_points: 0,
        })
    }

    /// Spans for a whole (non-subset) build: the full level at each depth.
    pub fn full_spans(structure: &Structure) -> Result<Vec<(Id, u64)>> {
        let mut spans = Vec::new();
        for d in 0..structure.base_depth_end() {
            let count = structure
                .points_at_depth(d)
                .to_u64()
                .ok_or_else(|| IndexError::Config(format!("base depth {d} is too deep")))?;
            spans.push((structure.level_index(d), count));
        }
        Ok(spans)
    }

    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Insert at the climber's current position.
    pub fn try_insert(&mut self, climber: &Climber<'_>, cell: Cell) -> BaseInsert {
        let depth = climber.depth();
        debug_assert!(depth >= self.base_depth_begin && depth < self.base_depth_end);
        let tick = climber.tick(cell.point());
        let run = &mut self.runs[depth as usize];

        let slot = run
            .iter_mut()
            .find_map(|slab| slab.contains(climber.index()).map(|offset| (slab, offset)));
        let (slab, offset) = match slot {
            Some(found) => found,
            None => return BaseInsert::OutOfSpan(cell),
        };

        let incoming = cell.size() as u64;
        match slab.tubes[offset as usize].try_insert(tick, cell) {
            None => {
                self.num_points += incoming;
                BaseInsert::Done
            }
            Some(cell) => BaseInsert::Collision(cell),
        }
    }

    /// Serialize every base depth into a single celled object and write it.
    /// Returns the number of points written.
    pub fn save(
        &self,
        format: &Format,
        storage_schema: &Schema,
        store: &dyn strata_core::ObjectStore,
        path: &str,
    ) -> Result<u64> {
        let point_size = storage_schema.point_size();
        let celled_size = point_size + 8;
        let mut payload = Vec::with_capacity(self.num_points as usize * celled_size);
        let mut num_points = 0u64;

        for run in &self.runs {
            for slab in run {
                for (i, tube) in slab.tubes.iter().enumerate() {
                    if tube.is_empty() {
                        continue;
                    }
                    let index = &slab.id + i as u64;
                    let tube_id = (&index - &self.base_index_begin)
                        .to_u64()
                        .ok_or_else(|| {
                            IndexError::Integrity(format!("base tube id {index} overflows"))
                        })?;
                    for (_, cell) in tube.iter() {
                        for data in cell.data() {
                            payload.extend_from_slice(&tube_id.to_le_bytes());
                            payload.extend_from_slice(data);
                            num_points += 1;
                        }
                    }
                }
            }
        }

        let bytes = format.pack_raw(payload, num_points, ChunkType::Base)?;
        strata_core::ensure_put(store, path, &bytes)?;
        Ok(num_points)
    }

    /// Repopulate from a stored base object, validating every tube id
    /// against a fresh climb.
    pub fn populate_from(
        &mut self,
        bytes: Vec<u8>,
        format: &Format,
        storage_schema: &Schema,
        structure: &Structure,
        climber: &mut Climber<'_>,
        pool: &PointPool,
    ) -> Result<()> {
        let point_size = storage_schema.point_size();
        let celled_size = point_size + 8;
        let unpacker = format.unpack(bytes, celled_size)?;
        if let Some(t) = unpacker.chunk_type() {
            if t != ChunkType::Base {
                return Err(IndexError::Integrity(format!(
                    "expected a base chunk, found {t:?}"
                )));
            }
        }

        let payload = unpacker.into_payload();
        for record in payload.chunks_exact(celled_size) {
            let tube_id = u64::from_le_bytes(record[..8].try_into().unwrap());
            let point_bytes = &record[8..];
            let point = storage_schema.read_point(point_bytes);

            let index = &self.base_index_begin + tube_id;
            let depth = structure.depth_of(&index);
            climber.reset();
            climber.magnify_to(&point, depth);
            if climber.index() != &index {
                return Err(IndexError::Integrity(format!(
                    "stored base tube {tube_id} disagrees with climb to {}",
                    climber.index()
                )));
            }

            let mut cells = pool.alloc_cells(1);
            let mut data = pool.alloc_data(1);
            let mut node = data.pop().expect("allocated one node");
            node.copy_from_slice(point_bytes);
            let mut cell = cells.pop().expect("allocated one cell");
            cell.set(point, node);

            match self.try_insert(climber, cell) {
                BaseInsert::Done => {}
                BaseInsert::Collision(_) | BaseInsert::OutOfSpan(_) => {
                    return Err(IndexError::Integrity(format!(
                        "stored base point {point} cannot reoccupy tube {tube_id}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Concatenate another build's base onto this one. Slab runs must meet
    /// exactly: the incoming span's begin id equals this run's end id.
    pub fn merge(&mut self, other: BaseChunk) -> Result<()> {
        if self.base_depth_begin != other.base_depth_begin
            || self.base_depth_end != other.base_depth_end
        {
            return Err(IndexError::Merge(
                "base depth ranges differ between builds".into(),
            ));
        }

        for (d, adding) in other.runs.into_iter().enumerate() {
            let run = &mut self.runs[d];
            for slab in adding {
                if let Some(last) = run.last() {
                    if last.end_id() != *slab.id() {
                        return Err(IndexError::Merge(format!(
                            "base depth {d}: span starting at {} does not meet {}; \
                             merges must be performed consecutively",
                            slab.id(),
                            last.end_id()
                        )));
                    }
                }
                run.push(slab);
            }
        }
        self.num_points += other.num_points;
        Ok(())
    }
}
