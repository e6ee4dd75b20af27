//! Subset builds: disjoint spatial partitions built independently and merged
//! later.
//!
//! A subset selects one of `of` quadrants of the cube, where `of` is a power
//! of four: the (1-based) id's bit pairs, most significant first, walk the
//! x/y quadrant choice level by level. Because the hybrid tree branches the
//! same way, a subset is exactly one subtree, and its descendant indices at
//! any depth form one contiguous span, which is what makes base-chunk merge
//! concatenation work.
//!
//! Cold data chunks of a subset build are written at their final,
//! un-postfixed paths; only the metadata, manifest, hierarchy and base carry
//! the `-<id>` postfix until merge links them.

use crate::error::{BuildError, Result};
use serde::{Deserialize, Serialize};
use strata_core::Bounds;
use strata_index::{Id, Structure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    /// 1-based partition id.
    pub id: u64,
    /// Total partitions; a power of four.
    pub of: u64,
}

impl Subset {
    pub fn new(id: u64, of: u64) -> Result<Self> {
        if of < 4 || !of.is_power_of_two() || of.trailing_zeros() % 2 != 0 {
            return Err(BuildError::Config(format!(
                "subset count must be a power of four, got {of}"
            )));
        }
        if id == 0 || id > of {
            return Err(BuildError::Config(format!(
                "subset id {id} out of range 1..={of}"
            )));
        }
        Ok(Self { id, of })
    }

    /// Tree levels consumed by the partition: `log4(of)`.
    pub fn levels(&self) -> u64 {
        (self.of.trailing_zeros() / 2) as u64
    }

    /// Subset builds only make sense when the partition walks whole tree
    /// levels, and when the partition levels are never stored.
    pub fn validate_structure(&self, structure: &Structure) -> Result<()> {
        if structure.factor() != 4 {
            return Err(BuildError::Config(
                "subset builds require the hybrid (factor 4) tree".into(),
            ));
        }
        if structure.null_depth_end() < self.levels() {
            return Err(BuildError::Config(format!(
                "subset of {} requires a null depth of at least {}",
                self.of,
                self.levels()
            )));
        }
        // Every cold chunk must lie entirely inside one partition, or two
        // builders would overwrite each other's chunk objects.
        let required = self.levels() + structure.nominal_chunk_depth();
        if structure.cold_depth_begin() < required {
            return Err(BuildError::Config(format!(
                "subset of {} with {}-point chunks requires a base depth of at least {required}",
                self.of,
                structure.base_points_per_chunk()
            )));
        }
        Ok(())
    }

    /// The quadrant prefix: the subtree's node number at depth `levels()`.
    fn prefix(&self) -> u64 {
        self.id - 1
    }

    /// This partition's share of the cube.
    pub fn bounds(&self, cube: &Bounds) -> Bounds {
        let levels = self.levels();
        let mut out = *cube;
        for level in 0..levels {
            let dir = (self.prefix() >> (2 * (levels - 1 - level))) & 3;
            out = out.quadrant(dir);
        }
        out
    }

    /// The contiguous index span `[begin, begin + count)` this partition
    /// owns at `depth`. Only valid for `depth >= levels()`.
    pub fn span(&self, structure: &Structure, depth: u64) -> (Id, u64) {
        debug_assert!(depth >= self.levels());
        let width = 4u64.pow((depth - self.levels()) as u32);
        let begin = &structure.level_index(depth) + (self.prefix() * width);
        (begin, width)
    }

    /// Storage postfix for this subset's metadata artifacts.
    pub fn postfix(&self) -> String {
        format!("-{}", self.id)
    }
}

/// Per-depth base spans for a build: the subset's slice of each level, or
/// the whole level. Depths below the base are placeholders.
pub fn base_spans(structure: &Structure, subset: Option<&Subset>) -> Result<Vec<(Id, u64)>> {
    match subset {
        Some(s) => Ok((0..structure.base_depth_end())
            .map(|d| {
                if d < structure.base_depth_begin() {
                    (Id::ZERO, 0)
                } else {
                    s.span(structure, d)
                }
            })
            .collect()),
        None => Ok(strata_index::BaseChunk::full_spans(structure)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Point;
    use strata_index::StructureParams;

    fn structure() -> Structure {
        Structure::new(StructureParams {
            null_depth: 2,
            base_depth: 5,
            points_per_chunk: 64,
            factor: 4,
            ..Default::default()
        })
        .unwrap()
    }

    fn cube() -> Bounds {
        Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(8.0, 8.0, 8.0)).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(Subset::new(1, 4).is_ok());
        assert!(Subset::new(16, 16).is_ok());
        assert!(Subset::new(0, 4).is_err());
        assert!(Subset::new(5, 4).is_err());
        assert!(Subset::new(1, 8).is_err());
        assert!(Subset::new(1, 2).is_err());
    }

    #[test]
    fn test_bounds_partition_cube() {
        let cube = cube();
        // Four subsets of four tile the cube in x/y and keep full z.
        let mut seen_mids = Vec::new();
        for id in 1..=4 {
            let b = Subset::new(id, 4).unwrap().bounds(&cube);
            assert_eq!(b.width(), 4.0);
            assert_eq!(b.depth(), 4.0);
            assert_eq!(b.height(), 8.0);
            seen_mids.push((b.mid().x, b.mid().y));
        }
        seen_mids.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(
            seen_mids,
            vec![(2.0, 2.0), (2.0, 6.0), (6.0, 2.0), (6.0, 6.0)]
        );
    }

    #[test]
    fn test_spans_tile_each_level() {
        let s = structure();
        for depth in 2..5 {
            let mut expected_begin = s.level_index(depth);
            let mut total = 0;
            for id in 1..=4 {
                let (begin, count) = Subset::new(id, 4).unwrap().span(&s, depth);
                assert_eq!(begin, expected_begin, "subset {id} at depth {depth}");
                expected_begin = &begin + count;
                total += count;
            }
            assert_eq!(Id::from(total), s.points_at_depth(depth));
        }
    }

    #[test]
    fn test_structure_requirements() {
        let quadtree = structure();
        assert!(Subset::new(1, 4).unwrap().validate_structure(&quadtree).is_ok());
        // Sixteen subsets need two null levels; this structure has exactly 2.
        assert!(Subset::new(1, 16)
            .unwrap()
            .validate_structure(&quadtree)
            .is_ok());

        let octree = Structure::new(StructureParams {
            factor: 8,
            points_per_chunk: 262_144,
            ..Default::default()
        })
        .unwrap();
        assert!(Subset::new(1, 4).unwrap().validate_structure(&octree).is_err());
    }

    #[test]
    fn test_span_matches_bounds_climb() {
        use strata_index::Climber;
        let s = structure();
        let cube = cube();
        for id in 1..=4u64 {
            let subset = Subset::new(id, 4).unwrap();
            let b = subset.bounds(&cube);
            let mid = b.mid();
            let mut climber = Climber::new(&s, cube);
            climber.magnify_to(&mid, 3);
            let (begin, count) = subset.span(&s, 3);
            assert!(climber.index() >= &begin);
            assert!(climber.index() < &(&begin + count));
        }
    }
}
