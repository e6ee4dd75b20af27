//! Per-point tree descent.
//!
//! A `Climber` tracks the current node while routing one point: its index,
//! depth, and bounds. Each `magnify` step picks the child the point occupies
//! (bit 0 = x >= mid, bit 1 = y >= mid, bit 2 = z >= mid; format-fixed) and
//! narrows the bounds to that child. In the hybrid factor-4 tree the z bit is
//! omitted and z survives only as the tube tick.

use crate::id::Id;
use crate::structure::Structure;
use strata_core::{Bounds, Point};

/// Tick resolution cap: z is discretized to at most `2^MAX_TICK_DEPTH`
/// buckets so tick arithmetic stays exact in u64 and f64.
pub const MAX_TICK_DEPTH: u64 = 32;

#[derive(Debug, Clone)]
pub struct Climber<'a> {
    structure: &'a Structure,
    cube: Bounds,
    bounds: Bounds,
    index: Id,
    depth: u64,
}

impl<'a> Climber<'a> {
    pub fn new(structure: &'a Structure, cube: Bounds) -> Self {
        Self {
            structure,
            cube,
            bounds: cube,
            index: Id::ZERO,
            depth: 0,
        }
    }

    /// Return to the root.
    pub fn reset(&mut self) {
        self.bounds = self.cube;
        self.index = Id::ZERO;
        self.depth = 0;
    }

    pub fn index(&self) -> &Id {
        &self.index
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Bounds of the current node.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Descend one level toward `p`.
    pub fn magnify(&mut self, p: &Point) {
        let factor = self.structure.factor();
        let with_z = factor == 8;
        let dir = self.bounds.dir_of(p, with_z);
        self.bounds = if with_z {
            self.bounds.octant(dir)
        } else {
            self.bounds.quadrant(dir)
        };
        self.index = crate::structure::child_index(factor, &self.index, dir);
        self.depth += 1;
    }

    /// Descend until the given depth.
    pub fn magnify_to(&mut self, p: &Point, depth: u64) {
        while self.depth < depth {
            self.magnify(p);
        }
    }

    /// The z tick for `p` at the current depth: z compressed into the cube's
    /// vertical range at `2^min(depth, MAX_TICK_DEPTH)` resolution.
    pub fn tick(&self, p: &Point) -> u64 {
        let zd = self.depth.min(MAX_TICK_DEPTH);
        let buckets = 1u64 << zd;
        let rel = (p.z - self.cube.min().z) / self.cube.height();
        let tick = (rel * buckets as f64).floor();
        if tick < 0.0 {
            0
        } else {
            (tick as u64).min(buckets - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::StructureParams;
    use rand::{Rng, SeedableRng};

    fn octree() -> Structure {
        Structure::new(StructureParams {
            null_depth: 0,
            base_depth: 4,
            points_per_chunk: 4096,
            factor: 8,
            ..Default::default()
        })
        .unwrap()
    }

    fn cube8() -> Bounds {
        Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(8.0, 8.0, 8.0)).unwrap()
    }

    #[test]
    fn test_root_children() {
        let s = octree();
        let mut climber = Climber::new(&s, cube8());
        climber.magnify(&Point::new(1.0, 1.0, 1.0));
        assert_eq!(climber.index(), &Id::from(1u64));
        assert_eq!(climber.depth(), 1);

        climber.reset();
        climber.magnify(&Point::new(7.0, 7.0, 7.0));
        assert_eq!(climber.index(), &Id::from(8u64));
    }

    #[test]
    fn test_descent_is_deterministic_and_contained() {
        let s = octree();
        let cube = cube8();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let p = Point::new(
                rng.gen_range(0.0..8.0),
                rng.gen_range(0.0..8.0),
                rng.gen_range(0.0..8.0),
            );
            let mut a = Climber::new(&s, cube);
            let mut b = Climber::new(&s, cube);
            a.magnify_to(&p, 6);
            b.magnify_to(&p, 6);
            assert_eq!(a.index(), b.index());
            assert_eq!(s.depth_of(a.index()), 6);
            assert!(a.bounds().contains(&p));
        }
    }

    #[test]
    fn test_hybrid_omits_z() {
        let s = Structure::new(StructureParams {
            null_depth: 0,
            base_depth: 4,
            points_per_chunk: 4096,
            factor: 4,
            ..Default::default()
        })
        .unwrap();
        let mut low = Climber::new(&s, cube8());
        let mut high = Climber::new(&s, cube8());
        low.magnify_to(&Point::new(1.0, 1.0, 0.5), 3);
        high.magnify_to(&Point::new(1.0, 1.0, 7.5), 3);
        // Same column regardless of z.
        assert_eq!(low.index(), high.index());
        // The z range never narrows; the tick separates them instead.
        assert_eq!(low.bounds().height(), 8.0);
        assert_ne!(low.tick(&Point::new(1.0, 1.0, 0.5)), high.tick(&Point::new(1.0, 1.0, 7.5)));
    }

    #[test]
    fn test_tick_bucketing() {
        let s = octree();
        let mut climber = Climber::new(&s, cube8());
        climber.magnify_to(&Point::new(0.5, 0.5, 0.5), 3);
        // depth 3 -> 8 buckets over [0, 8): tick == floor(z)
        for z in [0.0, 0.9, 3.5, 7.9] {
            assert_eq!(climber.tick(&Point::new(0.5, 0.5, z)), z as u64);
        }
        // Epsilon-admitted points just past the cube clamp to the edge buckets.
        assert_eq!(climber.tick(&Point::new(0.5, 0.5, 8.01)), 7);
        assert_eq!(climber.tick(&Point::new(0.5, 0.5, -0.01)), 0);
    }
}
