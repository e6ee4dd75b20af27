//! A 3D point with double-precision coordinates.
//!
//! When a build carries a delta (scale/offset), coordinates have already been
//! quantized by the ingest tables, so the values stored here are integral and
//! the tree's routing arithmetic is identical either way.

use serde::{Deserialize, Serialize};

/// A point in 3D space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component-wise minimum.
    pub fn min(&self, other: &Point) -> Point {
        Point::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    /// Component-wise maximum.
    pub fn max(&self, other: &Point) -> Point {
        Point::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Round each coordinate to the nearest integer, half away from zero.
    pub fn round(&self) -> Point {
        Point::new(self.x.round(), self.y.round(), self.z.round())
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max() {
        let a = Point::new(1.0, 5.0, 3.0);
        let b = Point::new(2.0, 4.0, 3.0);
        assert_eq!(a.min(&b), Point::new(1.0, 4.0, 3.0));
        assert_eq!(a.max(&b), Point::new(2.0, 5.0, 3.0));
    }

    #[test]
    fn test_round_half_away() {
        let p = Point::new(0.5, -0.5, 1.4);
        assert_eq!(p.round(), Point::new(1.0, -1.0, 1.0));
    }
}
