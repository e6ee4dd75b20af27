//! Axis-aligned bounding boxes and their derived forms.
//!
//! A build carries four related boxes:
//! - *native*: the union of the input extents
//! - *conforming*: native, rescaled when a delta is present
//! - *cube*: conforming expanded to a cube (the tree subdivides cubes)
//! - *epsilon*: the cube grown slightly so boundary points are admitted
//!
//! Serialized form is the flat array `[xmin, ymin, zmin, xmax, ymax, zmax]`.

use crate::error::{Error, Result};
use crate::point::Point;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Growth ratio applied to the cube to produce the epsilon bounds.
pub const EPSILON_RATIO: f64 = 0.005;

/// An axis-aligned box. Containment is half-open: `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    min: Point,
    max: Point,
}

impl Bounds {
    pub fn new(min: Point, max: Point) -> Result<Self> {
        if min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(Error::bounds(format!(
                "min {} exceeds max {}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// An inverted box, suitable as the identity for `grow_to`.
    pub fn empty() -> Self {
        Self {
            min: Point::new(f64::MAX, f64::MAX, f64::MAX),
            max: Point::new(f64::MIN, f64::MIN, f64::MIN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn min(&self) -> &Point {
        &self.min
    }

    pub fn max(&self) -> &Point {
        &self.max
    }

    pub fn mid(&self) -> Point {
        Point::new(
            self.min.x + (self.max.x - self.min.x) / 2.0,
            self.min.y + (self.max.y - self.min.y) / 2.0,
            self.min.z + (self.max.z - self.min.z) / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn depth(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn height(&self) -> f64 {
        self.max.z - self.min.z
    }

    /// Half-open containment test.
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x < self.max.x
            && p.y < self.max.y
            && p.z < self.max.z
    }

    /// Whether the two boxes intersect.
    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    /// Expand to include `p`.
    pub fn grow_to(&mut self, p: &Point) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand to a cube about the midpoint, sized by the largest extent.
    pub fn cube(&self) -> Bounds {
        let half = self.width().max(self.depth()).max(self.height()) / 2.0;
        let mid = self.mid();
        Bounds {
            min: Point::new(mid.x - half, mid.y - half, mid.z - half),
            max: Point::new(mid.x + half, mid.y + half, mid.z + half),
        }
    }

    /// Grow each extent by `ratio`, symmetrically about the midpoint.
    pub fn grow(&self, ratio: f64) -> Bounds {
        let mid = self.mid();
        let dx = self.width() / 2.0 * (1.0 + ratio);
        let dy = self.depth() / 2.0 * (1.0 + ratio);
        let dz = self.height() / 2.0 * (1.0 + ratio);
        Bounds {
            min: Point::new(mid.x - dx, mid.y - dy, mid.z - dz),
            max: Point::new(mid.x + dx, mid.y + dy, mid.z + dz),
        }
    }

    /// Child box for a 3D octant. Bit 0 selects the upper x half, bit 1 the
    /// upper y half, bit 2 the upper z half. This ordering is format-fixed.
    pub fn octant(&self, dir: u64) -> Bounds {
        let mid = self.mid();
        let mut out = *self;
        if dir & 1 != 0 {
            out.min.x = mid.x;
        } else {
            out.max.x = mid.x;
        }
        if dir & 2 != 0 {
            out.min.y = mid.y;
        } else {
            out.max.y = mid.y;
        }
        if dir & 4 != 0 {
            out.min.z = mid.z;
        } else {
            out.max.z = mid.z;
        }
        out
    }

    /// Child box for a 2D quadrant, leaving z untouched. Used by the hybrid
    /// tree and by subset partitioning.
    pub fn quadrant(&self, dir: u64) -> Bounds {
        let mid = self.mid();
        let mut out = *self;
        if dir & 1 != 0 {
            out.min.x = mid.x;
        } else {
            out.max.x = mid.x;
        }
        if dir & 2 != 0 {
            out.min.y = mid.y;
        } else {
            out.max.y = mid.y;
        }
        out
    }

    /// The octant a point occupies, using the format-fixed bit ordering.
    pub fn dir_of(&self, p: &Point, with_z: bool) -> u64 {
        let mid = self.mid();
        let mut dir = 0;
        if p.x >= mid.x {
            dir |= 1;
        }
        if p.y >= mid.y {
            dir |= 2;
        }
        if with_z && p.z >= mid.z {
            dir |= 4;
        }
        dir
    }
}

impl Serialize for Bounds {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        [
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z,
        ]
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = <[f64; 6]>::deserialize(deserializer)?;
        Bounds::new(Point::new(v[0], v[1], v[2]), Point::new(v[3], v[4], v[5]))
            .map_err(D::Error::custom)
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} - {}]", self.min, self.max)
    }
}
