//! Scale/offset quantization for integer XYZ storage.
//!
//! When a delta is present, on-disk XYZ values are the signed integers
//! `round((v - offset) / scale)`. The integer width is the smallest of
//! i32/i64 that fits the conforming extent divided by the scale.

use crate::bounds::Bounds;
use crate::point::Point;
use crate::schema::DimType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub scale: [f64; 3],
    pub offset: [f64; 3],
}

impl Delta {
    pub fn new(scale: [f64; 3], offset: [f64; 3]) -> Self {
        Self { scale, offset }
    }

    /// A uniform scale with zero offset.
    pub fn uniform(scale: f64) -> Self {
        Self::new([scale; 3], [0.0; 3])
    }

    /// Quantize a native point into scaled space.
    pub fn quantize(&self, p: &Point) -> Point {
        Point::new(
            (p.x - self.offset[0]) / self.scale[0],
            (p.y - self.offset[1]) / self.scale[1],
            (p.z - self.offset[2]) / self.scale[2],
        )
        .round()
    }

    /// Map a quantized point back to native space.
    pub fn unquantize(&self, p: &Point) -> Point {
        Point::new(
            p.x * self.scale[0] + self.offset[0],
            p.y * self.scale[1] + self.offset[1],
            p.z * self.scale[2] + self.offset[2],
        )
    }

    /// Quantize a bounds box corner-wise.
    pub fn quantize_bounds(&self, b: &Bounds) -> Bounds {
        let min = self.quantize(b.min());
        let max = self.quantize(b.max());
        // Rounding cannot invert a corner, so this construction is valid.
        Bounds::new(min, max).expect("quantized bounds inverted")
    }

    /// The narrowest signed integer type that holds the scaled extent of
    /// `bounds` on every axis.
    pub fn xyz_type(&self, bounds: &Bounds) -> DimType {
        let extents = [
            bounds.width() / self.scale[0],
            bounds.depth() / self.scale[1],
            bounds.height() / self.scale[2],
        ];
        let max = extents.iter().cloned().fold(0.0f64, f64::max);
        if max < i32::MAX as f64 {
            DimType::I32
        } else {
            DimType::I64
        }
    }
}

impl Default for Delta {
    fn default() -> Self {
        Self::new([1.0; 3], [0.0; 3])
    }
}
