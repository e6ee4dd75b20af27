//! Point schemas: an ordered list of named, fixed-width dimensions.
//!
//! A *normalized* schema stores X, Y, Z first. On-disk point records are the
//! little-endian concatenation of every dimension in schema order, so the
//! schema fully determines `point_size` and every field offset.

use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::point::Point;
use serde::{Deserialize, Serialize};

/// Dimension names with meaning to the indexer.
pub const DIM_X: &str = "X";
pub const DIM_Y: &str = "Y";
pub const DIM_Z: &str = "Z";

/// Per-point source-file id, stamped by the ingest tables when present.
pub const DIM_ORIGIN: &str = "OriginId";

/// Per-point sequence number within its source file.
pub const DIM_POINT_ID: &str = "PointId";

/// Tube id prefix used only by the celled base-chunk serialization.
pub const DIM_TUBE_ID: &str = "TubeId";

/// Fixed-width dimension types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimType {
    F64,
    F32,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl DimType {
    pub fn size(&self) -> usize {
        match self {
            DimType::F64 | DimType::I64 | DimType::U64 => 8,
            DimType::F32 | DimType::I32 | DimType::U32 => 4,
            DimType::I16 | DimType::U16 => 2,
            DimType::I8 | DimType::U8 => 1,
        }
    }
}

/// A single named dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: DimType,
}

impl DimInfo {
    pub fn new(name: impl Into<String>, dtype: DimType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// An ordered dimension list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    dims: Vec<DimInfo>,
}

impl Schema {
    pub fn new(dims: Vec<DimInfo>) -> Result<Self> {
        let schema = Self { dims };
        for name in [DIM_X, DIM_Y, DIM_Z] {
            if schema.find(name).is_none() {
                return Err(Error::schema(format!("missing required dimension {name}")));
            }
        }
        schema.validate_coordinates()?;
        Ok(schema)
    }

    /// Coordinates are routed as f64 natively, or as the signed integers a
    /// delta quantizes into. Any other XYZ type cannot be read back.
    ///
    /// `new` enforces this; schemas arriving through deserialization must be
    /// re-validated before their records are parsed.
    pub fn validate_coordinates(&self) -> Result<()> {
        for name in [DIM_X, DIM_Y, DIM_Z] {
            if let Some((i, _)) = self.find(name) {
                match self.dims[i].dtype {
                    DimType::F64 | DimType::I32 | DimType::I64 => {}
                    other => {
                        return Err(Error::schema(format!(
                            "{name} cannot be stored as {other:?}; coordinates must be f64, i32, or i64"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// A minimal XYZ-only schema with f64 coordinates.
    pub fn xyz() -> Self {
        Self {
            dims: vec![
                DimInfo::new(DIM_X, DimType::F64),
                DimInfo::new(DIM_Y, DimType::F64),
                DimInfo::new(DIM_Z, DimType::F64),
            ],
        }
    }

    pub fn dims(&self) -> &[DimInfo] {
        &self.dims
    }

    /// Total serialized size of one point record.
    pub fn point_size(&self) -> usize {
        self.dims.iter().map(|d| d.dtype.size()).sum()
    }

    /// Locate a dimension by name, returning `(index, byte_offset)`.
    pub fn find(&self, name: &str) -> Option<(usize, usize)> {
        let mut offset = 0;
        for (i, dim) in self.dims.iter().enumerate() {
            if dim.name == name {
                return Some((i, offset));
            }
            offset += dim.dtype.size();
        }
        None
    }

    /// Whether X, Y, Z are the first three dimensions, in that order.
    pub fn is_normal(&self) -> bool {
        self.dims.len() >= 3
            && self.dims[0].name == DIM_X
            && self.dims[1].name == DIM_Y
            && self.dims[2].name == DIM_Z
    }

    /// Reorder so X, Y, Z come first, preserving the relative order of the
    /// remaining dimensions.
    pub fn normalized(&self) -> Schema {
        let mut xyz = Vec::with_capacity(3);
        let mut rest = Vec::new();
        for name in [DIM_X, DIM_Y, DIM_Z] {
            if let Some((i, _)) = self.find(name) {
                xyz.push(self.dims[i].clone());
            }
        }
        for dim in &self.dims {
            if dim.name != DIM_X && dim.name != DIM_Y && dim.name != DIM_Z {
                rest.push(dim.clone());
            }
        }
        xyz.extend(rest);
        Schema { dims: xyz }
    }

    /// Rewrite the XYZ dimensions to the given storage type (integer layout
    /// when a delta is present).
    pub fn with_xyz(&self, dtype: DimType) -> Schema {
        let dims = self
            .dims
            .iter()
            .map(|d| {
                if d.name == DIM_X || d.name == DIM_Y || d.name == DIM_Z {
                    DimInfo::new(d.name.clone(), dtype)
                } else {
                    d.clone()
                }
            })
            .collect();
        Schema { dims }
    }

    /// The storage schema for the given optional delta over the given cube.
    pub fn storage(&self, delta: Option<&Delta>, cube: &crate::bounds::Bounds) -> Schema {
        let normal = self.normalized();
        match delta {
            Some(d) => normal.with_xyz(d.xyz_type(cube)),
            None => normal,
        }
    }

    /// Prepend a u64 `TubeId` dimension. Base chunks serialize with this
    /// schema so depth and tube can be round-tripped.
    pub fn celled(&self) -> Schema {
        let mut dims = vec![DimInfo::new(DIM_TUBE_ID, DimType::U64)];
        dims.extend(self.dims.iter().cloned());
        Schema { dims }
    }

    /// The storage type of the coordinate dimensions.
    pub fn xyz_type(&self) -> DimType {
        self.dims[0].dtype
    }

    /// Size in bytes of the three coordinate fields.
    pub fn xyz_size(&self) -> usize {
        self.xyz_type().size() * 3
    }

    /// Read the coordinates from the head of a normalized point record.
    /// Integer layouts come back as their integral f64 values, matching the
    /// quantized space the tree routes in.
    pub fn read_point(&self, buf: &[u8]) -> Point {
        let t = self.xyz_type();
        let w = t.size();
        let field = |i: usize| -> f64 {
            let b = &buf[i * w..(i + 1) * w];
            match t {
                DimType::F64 => f64::from_le_bytes(b.try_into().unwrap()),
                DimType::I32 => i32::from_le_bytes(b.try_into().unwrap()) as f64,
                DimType::I64 => i64::from_le_bytes(b.try_into().unwrap()) as f64,
                other => unreachable!("coordinate type {other:?} is rejected at validation"),
            }
        };
        Point::new(field(0), field(1), field(2))
    }

    /// Write coordinates into the head of a normalized point record.
    pub fn write_point(&self, buf: &mut [u8], p: &Point) {
        let t = self.xyz_type();
        let w = t.size();
        let vals = [p.x, p.y, p.z];
        for (i, v) in vals.iter().enumerate() {
            let dst = &mut buf[i * w..(i + 1) * w];
            match t {
                DimType::F64 => dst.copy_from_slice(&v.to_le_bytes()),
                DimType::I32 => dst.copy_from_slice(&(*v as i32).to_le_bytes()),
                DimType::I64 => dst.copy_from_slice(&(*v as i64).to_le_bytes()),
                other => unreachable!("coordinate type {other:?} is rejected at validation"),
            }
        }
    }

    /// Write a u64 field by name, if the schema carries it.
    pub fn write_u64(&self, buf: &mut [u8], name: &str, value: u64) {
        if let Some((i, offset)) = self.find(name) {
            debug_assert_eq!(self.dims[i].dtype, DimType::U64);
            buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Read a u64 field by name.
    pub fn read_u64(&self, buf: &[u8], name: &str) -> Option<u64> {
        let (i, offset) = self.find(name)?;
        debug_assert_eq!(self.dims[i].dtype, DimType::U64);
        Some(u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()))
    }
}
