//! Chunk binary layout.
//!
//! ```text
//! [ payload: raw point records, or a zstd stream of them ]
//! [ tail: configured fields, in order                    ]
//!     numPoints : u64 LE
//!     chunkType : u8        (0 = Contiguous, 1 = Sparse, 2 = Base)
//!     numBytes  : u64 LE    (payload length, verified on read)
//! ```
//!
//! The tail is not self-describing: readers learn `tailFields` from the
//! build metadata and peel fields from the right in reverse order. A
//! compressed payload cannot be sized without `numPoints`, so that
//! configuration is rejected at construction.

use crate::chunk::ChunkType;
use crate::error::{IndexError, Result};
use crate::pool::{Cell, CellStack, PointPool};
use serde::{Deserialize, Serialize};
use strata_core::Schema;

/// zstd level used for chunk payloads and hierarchy bodies.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Trailing metadata fields on each stored chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TailField {
    NumPoints,
    ChunkType,
    NumBytes,
}

impl TailField {
    fn width(&self) -> usize {
        match self {
            TailField::NumPoints | TailField::NumBytes => 8,
            TailField::ChunkType => 1,
        }
    }
}

/// Codec for the hierarchy object body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyCodec {
    #[default]
    Zstd,
    None,
}

/// Micro-level storage parameters: how each chunk's bytes are laid out,
/// as opposed to the `Structure`, which says which chunks exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    compress: bool,
    #[serde(rename = "tail")]
    tail_fields: Vec<TailField>,
    #[serde(rename = "compressHierarchy", default)]
    hierarchy_codec: HierarchyCodec,
}

impl Format {
    pub fn new(
        compress: bool,
        tail_fields: Vec<TailField>,
        hierarchy_codec: HierarchyCodec,
    ) -> Result<Self> {
        for field in &tail_fields {
            if tail_fields.iter().filter(|f| *f == field).count() > 1 {
                return Err(IndexError::Config(format!(
                    "duplicate tail field {field:?}"
                )));
            }
        }
        if compress && !tail_fields.contains(&TailField::NumPoints) {
            return Err(IndexError::Config(
                "cannot specify compression without a numPoints tail field".into(),
            ));
        }
        Ok(Self {
            compress,
            tail_fields,
            hierarchy_codec,
        })
    }

    /// The default layout: compressed, `[numPoints, chunkType]` tail.
    pub fn standard(compress: bool) -> Self {
        Self::new(
            compress,
            vec![TailField::NumPoints, TailField::ChunkType],
            HierarchyCodec::default(),
        )
        .expect("standard tail fields are valid")
    }

    /// Re-validate after deserialization; serde bypasses `new`.
    pub fn validate(&self) -> Result<()> {
        Self::new(
            self.compress,
            self.tail_fields.clone(),
            self.hierarchy_codec,
        )
        .map(|_| ())
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn tail_fields(&self) -> &[TailField] {
        &self.tail_fields
    }

    pub fn hierarchy_codec(&self) -> HierarchyCodec {
        self.hierarchy_codec
    }

    /// Pack drained cells into stored chunk bytes.
    pub fn pack_cells(
        &self,
        cells: &[Cell],
        point_size: usize,
        chunk_type: ChunkType,
    ) -> Result<Vec<u8>> {
        let num_points: u64 = cells.iter().map(|c| c.size() as u64).sum();
        let mut payload = Vec::with_capacity(num_points as usize * point_size);
        for cell in cells {
            for data in cell.data() {
                debug_assert_eq!(data.len(), point_size);
                payload.extend_from_slice(data);
            }
        }
        self.pack_raw(payload, num_points, chunk_type)
    }

    /// Pack an already-built payload (used by the base chunk, whose celled
    /// records carry an extra tube-id field).
    pub fn pack_raw(
        &self,
        payload: Vec<u8>,
        num_points: u64,
        chunk_type: ChunkType,
    ) -> Result<Vec<u8>> {
        let mut data = if self.compress {
            zstd::encode_all(&payload[..], COMPRESSION_LEVEL)
                .map_err(|e| IndexError::Compression(format!("chunk encode: {e}")))?
        } else {
            payload
        };
        let payload_len = data.len() as u64;

        for field in &self.tail_fields {
            match field {
                TailField::NumPoints => data.extend_from_slice(&num_points.to_le_bytes()),
                TailField::ChunkType => data.push(chunk_type.to_u8()),
                TailField::NumBytes => data.extend_from_slice(&payload_len.to_le_bytes()),
            }
        }
        Ok(data)
    }

    /// Mirror of pack: peel the tail, decompress, verify counts.
    pub fn unpack(&self, mut data: Vec<u8>, point_size: usize) -> Result<Unpacker> {
        let mut num_points: Option<u64> = None;
        let mut num_bytes: Option<u64> = None;
        let mut chunk_type: Option<ChunkType> = None;

        // The tail was appended in order, so it peels in reverse.
        for field in self.tail_fields.iter().rev() {
            let width = field.width();
            if data.len() < width {
                return Err(IndexError::Format("chunk shorter than its tail".into()));
            }
            let at = data.len() - width;
            match field {
                TailField::NumPoints => {
                    num_points = Some(u64::from_le_bytes(data[at..].try_into().unwrap()));
                }
                TailField::NumBytes => {
                    num_bytes = Some(u64::from_le_bytes(data[at..].try_into().unwrap()));
                }
                TailField::ChunkType => {
                    chunk_type = Some(ChunkType::from_u8(data[at])?);
                }
            }
            data.truncate(at);
        }

        if let Some(expected) = num_bytes {
            if expected != data.len() as u64 {
                return Err(IndexError::Integrity(format!(
                    "payload is {} bytes, tail says {expected}",
                    data.len()
                )));
            }
        }

        let payload = if self.compress {
            zstd::decode_all(&data[..])
                .map_err(|e| IndexError::Compression(format!("chunk decode: {e}")))?
        } else {
            data
        };

        let num_points = match num_points {
            Some(n) => {
                if payload.len() as u64 != n * point_size as u64 {
                    return Err(IndexError::Integrity(format!(
                        "decompressed to {} bytes, expected {} points of {point_size}",
                        payload.len(),
                        n
                    )));
                }
                n
            }
            None => {
                if payload.len() % point_size != 0 {
                    return Err(IndexError::Integrity(format!(
                        "payload of {} bytes is not a whole number of {point_size}-byte points",
                        payload.len()
                    )));
                }
                (payload.len() / point_size) as u64
            }
        };

        Ok(Unpacker {
            payload,
            point_size,
            num_points,
            chunk_type,
        })
    }
}

/// A chunk's bytes after tail removal and decompression.
#[derive(Debug)]
pub struct Unpacker {
    payload: Vec<u8>,
    point_size: usize,
    num_points: u64,
    chunk_type: Option<ChunkType>,
}

impl Unpacker {
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    pub fn chunk_type(&self) -> Option<ChunkType> {
        self.chunk_type
    }

    /// Raw payload (celled base records keep their tube-id prefixes).
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Rebuild pooled cells, one per stored point record.
    pub fn into_cells(self, pool: &PointPool, schema: &Schema) -> CellStack {
        let n = self.num_points as usize;
        let mut cells = pool.alloc_cells(n);
        let mut data = pool.alloc_data(n);
        for (i, record) in self.payload.chunks_exact(self.point_size).enumerate() {
            let mut node = data.pop().expect("allocated one node per point");
            node.copy_from_slice(record);
            cells[i].set(schema.read_point(record), node);
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Point;

    fn cells_of(points: &[(f64, f64, f64)], schema: &Schema, pool: &PointPool) -> CellStack {
        let mut cells = pool.alloc_cells(points.len());
        let mut data = pool.alloc_data(points.len());
        for (cell, &(x, y, z)) in cells.iter_mut().zip(points) {
            let mut node = data.pop().unwrap();
            let p = Point::new(x, y, z);
            schema.write_point(&mut node, &p);
            cell.set(p, node);
        }
        cells
    }

    #[test]
    fn test_compression_requires_num_points() {
        let err = Format::new(
            true,
            vec![TailField::ChunkType],
            HierarchyCodec::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));

        // Uncompressed is fine without numPoints.
        assert!(Format::new(false, vec![TailField::ChunkType], HierarchyCodec::None).is_ok());
    }

    #[test]
    fn test_duplicate_tail_rejected() {
        let err = Format::new(
            false,
            vec![TailField::NumPoints, TailField::NumPoints],
            HierarchyCodec::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn test_roundtrip_all_layouts() {
        let schema = Schema::xyz();
        let pool = PointPool::new(schema.point_size());
        let points = [(1.5, 2.5, 3.5), (4.0, 5.0, 6.0), (7.25, 0.0, -1.0)];

        let tails: Vec<Vec<TailField>> = vec![
            vec![TailField::NumPoints, TailField::ChunkType],
            vec![TailField::ChunkType, TailField::NumPoints, TailField::NumBytes],
            vec![TailField::NumPoints],
        ];

        for compress in [false, true] {
            for tail in &tails {
                let format = Format::new(compress, tail.clone(), HierarchyCodec::default()).unwrap();
                let cells = cells_of(&points, &schema, &pool);
                let bytes = format
                    .pack_cells(&cells, schema.point_size(), ChunkType::Sparse)
                    .unwrap();
                pool.release_cells(cells);

                let unpacker = format.unpack(bytes, schema.point_size()).unwrap();
                assert_eq!(unpacker.num_points(), points.len() as u64);
                if tail.contains(&TailField::ChunkType) {
                    assert_eq!(unpacker.chunk_type(), Some(ChunkType::Sparse));
                }
                let cells = unpacker.into_cells(&pool, &schema);
                let got: Vec<(f64, f64, f64)> = cells
                    .iter()
                    .map(|c| (c.point().x, c.point().y, c.point().z))
                    .collect();
                assert_eq!(got, points);
                pool.release_cells(cells);
            }
        }
    }

    #[test]
    fn test_tampered_num_points_detected() {
        let schema = Schema::xyz();
        let pool = PointPool::new(schema.point_size());
        let format = Format::standard(true);
        let cells = cells_of(&[(1.0, 2.0, 3.0)], &schema, &pool);
        let mut bytes = format
            .pack_cells(&cells, schema.point_size(), ChunkType::Contiguous)
            .unwrap();

        // Corrupt the numPoints tail field (first 8 of the last 9 bytes).
        let at = bytes.len() - 9;
        bytes[at..at + 8].copy_from_slice(&99u64.to_le_bytes());
        let err = format.unpack(bytes, schema.point_size()).unwrap_err();
        assert!(matches!(err, IndexError::Integrity(_)));
    }

    #[test]
    fn test_num_bytes_verified() {
        let format = Format::new(
            false,
            vec![TailField::NumBytes],
            HierarchyCodec::default(),
        )
        .unwrap();
        let bytes = format.pack_raw(vec![0u8; 24], 1, ChunkType::Contiguous).unwrap();
        let mut tampered = bytes.clone();
        tampered.insert(0, 0xFF);
        assert!(matches!(
            format.unpack(tampered, 24).unwrap_err(),
            IndexError::Integrity(_)
        ));
        assert!(format.unpack(bytes, 24).is_ok());
    }
}
