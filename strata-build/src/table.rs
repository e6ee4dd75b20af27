//! Pooled streaming point tables.
//!
//! A table exposes a fixed block of point-record slots to a source, then
//! wraps the filled slots in pooled cells and hands them to the build's
//! process callback. The callback returns the cells it did not consume;
//! those are recycled.
//!
//! Two variants:
//! - *normal*: the source writes straight into pool buffers (native layout
//!   is the storage layout)
//! - *converting*: the source writes f64 records into a staging area; the
//!   table quantizes XYZ through the delta into the pool's integer layout
//!   and carries the attribute bytes across

use crate::error::Result;
use crate::source::PointSource;
use strata_core::{Delta, Schema, DIM_ORIGIN, DIM_POINT_ID};
use strata_index::{CellStack, PointPool, POOL_BLOCK};

/// The insert callback: consumes what it can, returns the rejects.
pub type ProcessFn<'a> = &'a mut dyn FnMut(CellStack) -> CellStack;

pub struct PooledPointTable<'a> {
    pool: &'a PointPool,
    native_schema: Schema,
    storage_schema: Schema,
    delta: Option<Delta>,
    origin: Option<u64>,
    next_point_id: u64,
    process: ProcessFn<'a>,
}

impl<'a> PooledPointTable<'a> {
    pub fn new(
        pool: &'a PointPool,
        native_schema: Schema,
        storage_schema: Schema,
        delta: Option<Delta>,
        origin: Option<u64>,
        process: ProcessFn<'a>,
    ) -> Self {
        debug_assert_eq!(pool.point_size(), storage_schema.point_size());
        Self {
            pool,
            native_schema,
            storage_schema,
            delta,
            origin,
            next_point_id: 0,
            process,
        }
    }

    pub fn capacity(&self) -> usize {
        POOL_BLOCK
    }

    /// Stream the whole source through the process callback. Returns the
    /// number of points read.
    pub fn run(&mut self, source: &mut dyn PointSource) -> Result<u64> {
        match self.delta {
            Some(_) => self.run_converting(source),
            None => self.run_normal(source),
        }
    }

    /// Native doubles pass straight through pool buffers.
    fn run_normal(&mut self, source: &mut dyn PointSource) -> Result<u64> {
        let mut total = 0u64;
        loop {
            let mut nodes = self.pool.alloc_data(self.capacity());
            let n = {
                let mut slots: Vec<&mut [u8]> =
                    nodes.iter_mut().map(|b| &mut **b).collect();
                source.read(&mut slots)?
            };
            // Unused slots go straight back.
            self.pool.release_data(nodes.split_off(n));
            if n == 0 {
                break;
            }
            total += n as u64;

            let mut cells = self.pool.alloc_cells(n);
            for (cell, mut node) in cells.iter_mut().zip(nodes) {
                self.stamp(&mut node);
                cell.set(self.storage_schema.read_point(&node), node);
            }
            let rejected = (self.process)(cells);
            self.pool.release_cells(rejected);
        }
        Ok(total)
    }

    /// Quantize staged f64 records through the delta into integer layout.
    fn run_converting(&mut self, source: &mut dyn PointSource) -> Result<u64> {
        let delta = self.delta.expect("converting table has a delta");
        let native_size = self.native_schema.point_size();
        let native_xyz = self.native_schema.xyz_size();
        let storage_xyz = self.storage_schema.xyz_size();

        let mut staging: Vec<Box<[u8]>> = (0..self.capacity())
            .map(|_| vec![0u8; native_size].into_boxed_slice())
            .collect();

        let mut total = 0u64;
        loop {
            let n = {
                let mut slots: Vec<&mut [u8]> =
                    staging.iter_mut().map(|b| &mut **b).collect();
                source.read(&mut slots)?
            };
            if n == 0 {
                break;
            }
            total += n as u64;

            let mut cells = self.pool.alloc_cells(n);
            let mut nodes = self.pool.alloc_data(n);
            for (cell, staged) in cells.iter_mut().zip(staging.iter().take(n)) {
                let mut node = nodes.pop().expect("allocated one node per point");
                let quantized = delta.quantize(&self.native_schema.read_point(staged));
                self.storage_schema.write_point(&mut node, &quantized);
                node[storage_xyz..].copy_from_slice(&staged[native_xyz..]);
                self.stamp(&mut node);
                cell.set(quantized, node);
            }
            let rejected = (self.process)(cells);
            self.pool.release_cells(rejected);
        }
        Ok(total)
    }

    /// Stamp per-point provenance fields when the schema carries them.
    fn stamp(&mut self, node: &mut [u8]) {
        if let Some(origin) = self.origin {
            self.storage_schema.write_u64(node, DIM_ORIGIN, origin);
            self.storage_schema
                .write_u64(node, DIM_POINT_ID, self.next_point_id);
            self.next_point_id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;
    use strata_core::{Bounds, DimInfo, DimType, Point};

    #[test]
    fn test_normal_table_passes_through() {
        let schema = Schema::xyz();
        let pool = PointPool::new(schema.point_size());
        let points: Vec<Point> = (0..10)
            .map(|i| Point::new(i as f64, 2.0 * i as f64, 0.5))
            .collect();
        let mut source = SliceSource::from_points(schema.clone(), &points);

        let mut seen = Vec::new();
        let mut process = |cells: CellStack| -> CellStack {
            seen.extend(cells.iter().map(|c| c.point().x));
            cells // reject everything; the table must recycle
        };
        let mut table = PooledPointTable::new(
            &pool,
            schema.clone(),
            schema.clone(),
            None,
            None,
            &mut process,
        );
        let total = table.run(&mut source).unwrap();
        assert_eq!(total, 10);
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[3], 3.0);
    }

    #[test]
    fn test_converting_table_quantizes() {
        let native = Schema::new(vec![
            DimInfo::new("X", DimType::F64),
            DimInfo::new("Y", DimType::F64),
            DimInfo::new("Z", DimType::F64),
            DimInfo::new("Intensity", DimType::U16),
        ])
        .unwrap();
        let delta = Delta::uniform(0.01);
        let cube = Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(200.0, 200.0, 200.0))
            .unwrap();
        let storage = native.storage(Some(&delta), &cube);
        assert_eq!(storage.xyz_type(), DimType::I32);

        // One point with a nonzero attribute.
        let ps = native.point_size();
        let mut record = vec![0u8; ps];
        native.write_point(&mut record, &Point::new(123.456, 0.0, 50.0));
        record[24..26].copy_from_slice(&7u16.to_le_bytes());
        let mut source = SliceSource::new(native.clone(), record).unwrap();

        let pool = PointPool::new(storage.point_size());
        let mut captured = Vec::new();
        let storage_for_check = storage.clone();
        let mut process = |cells: CellStack| -> CellStack {
            for cell in &cells {
                captured.push((
                    *cell.point(),
                    storage_for_check.read_u64(cell.data()[0].as_ref(), "missing"),
                    u16::from_le_bytes(cell.data()[0][12..14].try_into().unwrap()),
                ));
            }
            cells
        };
        let mut table =
            PooledPointTable::new(&pool, native, storage, Some(delta), None, &mut process);
        table.run(&mut source).unwrap();

        assert_eq!(captured.len(), 1);
        let (p, _, intensity) = captured[0];
        assert_eq!(p, Point::new(12346.0, 0.0, 5000.0));
        assert_eq!(intensity, 7);
    }

    #[test]
    fn test_origin_stamping() {
        let schema = Schema::new(vec![
            DimInfo::new("X", DimType::F64),
            DimInfo::new("Y", DimType::F64),
            DimInfo::new("Z", DimType::F64),
            DimInfo::new(DIM_ORIGIN, DimType::U64),
            DimInfo::new(DIM_POINT_ID, DimType::U64),
        ])
        .unwrap();
        let pool = PointPool::new(schema.point_size());
        let points: Vec<Point> = (0..3).map(|i| Point::new(i as f64, 0.0, 0.0)).collect();
        let mut source = SliceSource::from_points(schema.clone(), &points);

        let mut stamps = Vec::new();
        let check = schema.clone();
        let mut process = |cells: CellStack| -> CellStack {
            for cell in &cells {
                let data = cell.data()[0].as_ref();
                stamps.push((
                    check.read_u64(data, DIM_ORIGIN).unwrap(),
                    check.read_u64(data, DIM_POINT_ID).unwrap(),
                ));
            }
            cells
        };
        let mut table = PooledPointTable::new(
            &pool,
            schema.clone(),
            schema.clone(),
            None,
            Some(42),
            &mut process,
        );
        table.run(&mut source).unwrap();
        assert_eq!(stamps, vec![(42, 0), (42, 1), (42, 2)]);
    }
}
