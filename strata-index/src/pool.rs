//! Pooled point memory.
//!
//! Point bytes churn hard during a build: every batch allocates thousands of
//! fixed-size records that die when their chunk serializes. The pool recycles
//! both the raw point buffers (data nodes) and the `Cell` shells that wrap
//! them, handing them out in blocks and taking them back at chunk collection.
//!
//! Data nodes released to the pool are unreachable afterward; ownership moves
//! through `Cell` → chunk → serializer and back, so no generation tagging is
//! needed.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::Point;

/// Block size for pool allocations and for the streaming table capacity.
pub const POOL_BLOCK: usize = 4096;

/// One point record's bytes, sized by the storage schema.
pub type DataNode = Box<[u8]>;

/// One or more points sharing a discretized (chunk, tube, tick) position.
/// Multiple data nodes mean stacked collisions.
#[derive(Debug, Default)]
pub struct Cell {
    point: Point,
    stack: Vec<DataNode>,
}

impl Cell {
    pub fn point(&self) -> &Point {
        &self.point
    }

    /// Initialize a recycled cell with a single point.
    pub fn set(&mut self, point: Point, data: DataNode) {
        debug_assert!(self.stack.is_empty());
        self.point = point;
        self.stack.push(data);
    }

    /// Stack another cell's points onto this one. Data nodes are kept in
    /// byte order so serialization is deterministic regardless of insert
    /// order.
    pub fn push(&mut self, other: Cell) {
        debug_assert_eq!(self.point, other.point);
        for data in other.stack {
            let at = self
                .stack
                .partition_point(|existing| existing.as_ref() <= data.as_ref());
            self.stack.insert(at, data);
        }
    }

    /// Number of stacked points.
    pub fn size(&self) -> usize {
        self.stack.len()
    }

    pub fn data(&self) -> &[DataNode] {
        &self.stack
    }

    /// Take the data nodes, leaving the cell empty for recycling.
    pub fn take_data(&mut self) -> Vec<DataNode> {
        std::mem::take(&mut self.stack)
    }
}

/// A drained set of cells on its way to serialization or recycling.
pub type CellStack = Vec<Cell>;

/// Fixed-size slab allocator for point bytes and cells.
#[derive(Debug)]
pub struct PointPool {
    point_size: usize,
    data: Mutex<Vec<DataNode>>,
    cells: Mutex<Vec<Cell>>,
    allocated: AtomicU64,
}

impl PointPool {
    pub fn new(point_size: usize) -> Self {
        Self {
            point_size,
            data: Mutex::new(Vec::new()),
            cells: Mutex::new(Vec::new()),
            allocated: AtomicU64::new(0),
        }
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// Total data nodes ever allocated (live plus pooled).
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Acquire `n` data nodes, reusing pooled buffers first.
    pub fn alloc_data(&self, n: usize) -> Vec<DataNode> {
        let mut out = {
            let mut free = self.data.lock();
            let take = n.min(free.len());
            let split_at = free.len() - take;
            free.split_off(split_at)
        };
        let fresh = n - out.len();
        if fresh > 0 {
            self.allocated.fetch_add(fresh as u64, Ordering::Relaxed);
            out.extend((0..fresh).map(|_| vec![0u8; self.point_size].into_boxed_slice()));
        }
        out
    }

    /// Acquire `n` cell shells.
    pub fn alloc_cells(&self, n: usize) -> Vec<Cell> {
        let mut out = {
            let mut free = self.cells.lock();
            let take = n.min(free.len());
            let split_at = free.len() - take;
            free.split_off(split_at)
        };
        out.extend((out.len()..n).map(|_| Cell::default()));
        out
    }

    /// Return data nodes to the pool.
    pub fn release_data(&self, nodes: impl IntoIterator<Item = DataNode>) {
        self.data.lock().extend(nodes);
    }

    /// Return cells to the pool, harvesting their data nodes first.
    pub fn release_cells(&self, cells: impl IntoIterator<Item = Cell>) {
        let mut data = Vec::new();
        let mut shells = Vec::new();
        for mut cell in cells {
            data.extend(cell.take_data());
            shells.push(cell);
        }
        self.data.lock().extend(data);
        self.cells.lock().extend(shells);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_recycle() {
        let pool = PointPool::new(16);
        let nodes = pool.alloc_data(10);
        assert_eq!(nodes.len(), 10);
        assert_eq!(pool.allocated(), 10);
        assert!(nodes.iter().all(|n| n.len() == 16));

        pool.release_data(nodes);
        let again = pool.alloc_data(4);
        assert_eq!(again.len(), 4);
        // Reused, not reallocated.
        assert_eq!(pool.allocated(), 10);
    }

    #[test]
    fn test_release_cells_harvests_data() {
        let pool = PointPool::new(8);
        let mut cells = pool.alloc_cells(2);
        let mut data = pool.alloc_data(2);
        cells[0].set(Point::new(1.0, 2.0, 3.0), data.pop().unwrap());
        cells[1].set(Point::new(1.0, 2.0, 3.0), data.pop().unwrap());

        pool.release_cells(cells);
        assert_eq!(pool.alloc_data(2).len(), 2);
        assert_eq!(pool.allocated(), 2);
        let recycled = pool.alloc_cells(1);
        assert_eq!(recycled[0].size(), 0);
    }

    #[test]
    fn test_collision_stack_sorted() {
        let pool = PointPool::new(4);
        let p = Point::new(0.0, 0.0, 0.0);
        let mk = |byte: u8| -> Cell {
            let mut cell = Cell::default();
            cell.set(p, vec![byte; 4].into_boxed_slice());
            cell
        };
        let mut base = mk(5);
        base.push(mk(1));
        base.push(mk(9));
        base.push(mk(1));
        assert_eq!(base.size(), 4);
        let bytes: Vec<u8> = base.data().iter().map(|d| d[0]).collect();
        assert_eq!(bytes, vec![1, 1, 5, 9]);
        drop(pool);
    }
}
