//! The uniform-grid index: a flat `partitionID -> entries` mapping with no
//! two-layer class split, used for point data and for range/kNN/distance-join
//! queries (§3).

use std::collections::HashMap;

use crate::index::IndexEntry;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::shape::{Mbr, Shape};
use crate::Result;

#[derive(Clone, Debug, Default)]
pub struct UniformGridIndex {
    cells: HashMap<i64, Vec<IndexEntry>>,
    order: Vec<i64>,
    sealed: bool,
}

impl UniformGridIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `shape` into every fine cell its MBR overlaps, using the same
    /// grid `method`/`dataspace` as the two-layer index — but without
    /// recording a two-layer class, since the uniform grid has none.
    pub fn insert(
        &mut self,
        method: &PartitioningMethod,
        dataspace: &Dataspace,
        shape: &Shape,
    ) -> Result<()> {
        debug_assert!(!self.sealed, "cannot insert into a sealed uniform-grid index");
        let entry = IndexEntry::from(shape);
        for (partition_id, _origin) in method.fine_cells_for_mbr(dataspace, &shape.mbr)? {
            self.cells.entry(partition_id).or_default().push(entry);
        }
        Ok(())
    }

    /// Sorts each cell by `rec_id` for deterministic iteration and fixes the
    /// traversal order. The uniform grid has no A/B/C/D ordering requirement
    /// (§3: "no class split"), so `rec_id` is an arbitrary but stable key.
    pub fn seal(&mut self) {
        for entries in self.cells.values_mut() {
            entries.sort_by_key(|e| e.rec_id);
        }
        self.order = self.cells.keys().copied().collect();
        self.order.sort_unstable();
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn cell(&self, partition_id: i64) -> &[IndexEntry] {
        self.cells
            .get(&partition_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn cells_in_order(&self) -> impl Iterator<Item = (i64, &[IndexEntry])> {
        self.order.iter().map(move |id| (*id, self.cell(*id)))
    }

    /// The bounding rectangle of a fine cell, used by the kNN pruning bound (§4.4).
    pub fn cell_bounds(&self, method: &PartitioningMethod, dataspace: &Dataspace, partition_id: i64) -> Mbr {
        let (i, j) = method
            .cell_from_partition_id(partition_id)
            .expect("partition_id came from this grid");
        let (ox, oy) = method.fine_cell_origin(dataspace, i, j);
        let (ox1, oy1) = method.fine_cell_origin(dataspace, i + 1, j + 1);
        Mbr::new(ox, oy, ox1, oy1)
    }
}
