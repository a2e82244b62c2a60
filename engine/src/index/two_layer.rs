//! The two-layer index: one [`Partition`] per fine grid cell present in a
//! dataset, each holding four class-sorted entry lists.

use std::collections::HashMap;

use crate::index::{by_y_min_then_rec_id, IndexEntry};
use crate::shape::{Shape, TwoLayerClass};

/// One fine-grid partition's four two-layer class lists. Once [`Partition::seal`]
/// runs, each list is sorted by `mbr.y_min` ascending, ties broken by `rec_id` (§3).
#[derive(Clone, Debug, Default)]
pub struct Partition {
    pub partition_id: i64,
    pub a: Vec<IndexEntry>,
    pub b: Vec<IndexEntry>,
    pub c: Vec<IndexEntry>,
    pub d: Vec<IndexEntry>,
}

impl Partition {
    fn new(partition_id: i64) -> Self {
        Self {
            partition_id,
            ..Default::default()
        }
    }

    fn class_mut(&mut self, class: TwoLayerClass) -> &mut Vec<IndexEntry> {
        match class {
            TwoLayerClass::A => &mut self.a,
            TwoLayerClass::B => &mut self.b,
            TwoLayerClass::C => &mut self.c,
            TwoLayerClass::D => &mut self.d,
        }
    }

    pub fn class(&self, class: TwoLayerClass) -> &[IndexEntry] {
        match class {
            TwoLayerClass::A => &self.a,
            TwoLayerClass::B => &self.b,
            TwoLayerClass::C => &self.c,
            TwoLayerClass::D => &self.d,
        }
    }

    fn seal(&mut self) {
        self.a.sort_by(by_y_min_then_rec_id);
        self.b.sort_by(by_y_min_then_rec_id);
        self.c.sort_by(by_y_min_then_rec_id);
        self.d.sort_by(by_y_min_then_rec_id);
    }

    pub fn len(&self) -> usize {
        self.a.len() + self.b.len() + self.c.len() + self.d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A mapping from `partitionID` to [`Partition`], plus a traversal order.
/// Must be [`TwoLayerIndex::seal`]ed before the sweep kernel runs against it.
#[derive(Clone, Debug, Default)]
pub struct TwoLayerIndex {
    partitions: HashMap<i64, Partition>,
    order: Vec<i64>,
    sealed: bool,
}

impl TwoLayerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts every `(partitionId, class)` assignment recorded on `shape`
    /// (computed beforehand by [`crate::partitioning::PartitioningMethod::assign`]).
    pub fn insert(&mut self, shape: &Shape) {
        debug_assert!(!self.sealed, "cannot insert into a sealed two-layer index");
        let entry = IndexEntry::from(shape);
        for assignment in &shape.partitions {
            let partition = self
                .partitions
                .entry(assignment.partition_id)
                .or_insert_with(|| Partition::new(assignment.partition_id));
            partition.class_mut(assignment.class).push(entry);
        }
    }

    /// Sorts every partition's class lists and fixes the traversal order.
    /// Idempotent; queries must not run before this has been called once.
    pub fn seal(&mut self) {
        for partition in self.partitions.values_mut() {
            partition.seal();
        }
        self.order = self.partitions.keys().copied().collect();
        self.order.sort_unstable();
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn partition(&self, partition_id: i64) -> Option<&Partition> {
        self.partitions.get(&partition_id)
    }

    pub fn partitions_in_order(&self) -> impl Iterator<Item = &Partition> {
        self.order.iter().filter_map(move |id| self.partitions.get(id))
    }

    pub fn partition_ids(&self) -> &[i64] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Geometry, Mbr};

    fn shape_at(rec_id: i64, partition_id: i64, class: TwoLayerClass, y_min: f64) -> Shape {
        let mut shape = Shape::new(rec_id, Geometry::Point { x: 0.0, y: y_min });
        shape.mbr = Mbr::new(0.0, y_min, 0.0, y_min);
        shape.assign_partition(partition_id, class);
        shape
    }

    #[test]
    fn seal_sorts_each_class_list_by_y_min_then_rec_id() {
        let mut index = TwoLayerIndex::new();
        index.insert(&shape_at(2, 1, TwoLayerClass::A, 5.0));
        index.insert(&shape_at(1, 1, TwoLayerClass::A, 5.0));
        index.insert(&shape_at(3, 1, TwoLayerClass::A, 1.0));
        index.seal();

        let partition = index.partition(1).unwrap();
        let ids: Vec<_> = partition.a.iter().map(|e| e.rec_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn a_shape_in_two_partitions_appears_in_both() {
        let mut shape = Shape::new(1, Geometry::Point { x: 0.0, y: 0.0 });
        shape.assign_partition(1, TwoLayerClass::A);
        shape.assign_partition(2, TwoLayerClass::D);

        let mut index = TwoLayerIndex::new();
        index.insert(&shape);
        index.seal();

        assert_eq!(index.partition(1).unwrap().a.len(), 1);
        assert_eq!(index.partition(2).unwrap().d.len(), 1);
    }
}
