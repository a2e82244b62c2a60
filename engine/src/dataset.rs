//! The dataset container: the object map that owns shapes, the two-layer
//! index built over them, and the dataspace/metadata the rest of the engine
//! treats as process-wide configuration once set (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::index::two_layer::TwoLayerIndex;
use crate::index::uniform_grid::UniformGridIndex;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::shape::{Mbr, RecId, Shape};
use crate::{ErrorKind, Result};

/// The data type tag carried in dataset metadata (§6); interpretation beyond
/// "point data uses the uniform grid, everything else uses the two-layer
/// index" is left to the query layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Point,
    LineString,
    Polygon,
    Box,
}

/// APRIL side-data is an external collaborator (§1); the dataset only needs
/// to key and carry it, not interpret it.
pub type AprilKey = (u32, RecId);

/// A mapping from `recID` to owned [`Shape`], the two indexes built over it,
/// and the metadata a `prepareDataset`/`partition`/`buildIndex` lifecycle
/// populates in order.
///
/// Invariant: shape references inside the indexes are stable for the
/// dataset's lifetime — the indexes never see a shape move or get dropped
/// out from under them, because they only ever hold [`crate::index::IndexEntry`]
/// copies of `(rec_id, mbr)`, not borrows into `objects`.
pub struct Dataset {
    pub internal_id: i64,
    pub data_type: DataType,
    pub file_path: String,
    pub persist: bool,
    objects: HashMap<RecId, Shape>,
    dataspace: Option<Dataspace>,
    two_layer: TwoLayerIndex,
    uniform_grid: UniformGridIndex,
    april: HashMap<AprilKey, Vec<u8>>,
}

impl Dataset {
    pub fn new(internal_id: i64, data_type: DataType, file_path: impl Into<String>, persist: bool) -> Self {
        Self {
            internal_id,
            data_type,
            file_path: file_path.into(),
            persist,
            objects: HashMap::new(),
            dataspace: None,
            two_layer: TwoLayerIndex::new(),
            uniform_grid: UniformGridIndex::new(),
            april: HashMap::new(),
        }
    }

    /// Loads a parsed shape into the object map. Call `compute_dataspace`
    /// once every shape has been loaded, then `partition` and `build_index`.
    pub fn load_shape(&mut self, shape: Shape) {
        self.objects.insert(shape.rec_id, shape);
    }

    pub fn get(&self, rec_id: RecId) -> Option<&Shape> {
        self.objects.get(&rec_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.objects.values()
    }

    pub fn dataspace(&self) -> Option<Dataspace> {
        self.dataspace
    }

    /// Computes the dataspace as the ε-padded union of every loaded shape's
    /// MBR (§3). Must run after every shape is loaded and before `partition`.
    pub fn compute_dataspace(&mut self) -> Result<Dataspace> {
        let mut iter = self.objects.values();
        let first = iter
            .next()
            .ok_or_else(|| ErrorKind::Partitioning.with_message("cannot compute dataspace of an empty dataset"))?;
        let union = iter.fold(first.mbr, |acc, shape| acc.union(&shape.mbr));
        let dataspace = Dataspace::from_union(union);
        self.dataspace = Some(dataspace);
        Ok(dataspace)
    }

    /// Overrides the dataspace (used when the dataspace is broadcast from
    /// the host rather than computed locally, e.g. for a query dataset that
    /// must share the indexed dataset's grid).
    pub fn set_dataspace(&mut self, dataspace: Dataspace) {
        self.dataspace = Some(dataspace);
    }

    /// Assigns every loaded shape to its fine partitions/classes and
    /// populates both indexes. Does not seal them — call `build_index` after
    /// every node has finished partitioning its share.
    pub fn partition(&mut self, method: &PartitioningMethod, world_size: u32) -> Result<()> {
        let dataspace = self
            .dataspace
            .ok_or_else(|| ErrorKind::Partitioning.with_message("dataspace must be set before partitioning"))?;
        for shape in self.objects.values_mut() {
            method.assign(&dataspace, shape, world_size)?;
            self.two_layer.insert(shape);
            self.uniform_grid.insert(method, &dataspace, shape)?;
        }
        Ok(())
    }

    /// Seals both indexes so queries may run. Idempotent.
    pub fn build_index(&mut self) {
        self.two_layer.seal();
        self.uniform_grid.seal();
    }

    pub fn two_layer_index(&self) -> &TwoLayerIndex {
        &self.two_layer
    }

    pub fn uniform_grid_index(&self) -> &UniformGridIndex {
        &self.uniform_grid
    }

    pub fn set_april(&mut self, key: AprilKey, payload: Vec<u8>) {
        self.april.insert(key, payload);
    }

    pub fn april(&self, key: AprilKey) -> Option<&[u8]> {
        self.april.get(&key).map(Vec::as_slice)
    }

    pub fn union_mbr(&self) -> Option<Mbr> {
        let mut iter = self.objects.values();
        let first = iter.next()?.mbr;
        Some(iter.fold(first, |acc, shape| acc.union(&shape.mbr)))
    }
}
