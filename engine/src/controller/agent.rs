// Licensed under the MIT License.

//! The agent: the process that actually owns and evaluates one controller's
//! share of the data (§2). Every controller — including the host — has
//! exactly one; `LocalFabric` (see `fabric::transport`) models it as an
//! in-process peer with its own inbox rather than a child process.

use std::collections::HashMap;

use crate::dataset::{DataType, Dataset};
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::shape::Shape;
use crate::{ErrorKind, Result};

pub struct Agent {
    pub rank: u32,
    datasets: HashMap<i64, Dataset>,
}

impl Agent {
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            datasets: HashMap::new(),
        }
    }

    /// `MSG_LOAD_DATASET` / `MSG_PREPARE_DATASET`: registers an empty
    /// dataset, ready to receive shapes routed to this node.
    pub fn prepare_dataset(&mut self, internal_id: i64, data_type: DataType, file_path: impl Into<String>, persist: bool) {
        self.datasets
            .insert(internal_id, Dataset::new(internal_id, data_type, file_path, persist));
    }

    pub fn unload_dataset(&mut self, internal_id: i64) {
        self.datasets.remove(&internal_id);
    }

    pub fn load_shape(&mut self, internal_id: i64, shape: Shape) -> Result<()> {
        self.dataset_mut(internal_id)?.load_shape(shape);
        Ok(())
    }

    pub fn dataset(&self, internal_id: i64) -> Result<&Dataset> {
        self.datasets
            .get(&internal_id)
            .ok_or_else(|| ErrorKind::Query.with_message(format!("no dataset with id {internal_id} loaded")))
    }

    pub fn dataset_mut(&mut self, internal_id: i64) -> Result<&mut Dataset> {
        self.datasets
            .get_mut(&internal_id)
            .ok_or_else(|| ErrorKind::Query.with_message(format!("no dataset with id {internal_id} loaded")))
    }

    /// `MSG_PARTITION_DATASET` followed by `MSG_BUILD_INDEX`: applies the
    /// process-wide dataspace and partitioning method to every dataset this
    /// agent holds, then seals both indexes (§4.6 `Busy::{Partitioning,
    /// Indexing}`). The dataspace is the one broadcast from the host
    /// (`Tag::GlobalDataspace`), not recomputed locally, so every node's
    /// grid lines up (§3: "the dataspace [is] process-wide").
    pub fn partition_and_index_all(&mut self, method: &PartitioningMethod, dataspace: Dataspace, world_size: u32) -> Result<()> {
        for dataset in self.datasets.values_mut() {
            dataset.set_dataspace(dataspace);
            dataset.partition(method, world_size)?;
            dataset.build_index();
        }
        Ok(())
    }

    pub fn has_dataset(&self, internal_id: i64) -> bool {
        self.datasets.contains_key(&internal_id)
    }
}
