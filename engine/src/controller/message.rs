// Licensed under the MIT License.

//! Control-plane message bodies carried as an `Envelope` payload, for every
//! tag except the ones §4.2 pins to a fixed binary layout (`Shape` batches,
//! `DatasetMetadata`, the bare `GlobalDataspace` MBR — see
//! [`crate::fabric::wire`]). These travel as `serde_json`, matching the rest
//! of the query layer's wire format.

use serde::{Deserialize, Serialize};

use crate::dataset::DataType;
use crate::partitioning::PartitioningMethod;
use crate::query::result::QResultBase;
use crate::query::{Query, QueryId};
use crate::shape::RecId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControllerMessage {
    /// `MSG_PREPARE_DATASET` / `MSG_LOAD_DATASET`.
    PrepareDataset {
        internal_id: i64,
        data_type: DataType,
        file_path: String,
        persist: bool,
    },
    UnloadDataset {
        internal_id: i64,
    },
    /// `MSG_PARTITION_DATASET`: the partitioning method, broadcast once the
    /// configuration is known (the dataspace itself travels separately, as
    /// `Tag::GlobalDataspace`, per §4.2).
    PartitionDataset {
        method: PartitioningMethod,
        world_size: u32,
    },
    BuildIndex,
    Query(Query),
    QueryResult {
        query_id: QueryId,
        result: QResultBase,
    },
    /// `MSG_QUERY_DJ_BATCH`: the border objects themselves (kept here as
    /// already-decoded `(rec_id, mbr)` pairs since the distance-join kernel
    /// never needs full geometry). `dest_rank` names the worker this batch
    /// is ultimately destined for; the host relays it unchanged.
    DjBatch {
        query_id: QueryId,
        dest_rank: u32,
        entries: Vec<(RecId, crate::shape::Mbr)>,
    },
    /// `MSG_QUERY_DJ_FIN`: no more border batches will be requested.
    DjFin {
        query_id: QueryId,
    },
    /// `MSG_INSTR_FIN`: release resources and exit the event loop.
    InstrFin,
    Ack,
    Nack {
        message: String,
    },
}
