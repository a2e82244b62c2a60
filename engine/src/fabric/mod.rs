//! The message fabric: the tag taxonomy, the wire envelope, and the
//! broadcast/gather primitives the host and workers drive their event loops
//! with (§4.2).

pub mod transport;
pub mod wire;

pub use transport::{LocalFabric, Transport};

use serde::{Deserialize, Serialize};

/// The full set of wire tags, carried as a flat enum the way the original
/// implementation's `MsgType` (`env/comm_def.h`) enumerates them: ACK/NACK,
/// instructions, system metadata, per-geometry batches, APRIL, query
/// variants, and dataset lifecycle, all in one total, matchable taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Tag {
    #[default]
    Ack,
    Nack,

    InstrFin,
    InstrBatchFinished,
    InstrQueryDjFin,

    SysInfo,

    SinglePoint,
    SingleLineString,
    SinglePolygon,
    BatchPoint,
    BatchLineString,
    BatchPolygon,

    AprilCreate,

    QueryInit,
    Query,
    QueryResult,
    QueryBatchRange,
    QueryBatchKnn,
    QueryBatchResult,
    QueryDjInit,
    QueryDjCount,
    QueryDjBatch,
    QueryDjRequestInit,

    LoadDataset,
    UnloadDataset,
    LoadApril,
    UnloadApril,
    DatasetIndex,
    PrepareDataset,
    PartitionDataset,
    GlobalDataspace,
    DatasetMetadata,
    BuildIndex,

    Err,
}

/// Logical address of one endpoint in the cluster topology (§2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Peer {
    /// The external driver, reachable only from the host.
    Driver,
    /// The host controller, rank 0 of the inter-controller channel.
    Host,
    /// A worker controller, identified by its rank (1..world_size).
    Worker(u32),
    /// The agent belonging to the controller at the given rank (0 = host's agent).
    Agent(u32),
}

/// One message traveling the fabric: a tag, a sender/recipient pair, and an
/// opaque payload the recipient deserializes according to the tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: Tag,
    pub from: Peer,
    pub to: Peer,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(tag: Tag, from: Peer, to: Peer, payload: Vec<u8>) -> Self {
        Self {
            tag,
            from,
            to,
            payload,
        }
    }
}
