// Licensed under the MIT License.

//! The host controller (§4.6): rank 0 of the inter-controller channel, the
//! only controller the driver talks to. It broadcasts configuration and
//! dataset lifecycle instructions, routes shape batches to their owning
//! rank via [`crate::partitioning::router::BatchRouter`], evaluates its own
//! agent's share of every query, and gathers/merges the workers' partials.
//!
//! A distance join additionally relays each worker's border-object batches
//! to their destination rank rather than having workers address each other
//! directly (§4.6 notes the host and workers "share a communicator"; here
//! the host plays postmaster for that exchange rather than opening a
//! second, fully peer-to-peer channel).

use std::collections::HashMap;

use crate::config::ClusterConfig;
use crate::controller::agent::Agent;
use crate::controller::{BusyPhase, ControllerMessage, ControllerState};
use crate::dataset::DataType;
use crate::fabric::wire;
use crate::fabric::{Envelope, Peer, Tag, Transport};
use crate::partitioning::router::{Batch, BatchRouter};
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::query::result::QResultBase;
use crate::query::{evaluate_local, Query, QueryId};
use crate::shape::Shape;
use crate::{ErrorKind, Result};

/// The batch tag a dataset's data type is routed under. `DataType::Box` has
/// no dedicated wire tag (§4.2's batch tags are geometry-shaped, and a box
/// is just an axis-aligned rectangle), so it rides with `BatchPolygon`.
fn batch_tag(data_type: DataType) -> Tag {
    match data_type {
        DataType::Point => Tag::BatchPoint,
        DataType::LineString => Tag::BatchLineString,
        DataType::Polygon | DataType::Box => Tag::BatchPolygon,
    }
}

pub struct Host {
    pub world_size: u32,
    pub state: ControllerState,
    pub agent: Agent,
    config: Option<ClusterConfig>,
    dataspace: Option<Dataspace>,
}

impl Host {
    pub fn new(world_size: u32) -> Self {
        Self {
            world_size,
            state: ControllerState::Idle,
            agent: Agent::new(0),
            config: None,
            dataspace: None,
        }
    }

    /// `init`: brings the cluster up. Peer registration itself is a fabric
    /// concern handled by whoever assembles the `LocalFabric` (the driver);
    /// this only advances the host's own state.
    pub fn init(&mut self) {
        self.state = ControllerState::Initializing;
    }

    /// Loads and validates the cluster configuration, then moves to `Ready`
    /// (§4.6: "Ready" is reached once configuration is known). Configuration
    /// is not broadcast over the wire — every node loads the same file
    /// independently, the way the original cluster's nodefile is shared.
    pub fn configure(&mut self, path: &str) -> Result<()> {
        let config = ClusterConfig::load(path, self.world_size)?;
        self.config = Some(config);
        self.state = ControllerState::Ready;
        Ok(())
    }

    fn method(&self) -> Result<PartitioningMethod> {
        Ok(self
            .config
            .as_ref()
            .ok_or_else(|| ErrorKind::Configuration.with_message("cluster not configured"))?
            .partitioning
            .method)
    }

    /// `prepareDataset`: registers the dataset on every node, computes the
    /// process-wide dataspace from `shapes`, broadcasts it, routes every
    /// shape to its owning rank, then partitions and seals both indexes on
    /// every node (§3, §4.1, §4.6 `Busy::{Loading, Partitioning, Indexing}`).
    pub fn prepare_dataset(
        &mut self,
        transport: &dyn Transport,
        internal_id: i64,
        data_type: DataType,
        file_path: &str,
        persist: bool,
        shapes: Vec<Shape>,
    ) -> Result<()> {
        self.state = ControllerState::Busy(BusyPhase::Loading);
        let method = self.method()?;

        self.broadcast(transport, Tag::PrepareDataset, &ControllerMessage::PrepareDataset {
            internal_id,
            data_type,
            file_path: file_path.to_string(),
            persist,
        })?;
        self.agent.prepare_dataset(internal_id, data_type, file_path, persist);
        self.await_acks(transport)?;

        // The dataspace is process-wide (§3): established once, from the first
        // dataset prepared, and reused for every dataset after it so every
        // node's grid lines up regardless of which dataset a query touches.
        let dataspace = match self.dataspace {
            Some(existing) => existing,
            None => {
                let union = shapes
                    .iter()
                    .map(|s| s.mbr)
                    .reduce(|a, b| a.union(&b))
                    .ok_or_else(|| ErrorKind::Partitioning.with_message("cannot prepare an empty dataset"))?;
                let dataspace = Dataspace::from_union(union);
                self.dataspace = Some(dataspace);
                transport.broadcast(Peer::Host, Tag::GlobalDataspace, self.world_size, &wire::pack_mbr(&dataspace.mbr))?;
                self.await_acks(transport)?;
                dataspace
            }
        };

        let tag = batch_tag(data_type);
        let mut router = BatchRouter::new(&method, dataspace, self.world_size, 256, tag);
        let mut sealed = Vec::new();
        for shape in shapes {
            sealed.extend(router.route(shape)?);
        }
        sealed.extend(router.flush());
        for batch in sealed {
            self.deliver_batch(transport, internal_id, batch)?;
        }
        self.await_acks(transport)?;

        self.state = ControllerState::Busy(BusyPhase::Partitioning);
        self.broadcast(transport, Tag::PartitionDataset, &ControllerMessage::PartitionDataset {
            method,
            world_size: self.world_size,
        })?;
        self.agent.partition_and_index_all(&method, dataspace, self.world_size)?;
        self.await_acks(transport)?;

        self.state = ControllerState::Busy(BusyPhase::Indexing);
        self.broadcast(transport, Tag::BuildIndex, &ControllerMessage::BuildIndex)?;
        self.await_acks(transport)?;

        self.state = ControllerState::Ready;
        Ok(())
    }

    /// Delivers one routed batch: loaded directly into the host's own agent
    /// if it is bound for rank 0, sent over the wire otherwise.
    fn deliver_batch(&mut self, transport: &dyn Transport, internal_id: i64, batch: Batch) -> Result<()> {
        if batch.dest_rank == 0 {
            for shape in batch.shapes {
                self.agent.load_shape(internal_id, shape)?;
            }
            return Ok(());
        }
        let payload = wire::pack_shapes(&batch.shapes);
        transport.send(Envelope::new(batch.tag, Peer::Host, Peer::Worker(batch.dest_rank), payload))
    }

    /// `execute`: broadcasts the query, evaluates the host's own share, and
    /// gathers/merges every worker's partial (§4.6).
    pub fn execute_query(&mut self, transport: &dyn Transport, query: Query) -> Result<QResultBase> {
        self.state = ControllerState::Busy(BusyPhase::Evaluating);
        let method = self.method()?;
        let dataspace = self
            .dataspace
            .ok_or_else(|| ErrorKind::Partitioning.with_message("dataspace not yet established"))?;

        self.broadcast(transport, Tag::Query, &ControllerMessage::Query(query.clone()))?;
        let mut result = evaluate_local(&self.agent, &query, &method, &dataspace)?;

        if let Query::DistanceJoin {
            left_dataset_id,
            right_dataset_id,
            distance,
            ..
        } = query
        {
            self.gather_distance_join(transport, query.id(), left_dataset_id, right_dataset_id, distance, &method, &dataspace, &mut result)?;
        } else {
            for _ in 1..self.world_size {
                let partial = self.recv_result(transport, query.id())?;
                result.merge(partial)?;
            }
        }

        self.state = ControllerState::Ready;
        Ok(result)
    }

    /// Collects every worker's local partial, then every worker's per-peer
    /// border batch (plus the host's own, computed directly against its own
    /// agent), consolidates batches by destination, relays them, and finally
    /// collects each worker's cross-node partial — computing the host's own
    /// rank-0 share of that cross-check synchronously rather than over the
    /// wire (§4.6 `DistanceJoinPhase::{ReportBorderSizes, ExchangeBatches,
    /// FinishOnInstruction, ReportResult}`).
    #[allow(clippy::too_many_arguments)]
    fn gather_distance_join(
        &mut self,
        transport: &dyn Transport,
        query_id: QueryId,
        left_dataset_id: i64,
        right_dataset_id: i64,
        distance: f64,
        method: &PartitioningMethod,
        dataspace: &Dataspace,
        result: &mut QResultBase,
    ) -> Result<()> {
        use crate::filter::distance_join;
        use crate::index::IndexEntry;

        let mut by_dest: HashMap<u32, Vec<(crate::shape::RecId, crate::shape::Mbr)>> = HashMap::new();
        let expected_senders = self.world_size - 1;
        let expected_batches = expected_senders * (self.world_size - 1);
        let mut senders_done = 0u32;
        let mut batches_seen = 0u32;
        let mut partials_seen = 0u32;

        // the host's own rank-0 border contribution, computed synchronously
        let own_borders = distance_join::border_objects(
            self.agent.dataset(left_dataset_id)?.uniform_grid_index(),
            method,
            dataspace,
            self.world_size,
            0,
            distance,
        )?;
        for (dest_rank, entries) in own_borders {
            by_dest
                .entry(dest_rank)
                .or_default()
                .extend(entries.iter().map(|e| (e.rec_id, e.mbr)));
        }

        while partials_seen < expected_senders || senders_done < expected_senders || batches_seen < expected_batches {
            let envelope = transport.recv(Peer::Host)?;
            match envelope.tag {
                Tag::QueryResult => {
                    let message: ControllerMessage = serde_json::from_slice(&envelope.payload)
                        .map_err(|e| ErrorKind::Serialization.with_source(e))?;
                    if let ControllerMessage::QueryResult { query_id: id, result: partial } = message {
                        if id != query_id {
                            return Err(ErrorKind::Communication.with_message("result for an unexpected query id"));
                        }
                        result.merge(partial)?;
                        partials_seen += 1;
                    }
                }
                Tag::QueryDjBatch => {
                    let message: ControllerMessage = serde_json::from_slice(&envelope.payload)
                        .map_err(|e| ErrorKind::Serialization.with_source(e))?;
                    if let ControllerMessage::DjBatch { dest_rank, entries, .. } = message {
                        by_dest.entry(dest_rank).or_default().extend(entries);
                        batches_seen += 1;
                    }
                }
                Tag::QueryDjCount => {
                    senders_done += 1;
                }
                other => return Err(ErrorKind::Communication.with_message(format!("unexpected tag while gathering: {other:?}"))),
            }
        }

        let own_batch = by_dest.remove(&0).unwrap_or_default();
        for (dest_rank, entries) in by_dest {
            let payload = ControllerMessage::DjBatch { query_id, dest_rank, entries };
            self.send(transport, Peer::Worker(dest_rank), Tag::QueryDjBatch, &payload)?;
        }
        self.broadcast(transport, Tag::QueryDjCount, &ControllerMessage::DjFin { query_id })?;

        let right_entries: Vec<IndexEntry> = self
            .agent
            .dataset(right_dataset_id)?
            .uniform_grid_index()
            .cells_in_order()
            .flat_map(|(_, entries)| entries.iter().copied())
            .collect();
        let foreign: Vec<IndexEntry> = own_batch.into_iter().map(|(rec_id, mbr)| IndexEntry { rec_id, mbr }).collect();
        for (l, r) in distance_join::join_within_distance(&foreign, &right_entries, distance) {
            result.add_pair(l, r)?;
        }

        for _ in 1..self.world_size {
            let partial = self.recv_result(transport, query_id)?;
            result.merge(partial)?;
        }
        Ok(())
    }

    fn recv_result(&self, transport: &dyn Transport, query_id: QueryId) -> Result<QResultBase> {
        loop {
            let envelope = transport.recv(Peer::Host)?;
            match envelope.tag {
                Tag::QueryResult => {
                    let message: ControllerMessage = serde_json::from_slice(&envelope.payload)
                        .map_err(|e| ErrorKind::Serialization.with_source(e))?;
                    if let ControllerMessage::QueryResult { query_id: id, result } = message {
                        if id == query_id {
                            return Ok(result);
                        }
                    }
                }
                Tag::Nack => {
                    let message: ControllerMessage = serde_json::from_slice(&envelope.payload)
                        .map_err(|e| ErrorKind::Serialization.with_source(e))?;
                    if let ControllerMessage::Nack { message } = message {
                        return Err(ErrorKind::Communication.with_message(message));
                    }
                }
                _ => continue,
            }
        }
    }

    /// `terminate`: releases every node's resources and ends their event loops.
    pub fn terminate(&mut self, transport: &dyn Transport) -> Result<()> {
        self.state = ControllerState::Terminating;
        self.broadcast(transport, Tag::InstrFin, &ControllerMessage::InstrFin)
    }

    fn broadcast(&self, transport: &dyn Transport, tag: Tag, message: &ControllerMessage) -> Result<()> {
        let payload = serde_json::to_vec(message).map_err(|e| ErrorKind::Serialization.with_source(e))?;
        transport.broadcast(Peer::Host, tag, self.world_size, &payload)
    }

    fn send(&self, transport: &dyn Transport, to: Peer, tag: Tag, message: &ControllerMessage) -> Result<()> {
        let payload = serde_json::to_vec(message).map_err(|e| ErrorKind::Serialization.with_source(e))?;
        transport.send(Envelope::new(tag, Peer::Host, to, payload))
    }

    /// Waits for one `Ack` from every worker and from the host's own agent
    /// peer, where applicable (the host's own agent calls are synchronous
    /// and need no wire round trip, so only `world_size - 1` acks are awaited).
    fn await_acks(&self, transport: &dyn Transport) -> Result<()> {
        for _ in 1..self.world_size {
            let envelope = transport.recv(Peer::Host)?;
            match envelope.tag {
                Tag::Ack => {}
                Tag::Nack => {
                    let message: ControllerMessage = serde_json::from_slice(&envelope.payload)
                        .map_err(|e| ErrorKind::Serialization.with_source(e))?;
                    if let ControllerMessage::Nack { message } = message {
                        return Err(ErrorKind::Communication.with_message(message));
                    }
                }
                other => return Err(ErrorKind::Communication.with_message(format!("expected Ack/Nack, got {other:?}"))),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::worker::Worker;
    use crate::fabric::LocalFabric;
    use crate::query::{JoinRelation, Query};
    use crate::shape::Geometry;
    use std::io::Write;
    use std::sync::Arc;

    fn two_node_cluster() -> (Arc<LocalFabric>, Host, std::thread::JoinHandle<()>) {
        let fabric = Arc::new(LocalFabric::new());
        for peer in [Peer::Host, Peer::Worker(1), Peer::Agent(0), Peer::Agent(1)] {
            fabric.register(peer);
        }

        let worker_fabric = Arc::clone(&fabric);
        let handle = std::thread::spawn(move || {
            let mut worker = Worker::new(1, 2);
            worker.run(worker_fabric.as_ref()).unwrap();
        });

        let mut config_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            config_file,
            "[Environment]\ntype=LOCAL\nnodeCount=2\n\n[Partitioning]\npath=/tmp/data\nbatchSize=256\ntype=RR\nppdNum=4\nassignmentFunc=ST\n"
        )
        .unwrap();

        let mut host = Host::new(2);
        host.init();
        host.configure(config_file.path().to_str().unwrap()).unwrap();

        (fabric, host, handle)
    }

    #[test]
    fn prepare_and_range_query_spans_both_nodes() {
        let (fabric, mut host, handle) = two_node_cluster();

        let points = vec![
            Shape::new(1, Geometry::Point { x: 1.0, y: 1.0 }),
            Shape::new(2, Geometry::Point { x: 99.0, y: 99.0 }),
            Shape::new(3, Geometry::Point { x: 50.0, y: 50.0 }),
        ];
        host.prepare_dataset(fabric.as_ref(), 1, DataType::Point, "points.csv", false, points)
            .unwrap();

        let result = host
            .execute_query(
                fabric.as_ref(),
                Query::Range {
                    id: 1,
                    dataset_id: 1,
                    window: Geometry::Box { min: (0.0, 0.0), max: (100.0, 100.0) },
                },
            )
            .unwrap();
        assert_eq!(result.result_count(), 3);

        host.terminate(fabric.as_ref()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn distance_join_finds_cross_node_pairs() {
        let (fabric, mut host, handle) = two_node_cluster();

        // The dataspace is fixed from the first dataset prepared (§3), so a
        // throwaway calibration dataset establishes a grid wide enough that
        // `left`/`right` land on different coarse cells (and so different
        // ranks) instead of redefining the dataspace around their own,
        // much narrower extent.
        let calibration = vec![
            Shape::new(100, Geometry::Point { x: 0.0, y: 0.0 }),
            Shape::new(101, Geometry::Point { x: 100.0, y: 100.0 }),
        ];
        host.prepare_dataset(fabric.as_ref(), 99, DataType::Point, "calibration.csv", false, calibration)
            .unwrap();

        let left = vec![Shape::new(1, Geometry::Point { x: 24.0, y: 10.0 })];
        let right = vec![Shape::new(2, Geometry::Point { x: 26.0, y: 10.0 })];
        host.prepare_dataset(fabric.as_ref(), 1, DataType::Point, "left.csv", false, left)
            .unwrap();
        host.prepare_dataset(fabric.as_ref(), 2, DataType::Point, "right.csv", false, right)
            .unwrap();

        let result = host
            .execute_query(
                fabric.as_ref(),
                Query::DistanceJoin {
                    id: 1,
                    left_dataset_id: 1,
                    right_dataset_id: 2,
                    distance: 5.0,
                },
            )
            .unwrap();
        assert_eq!(result.result_count(), 1);

        host.terminate(fabric.as_ref()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn batch_tag_maps_box_onto_the_polygon_batch_tag() {
        assert_eq!(batch_tag(DataType::Box), Tag::BatchPolygon);
    }

    #[test]
    #[allow(unused)]
    fn join_relation_overlap_is_distinct_from_equal() {
        assert_ne!(JoinRelation::Overlap, JoinRelation::Equal);
    }
}
