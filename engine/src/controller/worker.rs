// Licensed under the MIT License.

//! The worker controller's event loop (§4.6): blocks on its inbox, dispatches
//! each message to its [`Agent`], and replies with an `Ack`/`Nack` or the
//! message the dispatch produces. Query evaluation reuses
//! [`crate::query::evaluate_local`]; a distance join additionally drives the
//! border-batch exchange relayed through the host (see module docs on
//! [`ControllerMessage::DjBatch`]).

use std::collections::HashMap;

use crate::controller::agent::Agent;
use crate::controller::{BusyPhase, ControllerMessage, ControllerState};
use crate::fabric::{Envelope, Peer, Tag, Transport};
use crate::filter::distance_join;
use crate::index::IndexEntry;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::query::result::QResultBase;
use crate::query::{evaluate_local, Query, QueryId};
use crate::{ErrorKind, Result};

/// State held for a distance join between receiving its local `Query` and
/// reporting its second (cross-node) partial result.
struct PendingDistanceJoin {
    right_dataset_id: i64,
    distance: f64,
    cross_pairs: Option<QResultBase>,
}

pub struct Worker {
    pub rank: u32,
    pub world_size: u32,
    pub state: ControllerState,
    pub agent: Agent,
    dataspace: Option<Dataspace>,
    partitioning_method: Option<PartitioningMethod>,
    current_dataset: Option<i64>,
    pending_dj: HashMap<QueryId, PendingDistanceJoin>,
}

impl Worker {
    pub fn new(rank: u32, world_size: u32) -> Self {
        Self {
            rank,
            world_size,
            state: ControllerState::Idle,
            agent: Agent::new(rank),
            dataspace: None,
            partitioning_method: None,
            current_dataset: None,
            pending_dj: HashMap::new(),
        }
    }

    /// Runs the blocking event loop until an `InstrFin` is received.
    pub fn run(&mut self, transport: &dyn Transport) -> Result<()> {
        self.state = ControllerState::Initializing;
        loop {
            let envelope = transport.recv(Peer::Worker(self.rank))?;
            match self.dispatch(transport, envelope) {
                Ok(true) => break,
                Ok(false) => {}
                Err(err) => self.send(
                    transport,
                    Peer::Host,
                    Tag::Nack,
                    &ControllerMessage::Nack { message: err.to_string() },
                )?,
            }
        }
        self.state = ControllerState::Terminating;
        Ok(())
    }

    /// Handles one envelope. Returns `Ok(true)` once `InstrFin` has been seen.
    fn dispatch(&mut self, transport: &dyn Transport, envelope: Envelope) -> Result<bool> {
        match envelope.tag {
            Tag::GlobalDataspace => {
                let mbr = crate::fabric::wire::unpack_mbr(&envelope.payload)?;
                self.dataspace = Some(Dataspace { mbr });
                self.ack(transport)?;
                Ok(false)
            }
            Tag::BatchPoint | Tag::BatchLineString | Tag::BatchPolygon => {
                self.state = ControllerState::Busy(BusyPhase::Loading);
                let shapes = crate::fabric::wire::unpack_shapes(&envelope.payload)?;
                let sentinel = shapes.is_empty();
                let dataset_id = self
                    .current_dataset
                    .ok_or_else(|| ErrorKind::Communication.with_message("batch received with no dataset prepared"))?;
                for shape in shapes {
                    self.agent.load_shape(dataset_id, shape)?;
                }
                if sentinel {
                    self.ack(transport)?;
                    self.state = ControllerState::Ready;
                }
                Ok(false)
            }
            _ => {
                let message: ControllerMessage = serde_json::from_slice(&envelope.payload)
                    .map_err(|e| ErrorKind::Serialization.with_source(e))?;
                self.handle_message(transport, message)
            }
        }
    }

    fn handle_message(&mut self, transport: &dyn Transport, message: ControllerMessage) -> Result<bool> {
        match message {
            ControllerMessage::PrepareDataset {
                internal_id,
                data_type,
                file_path,
                persist,
            } => {
                self.state = ControllerState::Busy(BusyPhase::Loading);
                self.agent.prepare_dataset(internal_id, data_type, file_path, persist);
                self.current_dataset = Some(internal_id);
                self.ack(transport)?;
            }
            ControllerMessage::UnloadDataset { internal_id } => {
                self.agent.unload_dataset(internal_id);
                if self.current_dataset == Some(internal_id) {
                    self.current_dataset = None;
                }
                self.ack(transport)?;
            }
            ControllerMessage::PartitionDataset { method, world_size } => {
                self.state = ControllerState::Busy(BusyPhase::Partitioning);
                let dataspace = self
                    .dataspace
                    .ok_or_else(|| ErrorKind::Partitioning.with_message("dataspace not yet broadcast"))?;
                self.partitioning_method = Some(method);
                self.agent.partition_and_index_all(&method, dataspace, world_size)?;
                self.state = ControllerState::Busy(BusyPhase::Indexing);
                self.ack(transport)?;
                self.state = ControllerState::Ready;
            }
            ControllerMessage::BuildIndex => {
                // Both indexes are already sealed as part of `partition_and_index_all`;
                // this message only keeps the protocol's two-step shape intact.
                self.ack(transport)?;
            }
            ControllerMessage::Query(query) => {
                self.evaluate(transport, query)?;
            }
            ControllerMessage::DjBatch { query_id, entries, .. } => {
                self.receive_dj_batch(query_id, entries)?;
            }
            ControllerMessage::DjFin { query_id } => {
                self.finish_distance_join(transport, query_id)?;
            }
            ControllerMessage::InstrFin => return Ok(true),
            other => {
                return Err(ErrorKind::Communication.with_message(format!("unexpected message for a worker: {other:?}")))
            }
        }
        Ok(false)
    }

    fn evaluate(&mut self, transport: &dyn Transport, query: Query) -> Result<()> {
        self.state = ControllerState::Busy(BusyPhase::Evaluating);
        let method = self
            .partitioning_method
            .ok_or_else(|| ErrorKind::Partitioning.with_message("partitioning method not yet set"))?;
        let dataspace = self
            .dataspace
            .ok_or_else(|| ErrorKind::Partitioning.with_message("dataspace not yet broadcast"))?;

        if let Query::DistanceJoin {
            id,
            left_dataset_id,
            right_dataset_id,
            distance,
            ..
        } = query
        {
            let local = evaluate_local(&self.agent, &query, &method, &dataspace)?;
            self.report_result(transport, id, local)?;
            self.start_border_exchange(transport, id, left_dataset_id, right_dataset_id, distance, &method, &dataspace)?;
            return Ok(());
        }

        let result = evaluate_local(&self.agent, &query, &method, &dataspace)?;
        self.report_result(transport, query.id(), result)?;
        self.state = ControllerState::Ready;
        Ok(())
    }

    /// Computes this worker's border objects for `left` and forwards one
    /// batch per peer rank to the host, which consolidates and relays them to
    /// their final destination (§4.6 `DistanceJoinPhase::{ReportBorderSizes,
    /// ExchangeBatches}`, simplified to a host-mediated relay rather than a
    /// direct worker-to-worker exchange).
    fn start_border_exchange(
        &mut self,
        transport: &dyn Transport,
        query_id: QueryId,
        left_dataset_id: i64,
        right_dataset_id: i64,
        distance: f64,
        method: &PartitioningMethod,
        dataspace: &Dataspace,
    ) -> Result<()> {
        self.pending_dj.insert(
            query_id,
            PendingDistanceJoin {
                right_dataset_id,
                distance,
                cross_pairs: None,
            },
        );

        let borders = distance_join::border_objects(
            self.agent.dataset(left_dataset_id)?.uniform_grid_index(),
            method,
            dataspace,
            self.world_size,
            self.rank,
            distance,
        )?;

        for dest_rank in (0..self.world_size).filter(|&r| r != self.rank) {
            let entries = borders.get(&dest_rank).cloned().unwrap_or_default();
            let payload = ControllerMessage::DjBatch {
                query_id,
                dest_rank,
                entries: entries.iter().map(|e| (e.rec_id, e.mbr)).collect(),
            };
            self.send(transport, Peer::Host, Tag::QueryDjBatch, &payload)?;
        }
        self.send(transport, Peer::Host, Tag::QueryDjCount, &ControllerMessage::DjFin { query_id })
    }

    /// Receives the host's consolidated batch of foreign border entries
    /// destined for this worker and computes the cross-node pairs against its
    /// own local right-hand dataset (§4.6 `FinishOnInstruction`).
    fn receive_dj_batch(&mut self, query_id: QueryId, entries: Vec<(crate::shape::RecId, crate::shape::Mbr)>) -> Result<()> {
        let pending = self
            .pending_dj
            .get(&query_id)
            .ok_or_else(|| ErrorKind::Communication.with_message("DjBatch for a query this worker did not start"))?;
        let right = self.agent.dataset(pending.right_dataset_id)?;
        let right_entries: Vec<IndexEntry> = right
            .uniform_grid_index()
            .cells_in_order()
            .flat_map(|(_, entries)| entries.iter().copied())
            .collect();
        let foreign: Vec<IndexEntry> = entries.into_iter().map(|(rec_id, mbr)| IndexEntry { rec_id, mbr }).collect();

        let mut result = QResultBase::empty_id_pair_set();
        for (l, r) in distance_join::join_within_distance(&foreign, &right_entries, pending.distance) {
            result.add_pair(l, r)?;
        }
        self.pending_dj.get_mut(&query_id).expect("checked above").cross_pairs = Some(result);
        Ok(())
    }

    fn finish_distance_join(&mut self, transport: &dyn Transport, query_id: QueryId) -> Result<()> {
        let pending = self
            .pending_dj
            .remove(&query_id)
            .ok_or_else(|| ErrorKind::Communication.with_message("DjFin for a query this worker did not start"))?;
        let result = pending.cross_pairs.unwrap_or_else(QResultBase::empty_id_pair_set);
        self.report_result(transport, query_id, result)?;
        self.state = ControllerState::Ready;
        Ok(())
    }

    fn report_result(&self, transport: &dyn Transport, query_id: QueryId, result: QResultBase) -> Result<()> {
        self.send(
            transport,
            Peer::Host,
            Tag::QueryResult,
            &ControllerMessage::QueryResult { query_id, result },
        )
    }

    fn ack(&self, transport: &dyn Transport) -> Result<()> {
        self.send(transport, Peer::Host, Tag::Ack, &ControllerMessage::Ack)
    }

    fn send(&self, transport: &dyn Transport, to: Peer, tag: Tag, message: &ControllerMessage) -> Result<()> {
        let payload = serde_json::to_vec(message).map_err(|e| ErrorKind::Serialization.with_source(e))?;
        transport.send(Envelope::new(tag, Peer::Worker(self.rank), to, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataType;
    use crate::fabric::LocalFabric;
    use crate::shape::{Geometry, Mbr, Shape};

    fn wired(world_size: u32) -> (LocalFabric, Worker) {
        let fabric = LocalFabric::new();
        fabric.register(Peer::Host);
        fabric.register(Peer::Worker(1));
        let worker = Worker::new(1, world_size);
        (fabric, worker)
    }

    #[test]
    fn global_dataspace_then_prepare_then_batch_acks_each_step() {
        let (fabric, mut worker) = wired(1);
        worker.dispatch(&fabric, Envelope::new(
            Tag::GlobalDataspace,
            Peer::Host,
            Peer::Worker(1),
            crate::fabric::wire::pack_mbr(&Mbr::new(0.0, 0.0, 10.0, 10.0)),
        )).unwrap();
        assert!(matches!(fabric.recv(Peer::Host).unwrap().tag, Tag::Ack));

        let prepare = ControllerMessage::PrepareDataset {
            internal_id: 1,
            data_type: DataType::Point,
            file_path: "points.csv".into(),
            persist: false,
        };
        let payload = serde_json::to_vec(&prepare).unwrap();
        worker.dispatch(&fabric, Envelope::new(Tag::PrepareDataset, Peer::Host, Peer::Worker(1), payload)).unwrap();
        assert!(matches!(fabric.recv(Peer::Host).unwrap().tag, Tag::Ack));
        assert!(worker.agent.has_dataset(1));

        let shapes = vec![Shape::new(1, Geometry::Point { x: 1.0, y: 1.0 })];
        let batch_payload = crate::fabric::wire::pack_shapes(&shapes);
        worker.dispatch(&fabric, Envelope::new(Tag::BatchPoint, Peer::Host, Peer::Worker(1), batch_payload)).unwrap();
        // mid-stream batches do not ack; only the sentinel does.
        assert!(fabric.try_recv(Peer::Host).unwrap().is_none());

        let sentinel_payload = crate::fabric::wire::pack_shapes(&[]);
        worker.dispatch(&fabric, Envelope::new(Tag::BatchPoint, Peer::Host, Peer::Worker(1), sentinel_payload)).unwrap();
        assert!(matches!(fabric.recv(Peer::Host).unwrap().tag, Tag::Ack));
        assert_eq!(worker.agent.dataset(1).unwrap().len(), 1);
    }

    #[test]
    fn instr_fin_ends_the_dispatch_loop() {
        let (fabric, mut worker) = wired(1);
        let payload = serde_json::to_vec(&ControllerMessage::InstrFin).unwrap();
        let finished = worker
            .dispatch(&fabric, Envelope::new(Tag::InstrFin, Peer::Host, Peer::Worker(1), payload))
            .unwrap();
        assert!(finished);
    }
}
