//! Query result containers (§4.5): one variant per query shape, each with
//! its own accumulation and merge rule. A result travels the fabric as JSON
//! (unlike [`crate::fabric::wire`]'s hand-packed `Shape`/`DatasetMetadata`,
//! a result has no fixed byte layout mandated by the spec, so it uses the
//! same `serde_json` the rest of the query layer does).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::filter::knn::{BoundedNeighbors, Neighbor};
use crate::query::JoinRelation;
use crate::shape::RecId;
use crate::{ErrorKind, Result};

/// Discriminates which [`QResultBase`] variant a query produces, without
/// needing to construct one — used by the controller to pick the right
/// empty accumulator before any partial results have arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Range,
    Join,
    DistanceJoin,
    Knn,
}

/// The result of one query, accumulated incrementally as partitions finish
/// and merged across nodes once every partial result is gathered (§4.5).
///
/// Every variant's merge is commutative and associative, so partial results
/// may arrive and be folded in any order — a requirement for the host's
/// gather loop, which makes no guarantee about which worker responds first.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum QResultBase {
    /// A range query's result: the set of matching record ids. Merge is set
    /// union, so a duplicate hit reported by two overlapping partitions
    /// collapses rather than double-counts.
    IdSet { ids: HashSet<RecId> },
    /// A plain intersection join's result: the set of matching record-id
    /// pairs.
    IdPairSet { pairs: HashSet<(RecId, RecId)> },
    /// A topology join's result: counts per [`JoinRelation`], merge is
    /// elementwise sum.
    TopologyHistogram { counts: HashMap<JoinRelation, u64> },
    /// A kNN query's result: the bounded nearest-neighbor heap, merge keeps
    /// the closest `k` of the union (§4.5, mirrors
    /// [`BoundedNeighbors::merge`]).
    KnnHeap { heap: BoundedNeighbors },
}

impl QResultBase {
    pub fn empty_id_set() -> Self {
        QResultBase::IdSet { ids: HashSet::new() }
    }

    pub fn empty_id_pair_set() -> Self {
        QResultBase::IdPairSet { pairs: HashSet::new() }
    }

    pub fn empty_topology_histogram() -> Self {
        let mut counts = HashMap::new();
        for relation in [JoinRelation::Equal, JoinRelation::Contains, JoinRelation::Inside, JoinRelation::Overlap] {
            counts.insert(relation, 0);
        }
        QResultBase::TopologyHistogram { counts }
    }

    pub fn empty_knn_heap(k: usize) -> Self {
        QResultBase::KnnHeap { heap: BoundedNeighbors::new(k) }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            QResultBase::IdSet { .. } => QueryKind::Range,
            QResultBase::IdPairSet { .. } => QueryKind::Join,
            QResultBase::TopologyHistogram { .. } => QueryKind::Join,
            QResultBase::KnnHeap { .. } => QueryKind::Knn,
        }
    }

    pub fn add_id(&mut self, rec_id: RecId) -> Result<()> {
        match self {
            QResultBase::IdSet { ids } => {
                ids.insert(rec_id);
                Ok(())
            }
            _ => Err(ErrorKind::Query.with_message("add_id called on a non-IdSet result")),
        }
    }

    pub fn add_pair(&mut self, left: RecId, right: RecId) -> Result<()> {
        match self {
            QResultBase::IdPairSet { pairs } => {
                pairs.insert((left, right));
                Ok(())
            }
            _ => Err(ErrorKind::Query.with_message("add_pair called on a non-IdPairSet result")),
        }
    }

    pub fn add_relation(&mut self, relation: JoinRelation) -> Result<()> {
        match self {
            QResultBase::TopologyHistogram { counts } => {
                *counts.entry(relation).or_insert(0) += 1;
                Ok(())
            }
            _ => Err(ErrorKind::Query.with_message("add_relation called on a non-TopologyHistogram result")),
        }
    }

    pub fn offer_neighbor(&mut self, neighbor: Neighbor) -> Result<()> {
        match self {
            QResultBase::KnnHeap { heap } => {
                heap.offer(neighbor);
                Ok(())
            }
            _ => Err(ErrorKind::Query.with_message("offer_neighbor called on a non-KnnHeap result")),
        }
    }

    /// Merges `other` into `self` in place. Both sides must be the same
    /// variant — mismatched variants are a `Query` error, never a silent
    /// partial merge.
    pub fn merge(&mut self, other: QResultBase) -> Result<()> {
        match (self, other) {
            (QResultBase::IdSet { ids }, QResultBase::IdSet { ids: other_ids }) => {
                ids.extend(other_ids);
                Ok(())
            }
            (QResultBase::IdPairSet { pairs }, QResultBase::IdPairSet { pairs: other_pairs }) => {
                pairs.extend(other_pairs);
                Ok(())
            }
            (QResultBase::TopologyHistogram { counts }, QResultBase::TopologyHistogram { counts: other_counts }) => {
                for (relation, count) in other_counts {
                    *counts.entry(relation).or_insert(0) += count;
                }
                Ok(())
            }
            (QResultBase::KnnHeap { heap }, QResultBase::KnnHeap { heap: other_heap }) => {
                heap.merge(other_heap);
                Ok(())
            }
            _ => Err(ErrorKind::Query.with_message("cannot merge mismatched result variants")),
        }
    }

    pub fn result_count(&self) -> usize {
        match self {
            QResultBase::IdSet { ids } => ids.len(),
            QResultBase::IdPairSet { pairs } => pairs.len(),
            QResultBase::TopologyHistogram { counts } => counts.values().sum::<u64>() as usize,
            QResultBase::KnnHeap { heap } => heap.len(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| ErrorKind::Serialization.with_source(err))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| ErrorKind::Serialization.with_source(err))
    }
}

impl Serialize for BoundedNeighbors {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct Wire {
            k: usize,
            neighbors: Vec<Neighbor>,
        }
        Wire {
            k: self.k(),
            neighbors: self.clone().into_sorted_vec(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BoundedNeighbors {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            k: usize,
            neighbors: Vec<Neighbor>,
        }
        let wire = Wire::deserialize(deserializer)?;
        let mut heap = BoundedNeighbors::new(wire.k);
        for neighbor in wire.neighbors {
            heap.offer(neighbor);
        }
        Ok(heap)
    }
}

impl Serialize for Neighbor {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Neighbor", 2)?;
        state.serialize_field("rec_id", &self.rec_id)?;
        state.serialize_field("distance", &self.distance)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Neighbor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            rec_id: RecId,
            distance: f64,
        }
        let wire = Wire::deserialize(deserializer)?;
        Ok(Neighbor { rec_id: wire.rec_id, distance: wire.distance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_set_merge_is_a_union() {
        let mut a = QResultBase::empty_id_set();
        a.add_id(1).unwrap();
        let mut b = QResultBase::empty_id_set();
        b.add_id(1).unwrap();
        b.add_id(2).unwrap();

        a.merge(b).unwrap();
        assert_eq!(a.result_count(), 2);
    }

    #[test]
    fn topology_histogram_merge_sums_counts() {
        let mut a = QResultBase::empty_topology_histogram();
        a.add_relation(JoinRelation::Overlap).unwrap();
        let mut b = QResultBase::empty_topology_histogram();
        b.add_relation(JoinRelation::Overlap).unwrap();
        b.add_relation(JoinRelation::Equal).unwrap();

        a.merge(b).unwrap();
        assert_eq!(a.result_count(), 3);
    }

    #[test]
    fn merging_mismatched_variants_is_a_query_error() {
        let mut a = QResultBase::empty_id_set();
        let b = QResultBase::empty_id_pair_set();
        let err = a.merge(b).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Query);
    }

    #[test]
    fn knn_heap_round_trips_through_json() {
        let mut result = QResultBase::empty_knn_heap(2);
        result.offer_neighbor(Neighbor { rec_id: 1, distance: 0.5 }).unwrap();
        result.offer_neighbor(Neighbor { rec_id: 2, distance: 1.5 }).unwrap();

        let bytes = result.serialize().unwrap();
        let restored = QResultBase::deserialize(&bytes).unwrap();
        assert_eq!(restored.result_count(), 2);
    }

    #[test]
    fn id_pair_set_serializes_and_deserializes() {
        let mut result = QResultBase::empty_id_pair_set();
        result.add_pair(1, 2).unwrap();
        let bytes = result.serialize().unwrap();
        let restored = QResultBase::deserialize(&bytes).unwrap();
        assert_eq!(restored.result_count(), 1);
    }
}
