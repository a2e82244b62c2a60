// Licensed under the MIT License.

//! Query definitions (§4.4/§4.5): the four polymorphic query shapes a client
//! can submit, and the result containers they produce (see [`result`]).

pub mod result;

use serde::{Deserialize, Serialize};

use crate::controller::agent::Agent;
use crate::filter::{distance_join, knn, range, sweep, MbrRelation};
use crate::index::IndexEntry;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::query::result::QResultBase;
use crate::shape::{Geometry, Mbr};
use crate::Result;

/// Stable identifier for one query submitted to the cluster, assigned by the
/// driver and carried unchanged through every message that concerns it.
pub type QueryId = u64;

/// A spatial relation predicate for [`Query::Join`], the subset of
/// [`crate::filter::MbrRelation`] a topology join actually reports on
/// (§4.5's `TopologyHistogram` keys).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinRelation {
    Equal,
    Contains,
    Inside,
    Overlap,
}

/// A query is immutable once constructed: every field needed to evaluate it
/// locally travels with it, so a worker never needs to ask the driver for
/// more context mid-evaluation (§4.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Query {
    /// All objects in `dataset_id` whose MBR intersects `window`.
    Range {
        id: QueryId,
        dataset_id: i64,
        window: Geometry,
    },
    /// The `k` nearest objects in `dataset_id` to `point`.
    Knn {
        id: QueryId,
        dataset_id: i64,
        point: (f64, f64),
        k: usize,
    },
    /// A join between `left_dataset_id` and `right_dataset_id`, in one of two
    /// modes selected by `pairs`:
    ///
    /// - `pairs: false` (topology join) evaluates the full nine-case sweep
    ///   and reports a per-relation count over every [`JoinRelation`] bucket,
    ///   not just `relation`. `relation` names the single bucket the caller
    ///   is ultimately interested in (read off
    ///   `QResultBase::TopologyHistogram`'s `counts[relation]`) rather than
    ///   filtering which pairs get counted.
    /// - `pairs: true` (plain intersection join) reports every intersecting
    ///   record-id pair as a `QResultBase::IdPairSet`, with no relation
    ///   classification or filtering; `relation` is ignored in this mode.
    Join {
        id: QueryId,
        left_dataset_id: i64,
        right_dataset_id: i64,
        relation: JoinRelation,
        pairs: bool,
    },
    /// A distance join: every pair across the two datasets within `distance`
    /// of each other.
    DistanceJoin {
        id: QueryId,
        left_dataset_id: i64,
        right_dataset_id: i64,
        distance: f64,
    },
}

impl Query {
    pub fn id(&self) -> QueryId {
        match self {
            Query::Range { id, .. } => *id,
            Query::Knn { id, .. } => *id,
            Query::Join { id, .. } => *id,
            Query::DistanceJoin { id, .. } => *id,
        }
    }

    /// Every dataset id this query reads, in query-definition order.
    pub fn dataset_ids(&self) -> Vec<i64> {
        match self {
            Query::Range { dataset_id, .. } | Query::Knn { dataset_id, .. } => vec![*dataset_id],
            Query::Join {
                left_dataset_id,
                right_dataset_id,
                ..
            }
            | Query::DistanceJoin {
                left_dataset_id,
                right_dataset_id,
                ..
            } => vec![*left_dataset_id, *right_dataset_id],
        }
    }

    /// The window's bounding rectangle, for range queries only.
    pub fn range_window_mbr(&self) -> Option<Mbr> {
        match self {
            Query::Range { window, .. } => Some(window_mbr(window)),
            _ => None,
        }
    }
}

/// `Geometry::mbr()` is a private invariant helper on `Shape`; queries need
/// the same bound computed from a bare window, so it is re-derived here
/// rather than widening `Geometry`'s public surface for one caller.
fn window_mbr(geometry: &Geometry) -> Mbr {
    match geometry {
        Geometry::Point { x, y } => Mbr::new(*x, *y, *x, *y),
        Geometry::LineString { coords } | Geometry::Polygon { coords } => Mbr::from_points(coords),
        Geometry::Box { min, max } => Mbr::new(min.0, min.1, max.0, max.1),
    }
}

/// Evaluates `query` against whatever share of its datasets `agent` holds
/// locally, producing a partial result (§4.6: every worker runs this against
/// its own agent; the host runs it against its own agent's share too, then
/// the gather step merges every partial into the final answer).
///
/// For [`Query::DistanceJoin`] this only covers the co-located half of the
/// join — pairs whose objects both live on this node. The border-exchange
/// half that finds pairs split across nodes is a controller concern, driven
/// from [`crate::controller::host`]/[`crate::controller::worker`] using
/// [`distance_join::border_objects`]/[`distance_join::join_within_distance`]
/// directly.
pub fn evaluate_local(
    agent: &Agent,
    query: &Query,
    method: &PartitioningMethod,
    dataspace: &Dataspace,
) -> Result<QResultBase> {
    match query {
        Query::Range { dataset_id, window, .. } => {
            let dataset = agent.dataset(*dataset_id)?;
            let mut result = QResultBase::empty_id_set();
            let ids = match window {
                Geometry::Box { min, max } => {
                    range::range_box(dataset.uniform_grid_index(), method, dataspace, &Mbr::new(min.0, min.1, max.0, max.1))?
                }
                Geometry::Point { x, y } => {
                    range::range_box(dataset.uniform_grid_index(), method, dataspace, &Mbr::new(*x, *y, *x, *y))?
                }
                Geometry::LineString { coords } | Geometry::Polygon { coords } => {
                    range::range_polygon(dataset.uniform_grid_index(), method, dataspace, coords)?
                }
            };
            for id in ids {
                result.add_id(id)?;
            }
            Ok(result)
        }
        Query::Knn { dataset_id, point, k, .. } => {
            let dataset = agent.dataset(*dataset_id)?;
            let neighbors = knn::knn(dataset.uniform_grid_index(), method, dataspace, point.0, point.1, *k);
            let mut result = QResultBase::empty_knn_heap(*k);
            for neighbor in neighbors {
                result.offer_neighbor(neighbor)?;
            }
            Ok(result)
        }
        Query::Join {
            left_dataset_id,
            right_dataset_id,
            pairs,
            ..
        } => {
            let left = agent.dataset(*left_dataset_id)?;
            let right = agent.dataset(*right_dataset_id)?;
            if *pairs {
                let hits = sweep::two_layer_join(left.two_layer_index(), right.two_layer_index(), false);
                let mut result = QResultBase::empty_id_pair_set();
                for hit in hits {
                    result.add_pair(hit.r, hit.s)?;
                }
                Ok(result)
            } else {
                let hits = sweep::two_layer_join(left.two_layer_index(), right.two_layer_index(), true);
                let mut result = QResultBase::empty_topology_histogram();
                for hit in hits {
                    let relation = match hit.relation {
                        MbrRelation::Equal => JoinRelation::Equal,
                        MbrRelation::RInS => JoinRelation::Inside,
                        MbrRelation::SInR => JoinRelation::Contains,
                        MbrRelation::Cross | MbrRelation::Intersect => JoinRelation::Overlap,
                    };
                    result.add_relation(relation)?;
                }
                Ok(result)
            }
        }
        Query::DistanceJoin {
            left_dataset_id,
            right_dataset_id,
            distance,
            ..
        } => {
            let left = agent.dataset(*left_dataset_id)?;
            let right = agent.dataset(*right_dataset_id)?;
            let left_entries = flatten(left.uniform_grid_index());
            let right_entries = flatten(right.uniform_grid_index());
            let mut result = QResultBase::empty_id_pair_set();
            for (l, r) in distance_join::join_within_distance(&left_entries, &right_entries, *distance) {
                result.add_pair(l, r)?;
            }
            Ok(result)
        }
    }
}

fn flatten(index: &crate::index::uniform_grid::UniformGridIndex) -> Vec<IndexEntry> {
    index.cells_in_order().flat_map(|(_, entries)| entries.iter().copied()).collect()
}
