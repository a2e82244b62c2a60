//! Distance-join kernel (§4.4): which local objects are *border objects*
//! for a remote node (their dilated MBR reaches into that node's territory),
//! and the local distance test once both sides' border batches are in hand.
//! The traffic protocol that exchanges those batches between nodes is a
//! controller concern (§4.6), not this kernel's.

use std::collections::HashMap;

use crate::index::uniform_grid::UniformGridIndex;
use crate::index::IndexEntry;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::shape::Mbr;
use crate::Result;

/// Shortest distance between two rectangles, 0.0 if they overlap.
fn mbr_distance(a: &Mbr, b: &Mbr) -> f64 {
    let dx = if a.x_max < b.x_min {
        b.x_min - a.x_max
    } else if b.x_max < a.x_min {
        a.x_min - b.x_max
    } else {
        0.0
    };
    let dy = if a.y_max < b.y_min {
        b.y_min - a.y_max
    } else if b.y_max < a.y_min {
        a.y_min - b.y_max
    } else {
        0.0
    };
    (dx * dx + dy * dy).sqrt()
}

/// Groups this node's local entries by the *other* node rank they must be
/// sent to as border objects: entries whose MBR, dilated by `distance`,
/// reaches into a coarse cell owned by a different rank. `local_rank` is
/// excluded from the returned map's keys.
///
/// Entries that border more than one remote rank (a corner of the local
/// territory) appear once per rank, which is correct: each remote node only
/// ever sees the batch addressed to it.
pub fn border_objects(
    index: &UniformGridIndex,
    method: &PartitioningMethod,
    dataspace: &Dataspace,
    world_size: u32,
    local_rank: u32,
    distance: f64,
) -> Result<HashMap<u32, Vec<IndexEntry>>> {
    let mut by_rank: HashMap<u32, Vec<IndexEntry>> = HashMap::new();

    for (_, entries) in index.cells_in_order() {
        for entry in entries {
            let dilated = entry.mbr.dilated(distance);
            for (i, j) in method.coarse_cells_for_mbr(dataspace, &dilated)? {
                let owner = method.node_rank_for_coarse_cell(i as u32, j as u32, world_size);
                if owner != local_rank {
                    by_rank.entry(owner).or_default().push(*entry);
                }
            }
        }
    }

    for entries in by_rank.values_mut() {
        entries.sort_by_key(|e| e.rec_id);
        entries.dedup_by_key(|e| e.rec_id);
    }

    Ok(by_rank)
}

/// Local half of the distance join: every `(local, remote)` pair whose MBRs
/// are within `distance` of each other, once a remote border batch has been
/// received. A brute-force double loop is adequate here since border
/// batches are the small boundary subset of a node's data, not the full
/// dataset.
pub fn join_within_distance(local: &[IndexEntry], remote: &[IndexEntry], distance: f64) -> Vec<(i64, i64)> {
    let mut pairs = Vec::new();
    for l in local {
        for r in remote {
            if mbr_distance(&l.mbr, &r.mbr) <= distance {
                pairs.push((l.rec_id, r.rec_id));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Geometry, Shape};

    fn grid(ppd: u32, world_size: u32, points: &[(i64, f64, f64)]) -> (UniformGridIndex, PartitioningMethod, Dataspace) {
        let method = PartitioningMethod::RoundRobin { ppd };
        let dataspace = Dataspace::from_union(Mbr::new(0.0, 0.0, 100.0, 100.0));
        let mut index = UniformGridIndex::new();
        for &(id, x, y) in points {
            index.insert(&method, &dataspace, &Shape::new(id, Geometry::Point { x, y })).unwrap();
        }
        index.seal();
        let _ = world_size;
        (index, method, dataspace)
    }

    #[test]
    fn a_point_near_the_grid_seam_is_a_border_object_for_its_neighbor() {
        // ppd=4 over a 100-wide dataspace gives 25-unit cells; rank 0 owns column 0,
        // rank 1 owns column 1 (round-robin by coarse cell index), so a point at
        // x=24 dilated by 2 reaches into rank 1's territory.
        let (index, method, dataspace) = grid(4, 4, &[(1, 24.0, 10.0)]);
        let borders = border_objects(&index, &method, &dataspace, 4, 0, 2.0).unwrap();
        assert!(borders.values().flatten().any(|e| e.rec_id == 1));
    }

    #[test]
    fn a_point_far_from_any_seam_borders_nobody() {
        let (index, method, dataspace) = grid(4, 4, &[(1, 12.0, 12.0)]);
        let borders = border_objects(&index, &method, &dataspace, 4, 0, 1.0).unwrap();
        assert!(borders.values().all(|v| v.is_empty()) || borders.is_empty());
    }

    #[test]
    fn join_within_distance_finds_close_pairs_only() {
        let local = [IndexEntry { rec_id: 1, mbr: Mbr::new(0.0, 0.0, 0.0, 0.0) }];
        let remote = [
            IndexEntry { rec_id: 2, mbr: Mbr::new(1.0, 0.0, 1.0, 0.0) },
            IndexEntry { rec_id: 3, mbr: Mbr::new(10.0, 0.0, 10.0, 0.0) },
        ];
        let pairs = join_within_distance(&local, &remote, 2.0);
        assert_eq!(pairs, vec![(1, 2)]);
    }
}
