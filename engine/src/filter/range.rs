//! Window range queries over the uniform grid (§4.4): a box window splits
//! its candidate cells into an interior block (accepted without a per-entry
//! MBR test) and a boundary ring (tested), while a polygon window has no
//! such optimization and tests every candidate.

use std::collections::HashSet;

use crate::index::uniform_grid::UniformGridIndex;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::shape::{Mbr, RecId};
use crate::Result;

/// Range query against a box window. Cells strictly inside `(iMin+1..iMax)`
/// x `(jMin+1..jMax)` are fully enclosed by the window by construction of
/// the grid, so every entry in them is accepted outright; the bottom/top
/// rows and left/right columns are boundary cells and each entry is tested
/// against the window.
pub fn range_box(
    index: &UniformGridIndex,
    method: &PartitioningMethod,
    dataspace: &Dataspace,
    window: &Mbr,
) -> Result<Vec<RecId>> {
    let (i_min, j_min, i_max, j_max) = method.fine_cell_range(dataspace, window)?;
    let mut hits = HashSet::new();

    for j in j_min..=j_max {
        for i in i_min..=i_max {
            let interior = i > i_min && i < i_max && j > j_min && j < j_max;
            let partition_id = method.partition_id(i, j)?;
            for entry in index.cell(partition_id) {
                if interior || entry.mbr.intersects(window) {
                    hits.insert(entry.rec_id);
                }
            }
        }
    }

    Ok(hits.into_iter().collect())
}

/// Range query against an arbitrary polygon window. The two-layer's exact
/// interior/boundary split only holds for axis-aligned boxes, so every
/// candidate cell here is treated as boundary: its entries are filtered by
/// MBR overlap with the polygon's own MBR, leaving exact point-in-polygon
/// refinement to the external geometry collaborator (§1).
pub fn range_polygon(
    index: &UniformGridIndex,
    method: &PartitioningMethod,
    dataspace: &Dataspace,
    polygon: &[(f64, f64)],
) -> Result<Vec<RecId>> {
    let window = Mbr::from_points(polygon);
    let (i_min, j_min, i_max, j_max) = method.fine_cell_range(dataspace, &window)?;
    let mut hits = HashSet::new();

    for j in j_min..=j_max {
        for i in i_min..=i_max {
            let partition_id = method.partition_id(i, j)?;
            for entry in index.cell(partition_id) {
                if entry.mbr.intersects(&window) {
                    hits.insert(entry.rec_id);
                }
            }
        }
    }

    Ok(hits.into_iter().collect())
}
