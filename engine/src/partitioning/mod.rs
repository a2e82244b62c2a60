//! Distribution/partitioning layer: the coarse node-assignment grid, the
//! fine two-layer grid nested inside it, and the two-layer A/B/C/D
//! classification the sweep kernel depends on.

pub mod router;

use serde::{Deserialize, Serialize};

use crate::shape::{Mbr, Shape, TwoLayerClass};
use crate::{Error, ErrorKind, Result};

/// Padding applied to a dataset's union-of-MBRs before it becomes the
/// dataspace, so that boundary tests during partitioning are strict
/// (`<` rather than `<=`) without excluding objects exactly on the edge.
pub const DATASPACE_EPSILON: f64 = 1e-6;

/// The process-wide global extent every partitioning decision is made
/// against. Set once during the configuration broadcast (§9: "a single
/// process-wide configuration object... represented as an explicit value").
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataspace {
    pub mbr: Mbr,
}

impl Dataspace {
    /// Builds a dataspace from the union of a dataset's shape MBRs, padded by
    /// [`DATASPACE_EPSILON`] on every side.
    pub fn from_union(mbr: Mbr) -> Self {
        Self {
            mbr: Mbr::new(
                mbr.x_min - DATASPACE_EPSILON,
                mbr.y_min - DATASPACE_EPSILON,
                mbr.x_max + DATASPACE_EPSILON,
                mbr.y_max + DATASPACE_EPSILON,
            ),
        }
    }

    pub fn width(&self) -> f64 {
        self.mbr.width()
    }

    pub fn height(&self) -> f64 {
        self.mbr.height()
    }
}

/// Which of the two grid strategies from §4.1 is in effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitioningMethod {
    /// A single `ppd x ppd` grid; distribution and partitioning share one resolution.
    RoundRobin { ppd: u32 },
    /// A `dgppd x dgppd` coarse distribution grid, each coarse cell subdivided into
    /// a `ppd x ppd` fine grid used for the two-layer classes and the sweep.
    TwoGrid { dgppd: u32, ppd: u32 },
}

impl PartitioningMethod {
    /// Validates the setup-time constraints from §4.1. Must be called once, at
    /// configuration-broadcast time, before any partitioning occurs.
    pub fn validate(&self, world_size: u32) -> Result<()> {
        match *self {
            PartitioningMethod::RoundRobin { ppd } => {
                if ppd < world_size {
                    return Err(ErrorKind::Partitioning.with_message(format!(
                        "round-robin ppd ({ppd}) must be >= world size ({world_size})"
                    )));
                }
            }
            PartitioningMethod::TwoGrid { dgppd, ppd } => {
                if dgppd < world_size {
                    return Err(ErrorKind::Partitioning.with_message(format!(
                        "distribution grid ppd ({dgppd}) must be >= world size ({world_size})"
                    )));
                }
                if ppd / dgppd.max(1) < world_size {
                    return Err(ErrorKind::Partitioning.with_message(format!(
                        "ppd/dgppd ({ppd}/{dgppd}) must be >= world size ({world_size})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cells per axis in the coarse (node-assignment) grid.
    pub fn distribution_ppd(&self) -> u32 {
        match *self {
            PartitioningMethod::RoundRobin { ppd } => ppd,
            PartitioningMethod::TwoGrid { dgppd, .. } => dgppd,
        }
    }

    /// Cells per axis in the fine (two-layer/sweep) grid, spanning the whole dataspace.
    pub fn fine_resolution(&self) -> u32 {
        match *self {
            PartitioningMethod::RoundRobin { ppd } => ppd,
            PartitioningMethod::TwoGrid { dgppd, ppd } => dgppd * ppd,
        }
    }

    /// How many fine cells, per axis, make up one coarse (distribution) cell.
    fn fine_cells_per_coarse_cell(&self) -> u32 {
        self.fine_resolution() / self.distribution_ppd()
    }

    /// `(cellX, cellY) -> nodeRank` for a *coarse* cell, per §4.1's round-robin rule.
    pub fn node_rank_for_coarse_cell(&self, i: u32, j: u32, world_size: u32) -> u32 {
        let dgppd = self.distribution_ppd();
        (i + j * dgppd) % world_size
    }

    /// `partitionID -> nodeRank`, by mapping the fine cell down to its owning coarse cell.
    pub fn node_rank_for_partition(&self, partition_id: i64, world_size: u32) -> Result<u32> {
        let (fi, fj) = self.cell_from_partition_id(partition_id)?;
        let ratio = self.fine_cells_per_coarse_cell();
        Ok(self.node_rank_for_coarse_cell(fi as u32 / ratio, fj as u32 / ratio, world_size))
    }

    fn coarse_cell_extent(&self, dataspace: &Dataspace) -> (f64, f64) {
        let dgppd = self.distribution_ppd() as f64;
        (dataspace.width() / dgppd, dataspace.height() / dgppd)
    }

    fn fine_cell_extent(&self, dataspace: &Dataspace) -> (f64, f64) {
        let res = self.fine_resolution() as f64;
        (dataspace.width() / res, dataspace.height() / res)
    }

    /// World-unit origin `(x, y)` of a fine cell.
    pub fn fine_cell_origin(&self, dataspace: &Dataspace, i: i64, j: i64) -> (f64, f64) {
        let (cw, ch) = self.fine_cell_extent(dataspace);
        (
            dataspace.mbr.x_min + i as f64 * cw,
            dataspace.mbr.y_min + j as f64 * ch,
        )
    }

    fn floor_cell(value: f64, origin: f64, extent: f64) -> i64 {
        ((value - origin) / extent).floor() as i64
    }

    /// Coarse `(iMin, jMin, iMax, jMax)` cell range intersecting `mbr`, validated
    /// against the grid bounds. Returns `ErrorKind::Partitioning` on out-of-range
    /// indices, per §4.1 ("Out-of-range indices indicate a corrupt dataspace").
    pub fn coarse_cell_range(&self, dataspace: &Dataspace, mbr: &Mbr) -> Result<(i64, i64, i64, i64)> {
        let (cw, ch) = self.coarse_cell_extent(dataspace);
        let dgppd = self.distribution_ppd() as i64;
        let i_min = Self::floor_cell(mbr.x_min, dataspace.mbr.x_min, cw);
        let j_min = Self::floor_cell(mbr.y_min, dataspace.mbr.y_min, ch);
        let i_max = Self::floor_cell(mbr.x_max, dataspace.mbr.x_min, cw);
        let j_max = Self::floor_cell(mbr.y_max, dataspace.mbr.y_min, ch);
        if i_min < 0 || j_min < 0 || i_max >= dgppd || j_max >= dgppd {
            return Err(invalid_partition(i_min, j_min, i_max, j_max));
        }
        Ok((i_min, j_min, i_max, j_max))
    }

    /// All coarse cells whose area intersects `mbr`.
    pub fn coarse_cells_for_mbr(&self, dataspace: &Dataspace, mbr: &Mbr) -> Result<Vec<(i64, i64)>> {
        let (i_min, j_min, i_max, j_max) = self.coarse_cell_range(dataspace, mbr)?;
        let mut cells = Vec::with_capacity(((i_max - i_min + 1) * (j_max - j_min + 1)) as usize);
        for j in j_min..=j_max {
            for i in i_min..=i_max {
                cells.push((i, j));
            }
        }
        Ok(cells)
    }

    /// Fine `(iMin, jMin, iMax, jMax)` cell range intersecting `mbr`.
    pub fn fine_cell_range(&self, dataspace: &Dataspace, mbr: &Mbr) -> Result<(i64, i64, i64, i64)> {
        let (cw, ch) = self.fine_cell_extent(dataspace);
        let res = self.fine_resolution() as i64;
        let i_min = Self::floor_cell(mbr.x_min, dataspace.mbr.x_min, cw);
        let j_min = Self::floor_cell(mbr.y_min, dataspace.mbr.y_min, ch);
        let i_max = Self::floor_cell(mbr.x_max, dataspace.mbr.x_min, cw);
        let j_max = Self::floor_cell(mbr.y_max, dataspace.mbr.y_min, ch);
        if i_min < 0 || j_min < 0 || i_max >= res || j_max >= res {
            return Err(invalid_partition(i_min, j_min, i_max, j_max));
        }
        Ok((i_min, j_min, i_max, j_max))
    }

    /// All fine cells whose area intersects `mbr`, as `(partitionId, cellOrigin)` pairs.
    pub fn fine_cells_for_mbr(
        &self,
        dataspace: &Dataspace,
        mbr: &Mbr,
    ) -> Result<Vec<(i64, (f64, f64))>> {
        let (i_min, j_min, i_max, j_max) = self.fine_cell_range(dataspace, mbr)?;
        let mut cells = Vec::with_capacity(((i_max - i_min + 1) * (j_max - j_min + 1)) as usize);
        for j in j_min..=j_max {
            for i in i_min..=i_max {
                let id = self.partition_id(i, j)?;
                cells.push((id, self.fine_cell_origin(dataspace, i, j)));
            }
        }
        Ok(cells)
    }

    /// `(cellX, cellY) -> partitionID` in the fine grid.
    pub fn partition_id(&self, i: i64, j: i64) -> Result<i64> {
        let res = self.fine_resolution() as i64;
        if i < 0 || j < 0 || i >= res || j >= res {
            return Err(invalid_partition(i, j, i, j));
        }
        Ok(i + j * res)
    }

    /// `partitionID -> (cellX, cellY)` in the fine grid.
    pub fn cell_from_partition_id(&self, partition_id: i64) -> Result<(i64, i64)> {
        let res = self.fine_resolution() as i64;
        if partition_id < 0 || partition_id >= res * res {
            return Err(invalid_partition(partition_id, 0, partition_id, 0));
        }
        Ok((partition_id % res, partition_id / res))
    }

    /// Classifies a shape's MBR against the fine partition whose origin is `cell_origin`,
    /// per the A/B/C/D rule in §4.1.
    pub fn classify(shape_mbr: &Mbr, cell_origin: (f64, f64)) -> TwoLayerClass {
        let (px, py) = cell_origin;
        match (shape_mbr.x_min >= px, shape_mbr.y_min >= py) {
            (true, true) => TwoLayerClass::A,
            (true, false) => TwoLayerClass::B,
            (false, true) => TwoLayerClass::C,
            (false, false) => TwoLayerClass::D,
        }
    }

    /// Computes and records every `(partitionId, class)` assignment for `shape`
    /// against the fine grid, and returns the set of *node ranks* (deduplicated,
    /// derived from the coarse cells the shape's MBR overlaps) the shape's batch
    /// membership should be routed to.
    pub fn assign(
        &self,
        dataspace: &Dataspace,
        shape: &mut Shape,
        world_size: u32,
    ) -> Result<Vec<u32>> {
        shape.partitions.clear();
        for (partition_id, origin) in self.fine_cells_for_mbr(dataspace, &shape.mbr)? {
            let class = Self::classify(&shape.mbr, origin);
            shape.assign_partition(partition_id, class);
        }

        let mut ranks: Vec<u32> = self
            .coarse_cells_for_mbr(dataspace, &shape.mbr)?
            .into_iter()
            .map(|(i, j)| self.node_rank_for_coarse_cell(i as u32, j as u32, world_size))
            .collect();
        ranks.sort_unstable();
        ranks.dedup();
        Ok(ranks)
    }
}

fn invalid_partition(i_min: i64, j_min: i64, i_max: i64, j_max: i64) -> Error {
    ErrorKind::Partitioning.with_message(format!(
        "cell range ({i_min},{j_min})..=({i_max},{j_max}) is outside the dataspace grid"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Geometry;

    fn unit_dataspace() -> Dataspace {
        Dataspace::from_union(Mbr::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn round_robin_validate_rejects_small_ppd() {
        let method = PartitioningMethod::RoundRobin { ppd: 1 };
        assert!(method.validate(4).is_err());
        assert!(PartitioningMethod::RoundRobin { ppd: 4 }.validate(4).is_ok());
    }

    #[test]
    fn two_grid_validate_checks_both_constraints() {
        assert!(PartitioningMethod::TwoGrid { dgppd: 2, ppd: 4 }.validate(2).is_ok());
        assert!(PartitioningMethod::TwoGrid { dgppd: 1, ppd: 4 }.validate(2).is_err());
        assert!(PartitioningMethod::TwoGrid { dgppd: 2, ppd: 2 }.validate(2).is_err());
    }

    #[test]
    fn partition_id_round_trips_with_cell_from_partition_id() {
        let method = PartitioningMethod::TwoGrid { dgppd: 2, ppd: 2 };
        for j in 0..4 {
            for i in 0..4 {
                let id = method.partition_id(i, j).unwrap();
                assert_eq!(method.cell_from_partition_id(id).unwrap(), (i, j));
            }
        }
    }

    #[test]
    fn node_rank_for_partition_matches_coarse_cell_owner() {
        let method = PartitioningMethod::TwoGrid { dgppd: 2, ppd: 2 };
        // fine grid is 4x4; coarse cell (0,0) owns fine cells (0..2, 0..2).
        let id = method.partition_id(1, 1).unwrap();
        assert_eq!(method.node_rank_for_partition(id, 2).unwrap(), 0);
        let id = method.partition_id(3, 0).unwrap();
        assert_eq!(method.node_rank_for_partition(id, 2).unwrap(), 1);
    }

    #[test]
    fn partition_cells_closure_covers_mbr_and_stays_in_grid() {
        let dataspace = unit_dataspace();
        let method = PartitioningMethod::TwoGrid { dgppd: 2, ppd: 4 };
        let mbr = Mbr::new(2.0, 2.0, 7.0, 7.0);
        let cells = method.fine_cells_for_mbr(&dataspace, &mbr).unwrap();
        assert!(!cells.is_empty());
        let res = method.fine_resolution() as i64;
        for (id, _) in &cells {
            assert!(*id >= 0 && *id < res * res);
        }
    }

    #[test]
    fn assign_gives_every_shape_partition_exactly_one_class() {
        let dataspace = unit_dataspace();
        let method = PartitioningMethod::TwoGrid { dgppd: 1, ppd: 4 };
        let mut shape = crate::shape::Shape::new(
            1,
            Geometry::Polygon {
                coords: vec![(2.0, 2.0), (6.0, 2.0), (6.0, 6.0), (2.0, 6.0), (2.0, 2.0)],
            },
        );
        method.assign(&dataspace, &mut shape, 1).unwrap();
        assert!(!shape.partitions.is_empty());
        let mut seen = std::collections::HashSet::new();
        for p in &shape.partitions {
            assert!(seen.insert(p.partition_id), "duplicate partition assignment");
        }
    }
}
