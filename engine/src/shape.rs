//! Shape primitives: the MBR, the tagged geometry variant, and the
//! per-(shape, partition) metadata attached once partitioning runs.

use serde::{Deserialize, Serialize};

/// 64-bit record identifier, stable for the lifetime of a dataset.
pub type RecId = i64;

/// Minimum bounding rectangle of a geometry, in dataspace coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mbr {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Mbr {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// The tightest MBR enclosing a sequence of vertices. Panics if `points` is empty;
    /// callers must never construct a `Shape` from an empty coordinate sequence.
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let (mut x_min, mut y_min) = (f64::INFINITY, f64::INFINITY);
        let (mut x_max, mut y_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &(x, y) in points {
            x_min = x_min.min(x);
            y_min = y_min.min(y);
            x_max = x_max.max(x);
            y_max = y_max.max(y);
        }
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn union(&self, other: &Mbr) -> Mbr {
        Mbr {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    /// Whether two MBRs overlap on both axes (touching edges count as overlap).
    pub fn intersects(&self, other: &Mbr) -> bool {
        self.x_min <= other.x_max
            && self.x_max >= other.x_min
            && self.y_min <= other.y_max
            && self.y_max >= other.y_min
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// A copy of this MBR grown by `d` on every side, used for distance-join border tests.
    pub fn dilated(&self, d: f64) -> Mbr {
        Mbr {
            x_min: self.x_min - d,
            y_min: self.y_min - d,
            x_max: self.x_max + d,
            y_max: self.y_max + d,
        }
    }

    /// Shortest Euclidean distance from a point to this rectangle, 0.0 if the point is inside.
    pub fn min_distance_to_point(&self, x: f64, y: f64) -> f64 {
        let dx = if x < self.x_min {
            self.x_min - x
        } else if x > self.x_max {
            x - self.x_max
        } else {
            0.0
        };
        let dy = if y < self.y_min {
            self.y_min - y
        } else if y > self.y_max {
            y - self.y_max
        } else {
            0.0
        };
        (dx * dx + dy * dy).sqrt()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }
}

/// Per-(shape, partition) label assigned by the two-layer classification in
/// [`crate::partitioning`]. See the module docs there for the exact rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TwoLayerClass {
    A,
    B,
    C,
    D,
}

/// One (partition, class) assignment recorded on a [`Shape`] after partitioning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub partition_id: i64,
    pub class: TwoLayerClass,
}

/// The tagged geometry variant. Coordinates are always `(x, y)` pairs in
/// dataspace units; a `Polygon`'s ring is implicitly closed the way WKT rings
/// are (the reader external collaborator is responsible for repeating the
/// first vertex if the source format requires it).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Geometry {
    Point { x: f64, y: f64 },
    LineString { coords: Vec<(f64, f64)> },
    Polygon { coords: Vec<(f64, f64)> },
    Box { min: (f64, f64), max: (f64, f64) },
}

impl Geometry {
    fn mbr(&self) -> Mbr {
        match self {
            Geometry::Point { x, y } => Mbr::new(*x, *y, *x, *y),
            Geometry::LineString { coords } | Geometry::Polygon { coords } => {
                Mbr::from_points(coords)
            }
            Geometry::Box { min, max } => Mbr::new(min.0, min.1, max.0, max.1),
        }
    }

    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Geometry::Point { x, y } => (*x, *y),
            Geometry::Box { min, max } => ((min.0 + max.0) / 2.0, (min.1 + max.1) / 2.0),
            Geometry::LineString { coords } | Geometry::Polygon { coords } => {
                let n = coords.len().max(1) as f64;
                let (sx, sy) = coords.iter().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
                (sx / n, sy / n)
            }
        }
    }
}

/// A single geometric object: its identity, its tight MBR, its coordinates,
/// and the partition assignments computed for it.
///
/// Invariant: `mbr` tightly encloses every coordinate in `geometry`.
/// Invariant: `partitions` is non-empty once [`crate::partitioning`] has run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub rec_id: RecId,
    pub mbr: Mbr,
    pub geometry: Geometry,
    pub partitions: Vec<PartitionAssignment>,
}

impl Shape {
    pub fn new(rec_id: RecId, geometry: Geometry) -> Self {
        let mbr = geometry.mbr();
        Self {
            rec_id,
            mbr,
            geometry,
            partitions: Vec::new(),
        }
    }

    pub fn assign_partition(&mut self, partition_id: i64, class: TwoLayerClass) {
        self.partitions.push(PartitionAssignment { partition_id, class });
    }

    pub fn partition_classes(&self, partition_id: i64) -> impl Iterator<Item = TwoLayerClass> + '_ {
        self.partitions
            .iter()
            .filter(move |p| p.partition_id == partition_id)
            .map(|p| p.class)
    }
}

/// Orders two shapes by `mbr.y_min` ascending, ties broken by `rec_id`; this is the
/// sealing order every two-layer class list and uniform-grid cell is sorted into.
pub fn by_y_min_then_rec_id(a: &Shape, b: &Shape) -> std::cmp::Ordering {
    a.mbr
        .y_min
        .partial_cmp(&b.mbr.y_min)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.rec_id.cmp(&b.rec_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbr_from_points_is_tight() {
        let mbr = Mbr::from_points(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        assert_eq!(mbr, Mbr::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn mbr_intersects_is_symmetric_and_inclusive_of_touching() {
        let a = Mbr::new(0.0, 0.0, 1.0, 1.0);
        let b = Mbr::new(1.0, 1.0, 2.0, 2.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));

        let c = Mbr::new(2.0, 2.0, 3.0, 3.0);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn min_distance_to_point_is_zero_inside() {
        let mbr = Mbr::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(mbr.min_distance_to_point(5.0, 5.0), 0.0);
        assert_eq!(mbr.min_distance_to_point(-3.0, 0.0), 3.0);
        assert_eq!(mbr.min_distance_to_point(0.0, 14.0), 4.0);
    }

    #[test]
    fn shape_new_computes_tight_mbr() {
        let shape = Shape::new(
            1,
            Geometry::Polygon {
                coords: vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            },
        );
        assert_eq!(shape.mbr, Mbr::new(0.0, 0.0, 1.0, 1.0));
        assert!(shape.partitions.is_empty());
    }

    #[test]
    fn by_y_min_then_rec_id_breaks_ties_on_rec_id() {
        let mut a = Shape::new(2, Geometry::Point { x: 0.0, y: 1.0 });
        let mut b = Shape::new(1, Geometry::Point { x: 0.0, y: 1.0 });
        a.mbr = Mbr::new(0.0, 1.0, 0.0, 1.0);
        b.mbr = Mbr::new(0.0, 1.0, 0.0, 1.0);
        assert_eq!(by_y_min_then_rec_id(&a, &b), std::cmp::Ordering::Greater);
    }
}
