//! The two spatial indexes queries are evaluated against: the two-layer
//! index (joins) and the uniform-grid index (range/kNN/distance-join).
//!
//! Both store non-owning [`IndexEntry`] references rather than full
//! [`crate::shape::Shape`] values (§9: "the dataset's object map owns
//! shapes; indexes store non-owning references... in Rust, equivalently
//! use... indices"). Here the "index" is the `rec_id`, looked up against
//! the owning [`crate::dataset::Dataset`] when full geometry is needed.

pub mod two_layer;
pub mod uniform_grid;

use crate::shape::{Mbr, RecId, Shape};

/// A lightweight, non-owning reference to a shape inside an index: its
/// identity and its MBR, which is all the two-layer filter kernel and the
/// uniform-grid kernels ever need to make a filtering decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexEntry {
    pub rec_id: RecId,
    pub mbr: Mbr,
}

impl From<&Shape> for IndexEntry {
    fn from(shape: &Shape) -> Self {
        Self {
            rec_id: shape.rec_id,
            mbr: shape.mbr,
        }
    }
}

/// Orders two entries by `mbr.y_min` ascending, ties broken by `rec_id` —
/// the sealing order every two-layer class list is sorted into (§3).
pub fn by_y_min_then_rec_id(a: &IndexEntry, b: &IndexEntry) -> std::cmp::Ordering {
    a.mbr
        .y_min
        .partial_cmp(&b.mbr.y_min)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.rec_id.cmp(&b.rec_id))
}
