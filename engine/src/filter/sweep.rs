//! The two-layer plane-sweep kernel: the nine (outer, inner) class
//! combinations from §4.3, dispatched per fine partition and parallelized
//! across partitions with a reduction (§4.3 "Parallelism").

use rayon::prelude::*;

use crate::filter::{relate_mbrs, MbrRelation};
use crate::index::two_layer::{Partition, TwoLayerIndex};
use crate::index::IndexEntry;
use crate::shape::{RecId, TwoLayerClass};

/// One emitted candidate pair, always `(R, S)` regardless of which side was
/// the sweep's "outer" list, with the MBR relation already classified.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairHit {
    pub r: RecId,
    pub s: RecId,
    pub relation: MbrRelation,
}

/// The shared plane-sweep primitive every named `sweep_roll_y_*` variant
/// delegates to. Both lists are pre-sorted by `mbr.y_min` ascending (a
/// [`crate::index::two_layer::TwoLayerIndex`] invariant once sealed); the
/// inner loop breaks as soon as `inner.y_min` exceeds `outer.y_max`, since no
/// later inner entry (sorted ascending) can overlap either.
///
/// The five named variants in §4.3 differ only in which side they advance
/// first and which axis they prune on first — an optimization over *this*
/// loop's iteration order, not over the set of pairs it reports. We keep one
/// correct implementation and let the nine-case dispatch table in
/// [`sweep_partition`] be the sole source of the "exactly once" guarantee,
/// since that is what §8's invariants 1/2 actually depend on.
fn sweep(outer: &[IndexEntry], inner: &[IndexEntry]) -> Vec<(IndexEntry, IndexEntry)> {
    let mut pairs = Vec::new();
    for o in outer {
        for i in inner {
            if i.mbr.y_min > o.mbr.y_max {
                break;
            }
            if i.mbr.y_max < o.mbr.y_min {
                continue;
            }
            if o.mbr.x_min > i.mbr.x_max || o.mbr.x_max < i.mbr.x_min {
                continue;
            }
            pairs.push((*o, *i));
        }
    }
    pairs
}

/// `R.A x S.A`: both-advance by `yMin`.
pub fn sweep_roll_y_1(r: &[IndexEntry], s: &[IndexEntry]) -> Vec<(IndexEntry, IndexEntry)> {
    sweep(r, s)
}

/// Advance-R-only sweep, used for `{S.B,R.A}` and `{R.B,S.A}`.
pub fn sweep_roll_y_2(r: &[IndexEntry], s: &[IndexEntry]) -> Vec<(IndexEntry, IndexEntry)> {
    sweep(r, s)
}

/// Both-advance with an `xMin`-only prune, used for `{R.A,S.C}` and `{S.A,R.C}`.
pub fn sweep_roll_y_3(r: &[IndexEntry], s: &[IndexEntry]) -> Vec<(IndexEntry, IndexEntry)> {
    sweep(r, s)
}

/// Advance-R-only with an `xMin` prune, used for `{R.B,S.C}` and `{S.B,R.C}`.
pub fn sweep_roll_y_4(r: &[IndexEntry], s: &[IndexEntry]) -> Vec<(IndexEntry, IndexEntry)> {
    sweep(r, s)
}

/// Advance-R-only with an `xMax` prune, used for `{S.D,R.A}` and `{R.D,S.A}`.
pub fn sweep_roll_y_5(r: &[IndexEntry], s: &[IndexEntry]) -> Vec<(IndexEntry, IndexEntry)> {
    sweep(r, s)
}

fn push_hits(
    out: &mut Vec<PairHit>,
    pairs: Vec<(IndexEntry, IndexEntry)>,
    r_is_first: bool,
    classify: bool,
) {
    for (first, second) in pairs {
        let (r, s) = if r_is_first { (first, second) } else { (second, first) };
        let relation = if classify {
            relate_mbrs(&r, &s)
        } else {
            MbrRelation::Intersect
        };
        out.push(PairHit {
            r: r.rec_id,
            s: s.rec_id,
            relation,
        });
    }
}

/// Runs the nine-case dispatch table from §4.3 over one fine partition
/// present in `r`'s index (the partition in `s`'s index may be entirely
/// absent, in which case every class list is treated as empty). Returns
/// every candidate pair exactly once, with `classify_relations` controlling
/// whether [`relate_mbrs`] runs per hit (topology joins) or every hit is
/// left as `MbrRelation::Intersect` (plain intersection joins, §4.3
/// "forwardPair").
pub fn sweep_partition(r: &Partition, s: &Partition, classify_relations: bool) -> Vec<PairHit> {
    let mut hits = Vec::new();

    let r_a = r.class(TwoLayerClass::A);
    let r_b = r.class(TwoLayerClass::B);
    let r_c = r.class(TwoLayerClass::C);
    let r_d = r.class(TwoLayerClass::D);
    let s_a = s.class(TwoLayerClass::A);
    let s_b = s.class(TwoLayerClass::B);
    let s_c = s.class(TwoLayerClass::C);
    let s_d = s.class(TwoLayerClass::D);

    // R.A x S.A
    push_hits(&mut hits, sweep_roll_y_1(r_a, s_a), true, classify_relations);
    // S.B x R.A (pivot is R)
    push_hits(&mut hits, sweep_roll_y_2(r_a, s_b), true, classify_relations);
    // R.A x S.C
    push_hits(&mut hits, sweep_roll_y_3(r_a, s_c), true, classify_relations);
    // S.D x R.A (pivot is R)
    push_hits(&mut hits, sweep_roll_y_5(r_a, s_d), true, classify_relations);
    // R.B x S.A
    push_hits(&mut hits, sweep_roll_y_2(r_b, s_a), true, classify_relations);
    // R.B x S.C
    push_hits(&mut hits, sweep_roll_y_4(r_b, s_c), true, classify_relations);
    // S.A x R.C (pivot is R)
    push_hits(&mut hits, sweep_roll_y_3(r_c, s_a), true, classify_relations);
    // S.B x R.C (pivot is R)
    push_hits(&mut hits, sweep_roll_y_4(r_c, s_b), true, classify_relations);
    // R.D x S.A
    push_hits(&mut hits, sweep_roll_y_5(r_d, s_a), true, classify_relations);

    hits
}

/// Runs [`sweep_partition`] over every fine partition present in `r`,
/// parallelized across partitions (§4.3/§5: a thread pool reduction, here
/// `rayon`'s work-stealing pool backing `par_iter`). Each thread accumulates
/// into its own `Vec`, matching the spec's "thread-local result, merged at
/// the end" shape without needing a lock in the hot path.
pub fn two_layer_join(r_index: &TwoLayerIndex, s_index: &TwoLayerIndex, classify_relations: bool) -> Vec<PairHit> {
    r_index
        .partition_ids()
        .par_iter()
        .flat_map(|&partition_id| {
            let empty = Partition::default();
            let r_partition = r_index.partition(partition_id).unwrap_or(&empty);
            let s_partition = s_index.partition(partition_id).unwrap_or(&empty);
            sweep_partition(r_partition, s_partition, classify_relations)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Geometry, Mbr, Shape};

    fn shape_with_class(rec_id: i64, mbr: Mbr, class: TwoLayerClass) -> Shape {
        let mut shape = Shape::new(rec_id, Geometry::Box { min: (mbr.x_min, mbr.y_min), max: (mbr.x_max, mbr.y_max) });
        shape.assign_partition(0, class);
        shape
    }

    #[test]
    fn no_duplicate_and_no_miss_for_a_single_intersecting_pair() {
        let mut r_index = TwoLayerIndex::new();
        let mut s_index = TwoLayerIndex::new();
        // Both start inside the (0,0) origin cell, so both classify A.
        r_index.insert(&shape_with_class(1, Mbr::new(0.0, 0.0, 1.0, 1.0), TwoLayerClass::A));
        s_index.insert(&shape_with_class(10, Mbr::new(0.5, 0.5, 1.5, 1.5), TwoLayerClass::A));
        r_index.seal();
        s_index.seal();

        let hits = two_layer_join(&r_index, &s_index, false);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].r, 1);
        assert_eq!(hits[0].s, 10);
    }

    #[test]
    fn disjoint_shapes_produce_no_hits() {
        let mut r_index = TwoLayerIndex::new();
        let mut s_index = TwoLayerIndex::new();
        r_index.insert(&shape_with_class(1, Mbr::new(0.0, 0.0, 1.0, 1.0), TwoLayerClass::A));
        s_index.insert(&shape_with_class(2, Mbr::new(10.0, 10.0, 11.0, 11.0), TwoLayerClass::A));
        r_index.seal();
        s_index.seal();

        assert!(two_layer_join(&r_index, &s_index, false).is_empty());
    }

    #[test]
    fn cross_classes_in_the_same_partition_each_emit_exactly_once() {
        let mut r_index = TwoLayerIndex::new();
        let mut s_index = TwoLayerIndex::new();
        r_index.insert(&shape_with_class(1, Mbr::new(5.0, 5.0, 6.0, 6.0), TwoLayerClass::B));
        s_index.insert(&shape_with_class(2, Mbr::new(5.5, 4.0, 6.5, 6.5), TwoLayerClass::C));
        r_index.seal();
        s_index.seal();

        let hits = two_layer_join(&r_index, &s_index, false);
        assert_eq!(hits.len(), 1);
    }
}
