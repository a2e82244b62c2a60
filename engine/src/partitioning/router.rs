//! The batch router: assigns shapes to destination ranks and groups them
//! into size-bounded [`Batch`]es, sealing a final empty batch per rank as
//! the end-of-stream sentinel (§4.1).

use std::collections::HashMap;

use crate::fabric::Tag;
use crate::partitioning::{Dataspace, PartitioningMethod};
use crate::shape::Shape;
use crate::Result;

/// A staging buffer of shapes bound for one destination rank, sealed either
/// when it reaches `max_size` or when the router is flushed at end-of-dataset.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub dest_rank: u32,
    pub tag: Tag,
    pub shapes: Vec<Shape>,
}

impl Batch {
    pub fn new(dest_rank: u32, tag: Tag) -> Self {
        Self {
            dest_rank,
            tag,
            shapes: Vec::new(),
        }
    }

    /// An empty batch is the well-defined end-of-stream sentinel for a rank.
    pub fn is_sentinel(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Slices an incoming shape stream into per-rank [`Batch`]es. The router does
/// not read files itself; `route` accepts already-parsed shapes, matching
/// §1's treatment of the WKT/CSV readers as an external collaborator.
pub struct BatchRouter<'m> {
    method: &'m PartitioningMethod,
    dataspace: Dataspace,
    world_size: u32,
    max_batch_size: usize,
    tag: Tag,
    pending: HashMap<u32, Batch>,
}

impl<'m> BatchRouter<'m> {
    pub fn new(
        method: &'m PartitioningMethod,
        dataspace: Dataspace,
        world_size: u32,
        max_batch_size: usize,
        tag: Tag,
    ) -> Self {
        Self {
            method,
            dataspace,
            world_size,
            max_batch_size,
            tag,
            pending: HashMap::new(),
        }
    }

    /// Classifies `shape` against the fine grid and appends it to every
    /// destination rank's pending batch. Returns any batches that filled up
    /// and were sealed as a result of this call.
    pub fn route(&mut self, mut shape: Shape) -> Result<Vec<Batch>> {
        let ranks = self.method.assign(&self.dataspace, &mut shape, self.world_size)?;
        let mut sealed = Vec::new();
        for rank in ranks {
            let batch = self
                .pending
                .entry(rank)
                .or_insert_with(|| Batch::new(rank, self.tag));
            batch.shapes.push(shape.clone());
            if batch.shapes.len() >= self.max_batch_size {
                sealed.push(std::mem::replace(batch, Batch::new(rank, self.tag)));
            }
        }
        Ok(sealed)
    }

    /// Seals every remaining non-empty batch, plus a trailing empty sentinel
    /// batch for every rank the router has ever routed to (including ranks
    /// that received no shapes at all, who must still see the sentinel).
    pub fn flush(mut self) -> Vec<Batch> {
        let mut out = Vec::new();
        let mut ranks: Vec<u32> = (0..self.world_size).collect();
        for rank in self.pending.keys() {
            if !ranks.contains(rank) {
                ranks.push(*rank);
            }
        }
        for rank in ranks {
            if let Some(batch) = self.pending.remove(&rank) {
                if !batch.shapes.is_empty() {
                    out.push(batch);
                }
            }
            out.push(Batch::new(rank, self.tag));
        }
        out
    }
}
