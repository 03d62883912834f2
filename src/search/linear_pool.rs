//! `LinearPool`: a [`SearchBuffer`] fused with a dense global visited set (spec §4.9).
//!
//! Distinct from `SearchBuffer`'s own per-entry "popped" cursor: `vis_` here tracks
//! whether an id has ever been pushed into *any* beam during this query, independent
//! of whether this particular buffer instance has expanded it yet. Used by search
//! variants that need both concerns coupled into one object instead of threading a
//! separate visited set alongside the beam.

use super::buffer::SearchBuffer;
use super::visited::DenseVisited;

pub struct LinearPool {
    beam: SearchBuffer,
    vis: DenseVisited,
}

impl LinearPool {
    pub fn new(capacity: usize, n: usize) -> Self {
        LinearPool {
            beam: SearchBuffer::new(capacity),
            vis: DenseVisited::new(n),
        }
    }

    pub fn visited(&self, id: u32) -> bool {
        self.vis.get(id)
    }

    pub fn mark_visited(&mut self, id: u32) {
        self.vis.set(id);
    }

    /// `!is_full(dist)` — whether a candidate at this distance could still be admitted.
    pub fn small_enough(&self, dist: f32) -> bool {
        !self.beam.is_full(dist)
    }

    pub fn insert(&mut self, id: u32, dist: f32) {
        self.beam.insert(id, dist);
    }

    pub fn has_next(&self) -> bool {
        self.beam.has_next()
    }

    pub fn next_id(&self) -> Option<u32> {
        self.beam.next_id()
    }

    pub fn pop(&mut self) -> Option<(u32, f32)> {
        self.beam.pop()
    }

    pub fn copy_results_to(&self, ids: &mut [u32]) -> usize {
        self.beam.copy_results_to(ids)
    }

    pub fn len(&self) -> usize {
        self.beam.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beam.is_empty()
    }
}
