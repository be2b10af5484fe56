// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Active path: the root-to-leaf trail of the operation in flight.
//!
//! Holds the PRE-resolution physical ids - the pointer values actually
//! stored in each parent, before the mapping table redirects them - plus
//! the child index taken at each interior level. Entry 0 is the root and
//! is the only place the engine tracks the root's location at all; the
//! root never appears in the mapping table.
//!
//! The path is a stack, pushed during descent and truncated back to the
//! root at the start of the next operation, which keeps the reentrant
//! compaction callback from ever seeing a half-updated array.

/// Tree levels are bounded by the page fan-out; sixteen covers any
/// device this engine can address.
pub const MAX_HEIGHT: usize = 16;

#[derive(Debug)]
pub struct ActivePath {
    /// ids[l]: the id stored in level l-1 for the node at level l.
    ids: Vec<u32>,
    /// taken[l]: child index (or slot) followed at interior level l.
    taken: Vec<usize>,
}

impl ActivePath {
    pub fn new(root: u32) -> Self {
        let mut ids = Vec::with_capacity(MAX_HEIGHT);
        ids.push(root);
        Self {
            ids,
            taken: Vec::with_capacity(MAX_HEIGHT),
        }
    }

    pub fn root(&self) -> u32 {
        self.ids[0]
    }

    pub fn set_root(&mut self, id: u32) {
        self.ids[0] = id;
    }

    /// Drops everything below the root before a fresh descent.
    pub fn restart(&mut self) {
        self.ids.truncate(1);
        self.taken.clear();
    }

    /// Records the step from the current deepest node to `child`,
    /// reached through `taken_idx`.
    pub fn push(&mut self, taken_idx: usize, child: u32) {
        debug_assert!(self.ids.len() < MAX_HEIGHT);
        self.taken.push(taken_idx);
        self.ids.push(child);
    }

    /// Number of levels currently recorded.
    pub fn depth(&self) -> usize {
        self.ids.len()
    }

    /// Pre-resolution id of the node at `level` (0 = root).
    pub fn id(&self, level: usize) -> u32 {
        self.ids[level]
    }

    /// Re-anchors one level after its parent's stored pointer changed.
    /// The path invariant is that `id(l)` always equals the pointer
    /// value the parent currently stores for level `l`.
    pub fn set_id(&mut self, level: usize, id: u32) {
        self.ids[level] = id;
    }

    /// Swaps every occurrence of `old` for `new`. Used when a parent
    /// rewrite embedded a resolved pointer underneath an in-flight
    /// operation.
    pub fn replace_id(&mut self, old: u32, new: u32) {
        for id in self.ids.iter_mut() {
            if *id == old {
                *id = new;
            }
        }
    }

    /// Child index followed at interior `level`.
    pub fn taken(&self, level: usize) -> usize {
        self.taken[level]
    }
}
