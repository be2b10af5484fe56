// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Range iteration in key order.
//!
//! The iterator keeps a per-level trail of (page id, child position)
//! plus a cursor into the current leaf, and re-reads pages through the
//! buffer on every step - frames rotate freely between calls, and the
//! buffer turns repeat reads into frame hits. When a leaf is exhausted
//! the trail is climbed until some level still has a sibling to the
//! right, then descends back down its leftmost edge.
//!
//! Overwrite-layout leaves are unsorted on disk; loading such a leaf
//! snapshots the live slots into a key-ordered visit list (allocated
//! once, at iterator construction). Interior levels advance by key:
//! "the live slot with the smallest separator above the current one",
//! which is exactly sibling order for sorted pages too.
//!
//! Mutating the tree mid-scan is unsupported; behaviour is unspecified.

use crate::error::ReedResult;
use crate::node::{self, overwrite, sorted};
use crate::tree::tree::BPlusTree;
use std::cmp::Ordering;

/// Streaming cursor over `[min, max]` (both bounds inclusive and
/// optional). Created by [`BPlusTree::range_scan`]; stepped with
/// [`BPlusTree::next_record`]. Allocates its scratches on construction,
/// nothing afterwards.
#[derive(Debug)]
pub struct RangeIterator {
    min: Option<Vec<u8>>,
    max: Option<Vec<u8>>,
    /// Interior trail: pre-resolution page ids, root first.
    ids: Vec<u32>,
    /// Child index (sorted) or slot (overwrite) taken per trail level.
    pos: Vec<usize>,
    leaf_id: u32,
    leaf_pos: usize,
    leaf_len: usize,
    /// Overwrite leaves: slots in key order.
    order: Vec<u16>,
    /// Current separator copy for key-ordered sibling advance.
    key_scratch: Vec<u8>,
    done: bool,
}

impl RangeIterator {
    /// Whether the scan has terminated.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl BPlusTree {
    /// Positions an iterator on the smallest key `>= min` (or the
    /// smallest key at all) and bounds it above by `max`, inclusive.
    pub fn range_scan(
        &mut self,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
    ) -> ReedResult<RangeIterator> {
        if let Some(m) = min {
            self.check_iter_key(m)?;
        }
        if let Some(m) = max {
            self.check_iter_key(m)?;
        }

        let mut it = RangeIterator {
            min: min.map(|m| m.to_vec()),
            max: max.map(|m| m.to_vec()),
            ids: Vec::with_capacity(crate::tree::path::MAX_HEIGHT),
            pos: Vec::with_capacity(crate::tree::path::MAX_HEIGHT),
            leaf_id: 0,
            leaf_pos: 0,
            leaf_len: 0,
            order: Vec::with_capacity(self.layout.ow_leaf_max),
            key_scratch: vec![0u8; self.layout.key_size],
            done: false,
        };

        // Range-mode descent: at each interior node take the child whose
        // subtree brackets `min`, or the leftmost without a bound.
        let mut id = self.path.root();
        for level in 0..crate::tree::path::MAX_HEIGHT {
            let phys = self.mapping.resolve(id);
            let f = self.read_level(phys, level)?;
            let page = self.buffer.frame(f);
            if !node::is_interior(page) {
                break;
            }
            let slot = match (&it.min, node::is_overwrite(page)) {
                (Some(m), true) => {
                    overwrite::child_slot_lub(page, &self.layout, self.compare, m)
                }
                (None, true) => overwrite::min_key_slot(page, &self.layout, true, self.compare),
                (Some(m), false) => {
                    Some(sorted::interior_child_index(page, &self.layout, self.compare, m))
                }
                (None, false) => Some(0),
            };
            let slot = slot.ok_or_else(|| {
                crate::tree::tree::corrupt(phys, "interior page with no live slots")
            })?;
            let child = if node::is_overwrite(page) {
                overwrite::slot_child(page, &self.layout, slot)
            } else {
                sorted::child_ptr(page, &self.layout, slot)
            };
            it.ids.push(id);
            it.pos.push(slot);
            id = child;
        }

        it.leaf_id = id;
        self.load_leaf(&mut it, true)?;
        Ok(it)
    }

    /// Copies the next in-range record into the output buffers. Returns
    /// `Ok(false)` on exhaustion (`max` passed or tree drained).
    pub fn next_record(
        &mut self,
        it: &mut RangeIterator,
        key_out: &mut [u8],
        data_out: &mut [u8],
    ) -> ReedResult<bool> {
        if it.done {
            return Ok(false);
        }
        loop {
            if it.leaf_pos < it.leaf_len {
                let phys = self.mapping.resolve(it.leaf_id);
                let f = self.buffer.read(phys)?;
                let page = self.buffer.frame(f);
                let (key, data) = if node::is_overwrite(page) {
                    let slot = it.order[it.leaf_pos] as usize;
                    (
                        overwrite::slot_key(page, &self.layout, false, slot),
                        overwrite::slot_payload(page, &self.layout, false, slot),
                    )
                } else {
                    (
                        sorted::leaf_key(page, &self.layout, it.leaf_pos),
                        sorted::leaf_data(page, &self.layout, it.leaf_pos),
                    )
                };
                if let Some(max) = &it.max {
                    if (self.compare)(key, max) == Ordering::Greater {
                        it.done = true;
                        return Ok(false);
                    }
                }
                key_out[..self.layout.key_size].copy_from_slice(key);
                data_out[..self.layout.data_size].copy_from_slice(data);
                it.leaf_pos += 1;
                return Ok(true);
            }

            if !self.advance_leaf(it)? {
                it.done = true;
                return Ok(false);
            }
        }
    }

    /// Drains the range into owned pairs. Convenience for callers
    /// without allocation constraints; tests lean on it heavily.
    pub fn collect_range(
        &mut self,
        min: Option<&[u8]>,
        max: Option<&[u8]>,
    ) -> ReedResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut it = self.range_scan(min, max)?;
        let mut key = vec![0u8; self.layout.key_size];
        let mut data = vec![0u8; self.layout.data_size];
        let mut out = Vec::new();
        while self.next_record(&mut it, &mut key, &mut data)? {
            out.push((key.clone(), data.clone()));
        }
        Ok(out)
    }

    fn check_iter_key(&self, key: &[u8]) -> ReedResult<()> {
        if key.len() != self.layout.key_size {
            return Err(crate::error::ReedError::ConfigError {
                reason: format!(
                    "bound is {} bytes, configured key size is {}",
                    key.len(),
                    self.layout.key_size
                ),
            });
        }
        Ok(())
    }

    /// Loads the current leaf: builds the overwrite visit order and
    /// seats the cursor (at `min` on the first leaf, else at 0).
    fn load_leaf(&mut self, it: &mut RangeIterator, first: bool) -> ReedResult<()> {
        let phys = self.mapping.resolve(it.leaf_id);
        let f = self.buffer.read(phys)?;
        let page = self.buffer.frame(f);

        if node::is_overwrite(page) {
            it.order.clear();
            for slot in 0..self.layout.ow_leaf_max {
                if !overwrite::slot_is_record(page, &self.layout, false, slot) {
                    continue;
                }
                let key = overwrite::slot_key(page, &self.layout, false, slot);
                // Insertion into the key-ordered visit list.
                let at = it
                    .order
                    .iter()
                    .position(|&s| {
                        (self.compare)(
                            overwrite::slot_key(page, &self.layout, false, s as usize),
                            key,
                        ) == Ordering::Greater
                    })
                    .unwrap_or(it.order.len());
                it.order.insert(at, slot as u16);
            }
            it.leaf_len = it.order.len();
            it.leaf_pos = 0;
            if first {
                if let Some(min) = &it.min {
                    while it.leaf_pos < it.leaf_len {
                        let slot = it.order[it.leaf_pos] as usize;
                        let key = overwrite::slot_key(page, &self.layout, false, slot);
                        if (self.compare)(key, min) != Ordering::Less {
                            break;
                        }
                        it.leaf_pos += 1;
                    }
                }
            }
        } else {
            it.leaf_len = node::count(page);
            it.leaf_pos = match (first, &it.min) {
                (true, Some(min)) => {
                    sorted::leaf_lower_bound(page, &self.layout, self.compare, min)
                }
                _ => 0,
            };
        }
        Ok(())
    }

    /// Climbs the trail to the next sibling subtree and descends its
    /// leftmost edge to a leaf. False when the root is exhausted.
    fn advance_leaf(&mut self, it: &mut RangeIterator) -> ReedResult<bool> {
        let mut lvl = it.ids.len();
        while lvl > 0 {
            lvl -= 1;
            let phys = self.mapping.resolve(it.ids[lvl]);
            let f = self.read_level(phys, lvl)?;
            let page = self.buffer.frame(f);

            let next = if node::is_overwrite(page) {
                let cur = it.pos[lvl];
                it.key_scratch
                    .copy_from_slice(overwrite::slot_key(page, &self.layout, true, cur));
                overwrite::next_slot_by_key(page, &self.layout, true, self.compare, &it.key_scratch)
            } else {
                let cur = it.pos[lvl];
                if cur < node::count(page) {
                    Some(cur + 1)
                } else {
                    None
                }
            };

            let Some(slot) = next else { continue };
            it.pos[lvl] = slot;
            let mut id = if node::is_overwrite(page) {
                overwrite::slot_child(page, &self.layout, slot)
            } else {
                sorted::child_ptr(page, &self.layout, slot)
            };
            it.ids.truncate(lvl + 1);
            it.pos.truncate(lvl + 1);

            // Leftmost descent back to leaf depth.
            let mut level = lvl + 1;
            loop {
                let phys = self.mapping.resolve(id);
                let f = self.read_level(phys, level)?;
                let page = self.buffer.frame(f);
                if !node::is_interior(page) {
                    break;
                }
                let slot = if node::is_overwrite(page) {
                    overwrite::min_key_slot(page, &self.layout, true, self.compare).ok_or_else(
                        || crate::tree::tree::corrupt(phys, "interior page with no live slots"),
                    )?
                } else {
                    0
                };
                it.ids.push(id);
                it.pos.push(slot);
                id = if node::is_overwrite(page) {
                    overwrite::slot_child(page, &self.layout, slot)
                } else {
                    sorted::child_ptr(page, &self.layout, slot)
                };
                level += 1;
            }
            it.leaf_id = id;
            self.load_leaf(it, false)?;
            return Ok(true);
        }
        Ok(false)
    }
}
