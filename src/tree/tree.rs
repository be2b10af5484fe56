// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! The B+-tree engine.
//!
//! ## Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ BPlusTree                                   │
//! ├─────────────────────────────────────────────┤
//! │ - buffer: PageBuffer (frames, free map,     │
//! │           erased window, placement cursor)  │
//! │ - mapping: MappingTable (prev -> curr)      │
//! │ - path: ActivePath (root anchor + descent)  │
//! │ - layout: NodeLayout (page geometry)        │
//! └─────────────────────────────────────────────┘
//!            │ read / write / overwrite
//!            ▼
//! ┌─────────────────────┐     isValid / pageMoved
//! │ PageBuffer          │ ◄── observer calls back
//! └─────────┬───────────┘     into the tree state
//!           ▼
//!    StorageDriver (file | RAM | flash)
//! ```
//!
//! The buffer may call back into tree state (mapping, path) from inside
//! `ensure_space`, which itself runs inside `put`. The observer struct
//! borrows exactly the tree fields that reentrancy touches, so the
//! borrow checker proves the callback can never observe a frame the
//! caller still holds.
//!
//! ## Duplicate keys
//!
//! `put` of an existing key replaces the stored data in every mode; no
//! two live records ever share a key.

use crate::buffer::{PageBuffer, PageObserver, SCRATCH_FRAME};
use crate::error::{ReedError, ReedResult};
use crate::mapping::MappingTable;
use crate::node::{self, overwrite, sorted, KeyCompare, NodeLayout};
use crate::storage::StorageDriver;
use crate::tree::path::{ActivePath, MAX_HEIGHT};
use crate::tree::types::{StorageMode, TreeConfig};
use std::cmp::Ordering;

/// Pages reserved ahead of every insert: bounds the worst-case split
/// cascade (leaf + interiors + new root, two pages each).
const SPLIT_RESERVE: u32 = 8;

/// Page-oriented B+-tree index over a storage driver.
pub struct BPlusTree {
    pub(super) buffer: PageBuffer,
    pub(super) mapping: MappingTable,
    pub(super) path: ActivePath,
    pub(super) layout: NodeLayout,
    pub(super) mode: StorageMode,
    pub(super) compare: KeyCompare,
    pub(super) height: usize,
    /// Separator scratch; split propagation alternates between the two.
    key_a: Vec<u8>,
    key_b: Vec<u8>,
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("mode", &self.mode)
            .field("height", &self.height)
            .field("root", &self.path.root())
            .field("mappings", &self.mapping.len())
            .finish()
    }
}

/// Borrow of the tree state the buffer's callbacks need. Constructed
/// inline at every buffer call that can place, compact, or relocate.
pub(super) struct TreeObserver<'a> {
    pub mapping: &'a mut MappingTable,
    pub path: &'a mut ActivePath,
    pub layout: &'a NodeLayout,
    pub cow: bool,
}

impl PageObserver for TreeObserver<'_> {
    fn is_remapped(&self, page: u32) -> bool {
        self.cow && self.mapping.contains_prev(page)
    }

    fn page_moved(&mut self, _prev: u32, curr: u32, frame: &mut [u8]) -> bool {
        let mut changed = false;
        if self.cow && node::is_interior(frame) && !node::is_overwrite(frame) {
            // Embed current resolutions and consume the mappings, like
            // `update_pointers`, but keep the active path in sync: an
            // in-flight operation above us must keep seeing the ids the
            // parents actually store.
            for i in 0..=node::count(frame) {
                let old = sorted::child_ptr(frame, self.layout, i);
                let new = self.mapping.resolve(old);
                if new != old {
                    sorted::set_child_ptr(frame, self.layout, i, new);
                    self.mapping.remove(old);
                    self.path.replace_id(old, new);
                    changed = true;
                }
            }
        }
        if node::is_root(frame) {
            self.path.set_root(curr);
        }
        changed
    }
}

pub(super) fn corrupt(page: u32, reason: &str) -> ReedError {
    debug_assert!(false, "page {} corrupted: {}", page, reason);
    ReedError::CorruptedPage {
        page,
        reason: reason.to_string(),
    }
}

impl BPlusTree {
    /// Formats a fresh tree: validates the configuration against the
    /// driver and writes an empty root leaf.
    pub fn create(driver: Box<dyn StorageDriver>, config: TreeConfig) -> ReedResult<Self> {
        Self::build(driver, config, true)
    }

    /// Opens an existing tree: scans for the newest root page, walks the
    /// tree to rebuild the free map, and resumes the id counter. The
    /// on-disk image must be self-consistent, which a clean [`flush`]
    /// guarantees (it drains the mapping table before syncing).
    ///
    /// On erase-before-write media the erased window is reset; the first
    /// insert re-establishes it by erasing ahead of the cursor.
    ///
    /// [`flush`]: BPlusTree::flush
    pub fn open(driver: Box<dyn StorageDriver>, config: TreeConfig) -> ReedResult<Self> {
        Self::build(driver, config, false)
    }

    fn build(driver: Box<dyn StorageDriver>, config: TreeConfig, fresh: bool) -> ReedResult<Self> {
        config.validate()?;
        if driver.page_size() != config.page_size {
            return Err(ReedError::ConfigError {
                reason: format!(
                    "driver page size {} does not match configured {}",
                    driver.page_size(),
                    config.page_size
                ),
            });
        }
        if config.mode == StorageMode::UpdateInPlace && driver.requires_erase() {
            return Err(ReedError::ConfigError {
                reason: "update-in-place mode needs byte-addressable media".to_string(),
            });
        }

        let layout = NodeLayout::new(config.page_size, config.key_size, config.data_size)?;
        let ow = config.mode == StorageMode::InPageOverwrite;
        let buffer = PageBuffer::new(
            driver,
            config.frame_count,
            config.erase_block_pages,
            if ow { 0xFF } else { 0x00 },
            config.mode != StorageMode::CopyOnWrite,
            fresh,
        )?;

        let mut tree = Self {
            buffer,
            mapping: MappingTable::with_byte_budget(config.mapping_bytes),
            path: ActivePath::new(0),
            layout,
            mode: config.mode,
            compare: config.compare,
            height: 1,
            key_a: vec![0u8; config.key_size],
            key_b: vec![0u8; config.key_size],
        };

        if fresh {
            tree.buffer.init_frame(SCRATCH_FRAME);
            node::init_header(tree.buffer.frame_mut(SCRATCH_FRAME), true, false, ow);
            let root = tree.write_frame(SCRATCH_FRAME)?;
            tree.path.set_root(root);
        } else {
            tree.recover()?;
        }
        Ok(tree)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stats(&self) -> &crate::buffer::BufferStats {
        self.buffer.stats()
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Live mappings right now (copy-on-write bookkeeping).
    pub fn mapping_len(&self) -> usize {
        self.mapping.len()
    }

    // --- buffer access with the observer wired up ---

    fn cow(&self) -> bool {
        self.mode == StorageMode::CopyOnWrite
    }

    fn reserve(&mut self, n: u32) -> ReedResult<()> {
        let cow = self.cow();
        let Self {
            buffer,
            mapping,
            path,
            layout,
            ..
        } = self;
        buffer.ensure_space(
            n,
            &mut TreeObserver {
                mapping,
                path,
                layout,
                cow,
            },
        )
    }

    pub(super) fn write_frame(&mut self, idx: usize) -> ReedResult<u32> {
        let cow = self.cow();
        let Self {
            buffer,
            mapping,
            path,
            layout,
            ..
        } = self;
        buffer.write(
            idx,
            &mut TreeObserver {
                mapping,
                path,
                layout,
                cow,
            },
        )
    }

    /// Reads a node, pinning the root to its reserved frame.
    pub(super) fn read_level(&mut self, phys: u32, level: usize) -> ReedResult<usize> {
        if level == 0 {
            let rf = self.buffer.root_frame();
            self.buffer.read_pinned(phys, rf)
        } else {
            self.buffer.read(phys)
        }
    }

    /// Scratch frame for a split whose source occupies `src`: with two
    /// frames the root lives in frame 0, so the split target dodges it.
    fn scratch_for(&self, src: usize) -> usize {
        if src == SCRATCH_FRAME {
            1
        } else {
            SCRATCH_FRAME
        }
    }

    // --- lookup ---

    /// Point lookup. Copies the record data into `out` and returns
    /// `Ok(Some(()))`, or `Ok(None)` when the key is absent.
    pub fn get(&mut self, key: &[u8], out: &mut [u8]) -> ReedResult<Option<()>> {
        self.check_key(key)?;
        if out.len() < self.layout.data_size {
            return Err(ReedError::ConfigError {
                reason: format!(
                    "output buffer of {} bytes cannot hold {} data bytes",
                    out.len(),
                    self.layout.data_size
                ),
            });
        }

        let mut id = self.path.root();
        for level in 0..MAX_HEIGHT {
            let phys = self.mapping.resolve(id);
            let f = self.read_level(phys, level)?;
            let page = self.buffer.frame(f);
            if node::is_interior(page) {
                id = if node::is_overwrite(page) {
                    let slot = overwrite::child_slot_lub(page, &self.layout, self.compare, key)
                        .ok_or_else(|| corrupt(phys, "interior page with no live slots"))?;
                    overwrite::slot_child(page, &self.layout, slot)
                } else {
                    let idx = sorted::interior_child_index(page, &self.layout, self.compare, key);
                    sorted::child_ptr(page, &self.layout, idx)
                };
                continue;
            }

            // Leaf.
            return Ok(if node::is_overwrite(page) {
                overwrite::find_exact(page, &self.layout, false, self.compare, key).map(|slot| {
                    out[..self.layout.data_size]
                        .copy_from_slice(overwrite::slot_payload(page, &self.layout, false, slot));
                })
            } else {
                sorted::leaf_find(page, &self.layout, self.compare, key)
                    .ok()
                    .map(|pos| {
                        out[..self.layout.data_size]
                            .copy_from_slice(sorted::leaf_data(page, &self.layout, pos));
                    })
            });
        }
        Err(corrupt(self.path.root(), "descent did not reach a leaf"))
    }

    // --- insert ---

    /// Ordered insert (upsert). Fails with `StorageFull` when the space
    /// manager cannot reserve the worst-case split cascade, in which
    /// case nothing was written and the tree is unchanged.
    pub fn put(&mut self, key: &[u8], data: &[u8]) -> ReedResult<()> {
        self.check_key(key)?;
        if data.len() != self.layout.data_size {
            return Err(ReedError::ConfigError {
                reason: format!(
                    "data is {} bytes, configured size is {}",
                    data.len(),
                    self.layout.data_size
                ),
            });
        }

        self.reserve(SPLIT_RESERVE)?;
        self.descend_for_put(key)?;
        match self.mode {
            StorageMode::UpdateInPlace => self.put_in_place(key, data),
            StorageMode::CopyOnWrite => self.put_cow(key, data),
            StorageMode::InPageOverwrite => self.put_overwrite(key, data),
        }
    }

    fn check_key(&self, key: &[u8]) -> ReedResult<()> {
        if key.len() != self.layout.key_size {
            return Err(ReedError::ConfigError {
                reason: format!(
                    "key is {} bytes, configured size is {}",
                    key.len(),
                    self.layout.key_size
                ),
            });
        }
        Ok(())
    }

    /// Rebuilds the active path for `key`: pre-resolution ids and the
    /// child index taken at every interior level.
    fn descend_for_put(&mut self, key: &[u8]) -> ReedResult<()> {
        self.path.restart();
        for level in 0..MAX_HEIGHT {
            let vis = self.path.id(level);
            let phys = self.mapping.resolve(vis);
            let f = self.read_level(phys, level)?;
            let page = self.buffer.frame(f);
            if !node::is_interior(page) {
                return Ok(());
            }
            let (idx, child) = if node::is_overwrite(page) {
                let slot = overwrite::child_slot_lub(page, &self.layout, self.compare, key)
                    .ok_or_else(|| corrupt(phys, "interior page with no live slots"))?;
                (slot, overwrite::slot_child(page, &self.layout, slot))
            } else {
                let idx = sorted::interior_child_index(page, &self.layout, self.compare, key);
                (idx, sorted::child_ptr(page, &self.layout, idx))
            };
            self.path.push(idx, child);
        }
        Err(corrupt(self.path.root(), "descent did not reach a leaf"))
    }

    // --- update-in-place mode ---

    fn put_in_place(&mut self, key: &[u8], data: &[u8]) -> ReedResult<()> {
        let leaf_level = self.path.depth() - 1;
        let leaf_id = self.path.id(leaf_level);
        let f = self.read_level(leaf_id, leaf_level)?;

        let outcome = {
            let Self {
                buffer,
                layout,
                compare,
                ..
            } = self;
            sorted::leaf_insert(buffer.frame_mut(f), layout, *compare, key, data)
        };
        match outcome {
            sorted::LeafInsert::Full => self.split_leaf_in_place(f, key, data),
            _ => self.buffer.overwrite(f),
        }
    }

    fn split_leaf_in_place(&mut self, f: usize, key: &[u8], data: &[u8]) -> ReedResult<()> {
        let leaf_level = self.path.depth() - 1;
        let was_root = leaf_level == 0;
        let dst = self.scratch_for(f);
        self.buffer.init_frame(dst);
        {
            let Self {
                buffer,
                layout,
                compare,
                key_a,
                ..
            } = self;
            let (src, right) = buffer.frames_pair_mut(f, dst);
            node::init_header(right, false, false, false);
            sorted::leaf_split_into(src, right, layout, key_a);

            let target: &mut [u8] = if (*compare)(key, key_a) == Ordering::Less {
                &mut *src
            } else {
                &mut *right
            };
            let outcome = sorted::leaf_insert(target, layout, *compare, key, data);
            debug_assert!(!matches!(outcome, sorted::LeafInsert::Full));
            if was_root {
                node::set_root_flag(src, false);
            }
        }
        self.buffer.overwrite(f)?; // left half keeps its address
        let right_id = self.write_frame(dst)?;
        self.propagate_in_place(leaf_level, right_id)
    }

    /// Walks the pending `(separator, right child)` up the active path,
    /// overwriting ancestors in place and splitting the full ones.
    fn propagate_in_place(&mut self, mut child_level: usize, mut right_id: u32) -> ReedResult<()> {
        let mut sep_in_a = true;
        while child_level > 0 {
            let level = child_level - 1;
            let pid = self.path.id(level);
            let f = self.read_level(pid, level)?;

            let fitted = {
                let Self {
                    buffer,
                    layout,
                    compare,
                    key_a,
                    key_b,
                    ..
                } = self;
                let sep = if sep_in_a { &key_a[..] } else { &key_b[..] };
                sorted::interior_insert(buffer.frame_mut(f), layout, *compare, sep, right_id)
            };
            if fitted {
                return self.buffer.overwrite(f);
            }

            let dst = self.scratch_for(f);
            self.buffer.init_frame(dst);
            {
                let Self {
                    buffer,
                    layout,
                    compare,
                    key_a,
                    key_b,
                    ..
                } = self;
                let (src, right) = buffer.frames_pair_mut(f, dst);
                node::init_header(right, false, true, false);
                let (sep, promoted) = if sep_in_a {
                    (&key_a[..], &mut key_b[..])
                } else {
                    (&key_b[..], &mut key_a[..])
                };
                sorted::interior_split_into(src, right, layout, promoted);

                let target: &mut [u8] = if (*compare)(sep, promoted) == Ordering::Less {
                    &mut *src
                } else {
                    &mut *right
                };
                let ok = sorted::interior_insert(target, layout, *compare, sep, right_id);
                debug_assert!(ok);
                if level == 0 {
                    node::set_root_flag(src, false);
                }
            }
            self.buffer.overwrite(f)?;
            right_id = self.write_frame(dst)?;
            sep_in_a = !sep_in_a; // the promoted key is the new pending separator
            child_level = level;
        }
        // Split rippled above the old root; the left half kept its id.
        self.new_root_sorted(self.path.root(), right_id, sep_in_a)
    }

    fn new_root_sorted(&mut self, left: u32, right: u32, sep_in_a: bool) -> ReedResult<()> {
        self.buffer.init_frame(SCRATCH_FRAME);
        {
            let Self {
                buffer,
                layout,
                key_a,
                key_b,
                ..
            } = self;
            let frame = buffer.frame_mut(SCRATCH_FRAME);
            node::init_header(frame, true, true, false);
            node::set_count(frame, 1);
            let sep = if sep_in_a { &key_a[..] } else { &key_b[..] };
            let off = layout.interior_key_off(0);
            frame[off..off + layout.key_size].copy_from_slice(sep);
            sorted::set_child_ptr(frame, layout, 0, left);
            sorted::set_child_ptr(frame, layout, 1, right);
        }
        let root = self.write_frame(SCRATCH_FRAME)?;
        self.path.set_root(root);
        self.height += 1;
        Ok(())
    }

    // --- copy-on-write mode ---

    fn put_cow(&mut self, key: &[u8], data: &[u8]) -> ReedResult<()> {
        let leaf_level = self.path.depth() - 1;
        let leaf_vis = self.path.id(leaf_level);
        let leaf_phys = self.mapping.resolve(leaf_vis);
        let f = self.read_level(leaf_phys, leaf_level)?;

        let outcome = {
            let Self {
                buffer,
                layout,
                compare,
                ..
            } = self;
            sorted::leaf_insert(buffer.frame_mut(f), layout, *compare, key, data)
        };
        match outcome {
            sorted::LeafInsert::Full => self.split_leaf_cow(f, key, data),
            _ => {
                node::set_prev_id(self.buffer.frame_mut(f), Some(leaf_phys));
                let new_id = self.write_frame(f)?;
                self.buffer.retire(leaf_phys);
                self.relink(leaf_level, new_id)
            }
        }
    }

    /// Reconnects a rewritten node to its parent: the root moves in the
    /// active path, everything else goes through the mapping table, and
    /// mapping pressure falls back to the ancestor-rewrite walk.
    ///
    /// The superseded id is re-read from the active path HERE, not
    /// captured by the caller: a compaction during the caller's write
    /// may have embedded a resolution into the parent, and the path
    /// tracks that.
    fn relink(&mut self, level: usize, new_id: u32) -> ReedResult<()> {
        if level == 0 {
            self.path.set_root(new_id);
            return Ok(());
        }
        let old_vis = self.path.id(level);
        if new_id == old_vis {
            // Placement handed back the very id the parent stores.
            self.mapping.remove(old_vis);
            return Ok(());
        }
        self.fix_mappings(level, new_id)
    }

    /// Installs `path[child_level] -> curr`; when the table is full,
    /// rewrites ancestors up the active path (each rewrite embeds
    /// resolved child pointers and deletes the consumed mappings,
    /// draining slots) and retries at each level. Reaching the root
    /// installs the new root id in the active path instead - the root
    /// is never mapped.
    fn fix_mappings(&mut self, child_level: usize, curr: u32) -> ReedResult<()> {
        let prev = self.path.id(child_level);
        if self.mapping.add(prev, curr).is_ok() {
            return Ok(());
        }

        let mut curr = curr;
        let mut lvl = child_level;
        while lvl > 0 {
            let level = lvl - 1;
            let pvis = self.path.id(level);
            let pphys = self.mapping.resolve(pvis);
            let f = self.read_level(pphys, level)?;
            {
                let Self {
                    buffer,
                    layout,
                    mapping,
                    path,
                    ..
                } = self;
                let frame = buffer.frame_mut(f);
                let idx = path.taken(level);
                let stored = path.id(lvl);
                debug_assert_eq!(sorted::child_ptr(frame, layout, idx), stored);
                sorted::set_child_ptr(frame, layout, idx, curr);
                mapping.remove(stored);
                path.set_id(lvl, curr);
                sorted::update_pointers(frame, layout, mapping);
                node::set_prev_id(frame, Some(pphys));
            }
            let new_p = self.write_frame(f)?;
            self.buffer.retire(pphys);

            if level == 0 {
                self.path.set_root(new_p);
                return Ok(());
            }
            // Re-read: the write above may have synced this level.
            let pvis_now = self.path.id(level);
            if new_p == pvis_now {
                self.mapping.remove(pvis_now);
                return Ok(());
            }
            if self.mapping.add(pvis_now, new_p).is_ok() {
                return Ok(());
            }
            curr = new_p;
            lvl = level;
        }
        Ok(())
    }

    fn split_leaf_cow(&mut self, f: usize, key: &[u8], data: &[u8]) -> ReedResult<()> {
        let leaf_level = self.path.depth() - 1;
        let leaf_vis = self.path.id(leaf_level);
        let leaf_phys = self.mapping.resolve(leaf_vis);
        let was_root = leaf_level == 0;

        let dst = self.scratch_for(f);
        self.buffer.init_frame(dst);
        {
            let Self {
                buffer,
                layout,
                compare,
                key_a,
                ..
            } = self;
            let (src, right) = buffer.frames_pair_mut(f, dst);
            node::init_header(right, false, false, false);
            sorted::leaf_split_into(src, right, layout, key_a);

            let target: &mut [u8] = if (*compare)(key, key_a) == Ordering::Less {
                &mut *src
            } else {
                &mut *right
            };
            let outcome = sorted::leaf_insert(target, layout, *compare, key, data);
            debug_assert!(!matches!(outcome, sorted::LeafInsert::Full));
            if was_root {
                node::set_root_flag(src, false);
            }
            node::set_prev_id(src, Some(leaf_phys));
        }
        let left = self.write_frame(f)?;
        let right = self.write_frame(dst)?;
        self.buffer.retire(leaf_phys);
        self.mapping.remove(self.path.id(leaf_level));
        self.propagate_cow(leaf_level, left, right)
    }

    /// Structural changes cannot ride the mapping table (it redirects
    /// one id, not one-into-two), so each level's parent is rewritten
    /// fresh; only the final, fitting parent re-enters via `relink`.
    fn propagate_cow(&mut self, mut child_level: usize, mut left: u32, mut right: u32) -> ReedResult<()> {
        let mut sep_in_a = true;
        loop {
            if child_level == 0 {
                return self.new_root_sorted(left, right, sep_in_a);
            }
            let level = child_level - 1;
            let pvis = self.path.id(level);
            let pphys = self.mapping.resolve(pvis);
            let f = self.read_level(pphys, level)?;

            let fitted = {
                let Self {
                    buffer,
                    layout,
                    compare,
                    mapping,
                    path,
                    key_a,
                    key_b,
                    ..
                } = self;
                let frame = buffer.frame_mut(f);
                let idx = path.taken(level);
                sorted::set_child_ptr(frame, layout, idx, left);
                mapping.remove(path.id(child_level));
                path.set_id(child_level, left);
                sorted::update_pointers(frame, layout, mapping);
                let sep = if sep_in_a { &key_a[..] } else { &key_b[..] };
                sorted::interior_insert(frame, layout, *compare, sep, right)
            };
            if fitted {
                node::set_prev_id(self.buffer.frame_mut(f), Some(pphys));
                let new_p = self.write_frame(f)?;
                self.buffer.retire(pphys);
                return self.relink(level, new_p);
            }

            // Parent full: split it and keep walking up.
            let dst = self.scratch_for(f);
            self.buffer.init_frame(dst);
            {
                let Self {
                    buffer,
                    layout,
                    compare,
                    key_a,
                    key_b,
                    ..
                } = self;
                let (src, right_frame) = buffer.frames_pair_mut(f, dst);
                node::init_header(right_frame, false, true, false);
                let (sep, promoted) = if sep_in_a {
                    (&key_a[..], &mut key_b[..])
                } else {
                    (&key_b[..], &mut key_a[..])
                };
                sorted::interior_split_into(src, right_frame, layout, promoted);

                let target: &mut [u8] = if (*compare)(sep, promoted) == Ordering::Less {
                    &mut *src
                } else {
                    &mut *right_frame
                };
                let ok = sorted::interior_insert(target, layout, *compare, sep, right);
                debug_assert!(ok);
                if level == 0 {
                    node::set_root_flag(src, false);
                }
                node::set_prev_id(src, Some(pphys));
            }
            let new_left = self.write_frame(f)?;
            let new_right = self.write_frame(dst)?;
            self.buffer.retire(pphys);

            left = new_left;
            right = new_right;
            sep_in_a = !sep_in_a;
            child_level = level;
        }
    }

    // --- in-page-overwrite mode ---

    fn put_overwrite(&mut self, key: &[u8], data: &[u8]) -> ReedResult<()> {
        let leaf_level = self.path.depth() - 1;
        let leaf_id = self.path.id(leaf_level);
        let f = self.read_level(leaf_id, leaf_level)?;

        let fitted = {
            let Self {
                buffer,
                layout,
                compare,
                ..
            } = self;
            let frame = buffer.frame_mut(f);
            let existing = overwrite::find_exact(frame, layout, false, *compare, key);
            match overwrite::find_free_slot(frame, layout, false) {
                Some(slot) => {
                    overwrite::occupy_slot(frame, layout, false, slot, key, data);
                    if let Some(old) = existing {
                        overwrite::invalidate_slot(frame, layout, false, old);
                    }
                    true
                }
                None => false,
            }
        };
        if fitted {
            // Bit-clearing rewrite at the same address: the whole point
            // of this mode.
            return self.buffer.overwrite(f);
        }
        self.split_leaf_overwrite(f, key, data)
    }

    /// A full overwrite leaf either relocates (compaction alone frees
    /// slots: invalidated records were hiding capacity) or genuinely
    /// splits. Either way the old page dies and the parent's slot for it
    /// is replaced.
    fn split_leaf_overwrite(&mut self, f: usize, key: &[u8], data: &[u8]) -> ReedResult<()> {
        let leaf_level = self.path.depth() - 1;
        let leaf_id = self.path.id(leaf_level);
        let was_root = leaf_level == 0;

        let survivors = {
            let Self {
                buffer,
                layout,
                compare,
                ..
            } = self;
            overwrite::compact_sort(buffer.frame_mut(f), layout, false, *compare)
        };

        if survivors < self.layout.ow_leaf_max {
            // Relocate: the compacted image takes the pending record.
            {
                let Self {
                    buffer,
                    layout,
                    compare,
                    ..
                } = self;
                let frame = buffer.frame_mut(f);
                let ok = overwrite::upsert(frame, layout, false, *compare, key, data);
                debug_assert!(ok);
                node::set_prev_id(frame, Some(leaf_id));
            }
            let new_id = self.write_frame(f)?;
            self.buffer.retire(leaf_id);
            if was_root {
                self.path.set_root(new_id);
                return Ok(());
            }
            self.capture_max_key(f)?;
            return self.replace_child_overwrite(leaf_level, leaf_id, new_id, None);
        }

        let dst = self.scratch_for(f);
        self.buffer.init_frame(dst);
        {
            let Self {
                buffer,
                layout,
                compare,
                ..
            } = self;
            let (src, right) = buffer.frames_pair_mut(f, dst);
            node::init_header(right, false, false, true);
            overwrite::split_into(src, right, layout, false, survivors);

            let target = if (*compare)(key, overwrite::slot_key(right, layout, false, 0))
                == Ordering::Less
            {
                &mut *src
            } else {
                &mut *right
            };
            let ok = overwrite::upsert(target, layout, false, *compare, key, data);
            debug_assert!(ok);
            if was_root {
                node::set_root_flag(src, false);
            }
            node::set_prev_id(src, Some(leaf_id));
        }
        let left = self.write_frame(f)?;
        let right_id = self.write_frame(dst)?;
        self.buffer.retire(leaf_id);
        self.capture_separators(f, dst, false)?;
        self.replace_child_overwrite(leaf_level, leaf_id, left, Some(right_id))
    }

    /// Copies the maxima of two split halves into the separator
    /// scratches: overwrite-interior slots carry the child's greatest
    /// key at the time the slot is written.
    fn capture_separators(&mut self, left_f: usize, right_f: usize, interior: bool) -> ReedResult<()> {
        let Self {
            buffer,
            layout,
            compare,
            key_a,
            key_b,
            ..
        } = self;
        let (left, right) = buffer.frames_pair_mut(left_f, right_f);
        let ls = overwrite::max_key_slot(left, layout, interior, *compare)
            .ok_or_else(|| corrupt(0, "split produced an empty left half"))?;
        key_a.copy_from_slice(overwrite::slot_key(left, layout, interior, ls));
        let rs = overwrite::max_key_slot(right, layout, interior, *compare)
            .ok_or_else(|| corrupt(0, "split produced an empty right half"))?;
        key_b.copy_from_slice(overwrite::slot_key(right, layout, interior, rs));
        Ok(())
    }

    /// Copies the maximum key of the frame's (leaf) image into the left
    /// separator scratch.
    fn capture_max_key(&mut self, f: usize) -> ReedResult<()> {
        let Self {
            buffer,
            layout,
            compare,
            key_a,
            ..
        } = self;
        let frame = buffer.frame_mut(f);
        let slot = overwrite::max_key_slot(frame, layout, false, *compare)
            .ok_or_else(|| corrupt(0, "relocated page has no live records"))?;
        key_a.copy_from_slice(overwrite::slot_key(frame, layout, false, slot));
        Ok(())
    }

    /// Replaces the parent's slot for `old_child` with one (relocation)
    /// or two (split) fresh slots by in-place bit clearing. A parent
    /// without room compacts: if invalidated slots were hiding capacity
    /// it relocates itself, otherwise it splits - either way the walk
    /// continues one level up. Separators ride in the key scratches
    /// (left in a, right in b).
    fn replace_child_overwrite(
        &mut self,
        mut child_level: usize,
        mut old_child: u32,
        mut left: u32,
        mut right: Option<u32>,
    ) -> ReedResult<()> {
        loop {
            if child_level == 0 {
                // Only a genuine split ripples past the old root;
                // relocations re-anchor the path where they happen.
                let r = right.ok_or_else(|| corrupt(left, "root relocation escaped its level"))?;
                return self.new_root_overwrite(left, r);
            }
            let level = child_level - 1;
            let pid = self.path.id(level);
            let f = self.read_level(pid, level)?;
            let needed = if right.is_some() { 2 } else { 1 };

            let fitted = {
                let Self {
                    buffer,
                    layout,
                    key_a,
                    key_b,
                    ..
                } = self;
                let frame = buffer.frame_mut(f);
                let slot = overwrite::find_child_slot(frame, layout, old_child)
                    .ok_or_else(|| corrupt(pid, "parent has no slot for replaced child"))?;
                overwrite::invalidate_slot(frame, layout, true, slot);
                if overwrite::free_slot_count(frame, layout, true) >= needed {
                    let s = overwrite::find_free_slot(frame, layout, true)
                        .ok_or_else(|| corrupt(pid, "free count lied about a slot"))?;
                    overwrite::occupy_slot(frame, layout, true, s, key_a, &left.to_le_bytes());
                    if let Some(r) = right {
                        let s = overwrite::find_free_slot(frame, layout, true)
                            .ok_or_else(|| corrupt(pid, "free count lied about a slot"))?;
                        overwrite::occupy_slot(frame, layout, true, s, key_b, &r.to_le_bytes());
                    }
                    true
                } else {
                    false
                }
            };
            if fitted {
                return self.buffer.overwrite(f);
            }

            // No room: compact the parent (the old child's slot is
            // already invalidated and falls out here).
            let survivors = {
                let Self {
                    buffer,
                    layout,
                    compare,
                    ..
                } = self;
                overwrite::compact_sort(buffer.frame_mut(f), layout, true, *compare)
            };

            if survivors + needed <= self.layout.ow_interior_max {
                // Parent relocation: compaction freed enough slots.
                {
                    let Self {
                        buffer,
                        layout,
                        key_a,
                        key_b,
                        ..
                    } = self;
                    let frame = buffer.frame_mut(f);
                    let s = overwrite::find_free_slot(frame, layout, true)
                        .ok_or_else(|| corrupt(pid, "compaction freed no slot"))?;
                    overwrite::occupy_slot(frame, layout, true, s, key_a, &left.to_le_bytes());
                    if let Some(r) = right {
                        let s = overwrite::find_free_slot(frame, layout, true)
                            .ok_or_else(|| corrupt(pid, "compaction freed no slot"))?;
                        overwrite::occupy_slot(frame, layout, true, s, key_b, &r.to_le_bytes());
                    }
                    node::set_prev_id(frame, Some(pid));
                }
                let new_id = self.write_frame(f)?;
                self.buffer.retire(pid);
                if level == 0 {
                    self.path.set_root(new_id);
                    return Ok(());
                }
                // The parent's own separator for the walk up.
                {
                    let Self {
                        buffer,
                        layout,
                        compare,
                        key_a,
                        ..
                    } = self;
                    let frame = buffer.frame_mut(f);
                    let slot = overwrite::max_key_slot(frame, layout, true, *compare)
                        .ok_or_else(|| corrupt(pid, "relocated parent has no live slots"))?;
                    key_a.copy_from_slice(overwrite::slot_key(frame, layout, true, slot));
                }
                old_child = pid;
                left = new_id;
                right = None;
                child_level = level;
                continue;
            }

            // Genuine split: halves plus the pending slots.
            let dst = self.scratch_for(f);
            self.buffer.init_frame(dst);
            {
                let Self {
                    buffer,
                    layout,
                    compare,
                    key_a,
                    key_b,
                    ..
                } = self;
                let (src, right_frame) = buffer.frames_pair_mut(f, dst);
                node::init_header(right_frame, false, true, true);
                overwrite::split_into(src, right_frame, layout, true, survivors);

                let pending = [(&key_a[..], Some(left)), (&key_b[..], right)];
                for (k, child) in pending.into_iter() {
                    let Some(child) = child else { continue };
                    let half: &mut [u8] = if (*compare)(
                        k,
                        overwrite::slot_key(right_frame, layout, true, 0),
                    ) == Ordering::Less
                    {
                        &mut *src
                    } else {
                        &mut *right_frame
                    };
                    let slot = overwrite::find_free_slot(half, layout, true)
                        .ok_or_else(|| corrupt(pid, "split half has no free slot"))?;
                    overwrite::occupy_slot(half, layout, true, slot, k, &child.to_le_bytes());
                }
                if level == 0 {
                    node::set_root_flag(src, false);
                }
                node::set_prev_id(src, Some(pid));
            }
            let new_left = self.write_frame(f)?;
            let new_right = self.write_frame(dst)?;
            self.buffer.retire(pid);
            self.capture_separators(f, dst, true)?;

            old_child = pid;
            left = new_left;
            right = Some(new_right);
            child_level = level;
        }
    }

    fn new_root_overwrite(&mut self, left: u32, right: u32) -> ReedResult<()> {
        self.buffer.init_frame(SCRATCH_FRAME);
        {
            let Self {
                buffer,
                layout,
                key_a,
                key_b,
                ..
            } = self;
            let frame = buffer.frame_mut(SCRATCH_FRAME);
            node::init_header(frame, true, true, true);
            overwrite::occupy_slot(frame, layout, true, 0, key_a, &left.to_le_bytes());
            overwrite::occupy_slot(frame, layout, true, 1, key_b, &right.to_le_bytes());
        }
        let root = self.write_frame(SCRATCH_FRAME)?;
        self.path.set_root(root);
        self.height += 1;
        Ok(())
    }

    // --- maintenance ---

    /// Makes the on-disk image self-consistent and pushes it to the
    /// medium. In copy-on-write mode this first drains the mapping
    /// table: every interior node whose pointers resolve differently is
    /// rewritten with the resolutions embedded, bottom-up, ending with a
    /// fresh root. Advisory otherwise.
    pub fn flush(&mut self) -> ReedResult<()> {
        if self.cow() && !self.mapping.is_empty() {
            let root = self.path.root();
            let new_root = self.drain_node(root, 0)?;
            self.path.set_root(new_root);
            debug_assert!(self.mapping.is_empty());
        }
        self.buffer.flush()
    }

    fn drain_node(&mut self, visible: u32, level: usize) -> ReedResult<u32> {
        if level >= MAX_HEIGHT {
            return Err(corrupt(visible, "tree deeper than the height bound"));
        }
        // Callers hand in resolved ids (the parent consumed the child's
        // mapping first); the root is never mapped at all.
        let phys = self.mapping.resolve(visible);
        let f = self.buffer.read(phys)?;
        if !node::is_interior(self.buffer.frame(f)) {
            return Ok(phys);
        }

        let n = node::count(self.buffer.frame(f));
        let mut kids: Vec<u32> = Vec::with_capacity(n + 1);
        for i in 0..=n {
            kids.push(sorted::child_ptr(self.buffer.frame(f), &self.layout, i));
        }

        // Resolve and consume the child mappings BEFORE recursing: the
        // recursion writes pages, a write may compact, and compaction
        // would consume these mappings behind our back.
        let mut changed = phys != visible;
        for kid in kids.iter_mut() {
            let resolved = self.mapping.resolve(*kid);
            if resolved != *kid {
                self.mapping.remove(*kid);
                *kid = resolved;
                changed = true;
            }
        }
        for kid in kids.iter_mut() {
            let new_id = self.drain_node(*kid, level + 1)?;
            if new_id != *kid {
                *kid = new_id;
                changed = true;
            }
        }
        if !changed {
            return Ok(phys);
        }

        // The frame may have rotated away during the recursion.
        let f = self.buffer.read(phys)?;
        {
            let Self { buffer, layout, .. } = self;
            let frame = buffer.frame_mut(f);
            for (i, kid) in kids.iter().enumerate() {
                sorted::set_child_ptr(frame, layout, i, *kid);
            }
            node::set_prev_id(frame, Some(phys));
        }
        let new_id = self.write_frame(f)?;
        self.buffer.retire(phys);
        Ok(new_id)
    }

    /// Flushes and releases the storage driver.
    pub fn close(mut self) -> ReedResult<()> {
        self.flush()?;
        self.buffer.close()
    }

    // --- recovery ---

    /// Best-effort root scan plus reachability walk; see [`open`].
    ///
    /// [`open`]: BPlusTree::open
    fn recover(&mut self) -> ReedResult<()> {
        let capacity = self.buffer.capacity();
        let mut best: Option<(u32, u32)> = None;
        let mut max_logical: Option<u32> = None;

        for p in 0..capacity {
            self.buffer.read_into(p, SCRATCH_FRAME)?;
            let page = self.buffer.frame(SCRATCH_FRAME);
            let logical = node::logical_id(page);
            if logical == u32::MAX {
                continue; // erased page, all ones
            }
            if max_logical.is_none_or(|m| logical > m) {
                max_logical = Some(logical);
            }
            if node::is_root(page) && best.is_none_or(|(_, l)| logical > l) {
                best = Some((p, logical));
            }
        }

        let (root, _) = best.ok_or_else(|| ReedError::CorruptedPage {
            page: 0,
            reason: "no root page found on device".to_string(),
        })?;
        self.buffer.init_frame(SCRATCH_FRAME);
        self.buffer
            .resume_logical(max_logical.unwrap_or(0).wrapping_add(1));
        self.path.set_root(root);
        self.height = self.mark_reachable(root, 0)?;
        Ok(())
    }

    fn mark_reachable(&mut self, id: u32, depth: usize) -> ReedResult<usize> {
        if depth >= MAX_HEIGHT {
            return Err(corrupt(id, "reachability walk exceeded the height bound"));
        }
        self.buffer.mark_live(id);
        let f = self.buffer.read(id)?;
        let page = self.buffer.frame(f);
        if !node::is_interior(page) {
            return Ok(1);
        }

        let kids: Vec<u32> = if node::is_overwrite(page) {
            (0..self.layout.ow_max(true))
                .filter(|&i| overwrite::slot_is_record(page, &self.layout, true, i))
                .map(|i| overwrite::slot_child(page, &self.layout, i))
                .collect()
        } else {
            (0..=node::count(page))
                .map(|i| sorted::child_ptr(page, &self.layout, i))
                .collect()
        };

        let mut below = 0;
        for kid in kids {
            below = below.max(self.mark_reachable(kid, depth + 1)?);
        }
        Ok(below + 1)
    }
}
