// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page buffer and space manager.
//!
//! Owns the frame pool, the free-page map, the erased window, and the
//! placement cursor. Every page read and write of the tree goes through
//! here; the tree never touches the storage driver directly.
//!
//! ## Frame policy
//!
//! - 2 frames: frame 0 is the scratch / root target, frame 1 serves
//!   reads.
//! - 3+ frames: frame 0 is scratch, frame 1 is pinned for the root,
//!   frames 2.. rotate round-robin, skipping the frame hit by the most
//!   recent lookup.
//!
//! At most one frame caches any physical page. Callers address frames by
//! index and re-borrow the byte view after every buffer call; holding a
//! view across a call that may evict is rejected by the borrow checker,
//! which is the reentrancy contract of the engine in type form.
//!
//! ## Free map and erased window
//!
//! A set free bit means "no live data here" - the page is erased or its
//! contents were superseded. Writability needs more: on erase media the
//! page must also lie inside the erased window and be physically erased,
//! and no live mapping may pin its id (a reused id would let a later
//! mapping upsert clobber a live entry). Placement checks all of it;
//! [`space`] replenishes the window by block compaction.

pub mod observer;
pub mod space;


pub use observer::{NullObserver, PageObserver};

use crate::bits::BitArray;
use crate::error::{ReedError, ReedResult};
use crate::node;
use crate::storage::StorageDriver;
use serde::Serialize;

/// Frame index reserved for building new pages.
pub const SCRATCH_FRAME: usize = 0;

/// Frame index pinned for the root page when three or more frames exist.
pub const ROOT_FRAME: usize = 1;

/// Operation counters. Cheap to keep, and the wraparound and relocation
/// behaviour of the space manager is only observable through them.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BufferStats {
    pub reads: u64,
    pub frame_hits: u64,
    pub writes: u64,
    pub overwrites: u64,
    pub direct_writes: u64,
    pub erases: u64,
    pub pages_moved: u64,
    pub retired: u64,
}

#[derive(Debug)]
struct Frame {
    page: Option<u32>,
    buf: Vec<u8>,
}

/// Fixed pool of page frames plus the physical-placement state.
pub struct PageBuffer {
    driver: Box<dyn StorageDriver>,
    page_size: usize,
    capacity: u32,
    block_pages: u32,
    /// Fill byte for fresh frames: 0x00 for sorted layouts, 0xFF for the
    /// overwrite layout (erased state).
    fill: u8,
    allow_overwrite: bool,
    requires_erase: bool,
    frames: Vec<Frame>,
    /// Set bit = no live data (erased or superseded).
    free: BitArray,
    /// Erase media only: physically erased right now.
    erased: BitArray,
    next_logical: u32,
    /// Next placement candidate (physical page).
    cursor: u32,
    /// One past the last erased-window page (physical, block-aligned).
    erased_end: u32,
    /// Ring length of [cursor, erased_end).
    window_len: u32,
    last_hit: usize,
    rr_next: usize,
    /// Block-sized relocation scratch.
    scratch: Vec<u8>,
    /// Pages of the block under compaction that must be saved.
    saved: Vec<u32>,
    stats: BufferStats,
}

impl std::fmt::Debug for PageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuffer")
            .field("capacity", &self.capacity)
            .field("block_pages", &self.block_pages)
            .field("frames", &self.frames.len())
            .field("cursor", &self.cursor)
            .field("erased_end", &self.erased_end)
            .field("window_len", &self.window_len)
            .finish()
    }
}

impl PageBuffer {
    /// Builds the pool over `driver`. `fresh` declares the device fully
    /// erased (a newly created tree); otherwise the erased window starts
    /// empty and the first `ensure_space` establishes it.
    pub fn new(
        driver: Box<dyn StorageDriver>,
        frame_count: usize,
        block_pages: u32,
        fill: u8,
        allow_overwrite: bool,
        fresh: bool,
    ) -> ReedResult<Self> {
        if frame_count < 2 {
            return Err(ReedError::ConfigError {
                reason: format!("need at least 2 buffer frames, got {}", frame_count),
            });
        }
        if block_pages == 0 {
            return Err(ReedError::ConfigError {
                reason: "erase block size must be nonzero".to_string(),
            });
        }
        let capacity = driver.capacity_pages();
        if capacity < block_pages {
            return Err(ReedError::ConfigError {
                reason: format!(
                    "device of {} pages is smaller than one erase block of {}",
                    capacity, block_pages
                ),
            });
        }
        let page_size = driver.page_size();
        let requires_erase = driver.requires_erase();

        let frames = (0..frame_count)
            .map(|_| Frame {
                page: None,
                buf: vec![fill; page_size],
            })
            .collect();

        let window_len = if !requires_erase || fresh { capacity } else { 0 };

        Ok(Self {
            driver,
            page_size,
            capacity,
            block_pages,
            fill,
            allow_overwrite,
            requires_erase,
            frames,
            free: BitArray::new(capacity as usize, true),
            erased: BitArray::new(capacity as usize, fresh && requires_erase),
            next_logical: 0,
            cursor: 0,
            erased_end: 0,
            window_len,
            last_hit: 0,
            rr_next: 0,
            scratch: vec![0u8; block_pages as usize * page_size],
            saved: Vec::with_capacity(block_pages as usize),
            stats: BufferStats::default(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn block_pages(&self) -> u32 {
        self.block_pages
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Whether the free map marks `page` as holding no live data.
    pub fn is_free(&self, page: u32) -> bool {
        self.free.get(page as usize)
    }

    pub fn free_count(&self) -> usize {
        self.free.count_set()
    }

    /// Borrow a frame's page image.
    pub fn frame(&self, idx: usize) -> &[u8] {
        &self.frames[idx].buf
    }

    /// Mutably borrow a frame's page image.
    pub fn frame_mut(&mut self, idx: usize) -> &mut [u8] {
        &mut self.frames[idx].buf
    }

    /// Two distinct frames at once, for splits.
    pub fn frames_pair_mut(&mut self, a: usize, b: usize) -> (&mut [u8], &mut [u8]) {
        assert_ne!(a, b);
        if a < b {
            let (lo, hi) = self.frames.split_at_mut(b);
            (lo[a].buf.as_mut_slice(), hi[0].buf.as_mut_slice())
        } else {
            let (lo, hi) = self.frames.split_at_mut(a);
            (hi[0].buf.as_mut_slice(), lo[b].buf.as_mut_slice())
        }
    }

    /// Physical page a frame currently caches, if any.
    pub fn frame_page(&self, idx: usize) -> Option<u32> {
        self.frames[idx].page
    }

    fn cached_in(&self, page: u32) -> Option<usize> {
        self.frames.iter().position(|f| f.page == Some(page))
    }

    fn invalidate_cached(&mut self, page: u32) {
        if let Some(idx) = self.cached_in(page) {
            self.frames[idx].page = None;
        }
    }

    /// Returns a frame containing `page`, reading from storage only on a
    /// miss. Misses evict per the frame policy.
    pub fn read(&mut self, page: u32) -> ReedResult<usize> {
        if let Some(idx) = self.cached_in(page) {
            self.stats.frame_hits += 1;
            self.last_hit = idx;
            return Ok(idx);
        }

        let victim = if self.frames.len() == 2 {
            1
        } else {
            let lo = 2;
            let n = self.frames.len() - lo;
            let mut v = lo + self.rr_next % n;
            if v == self.last_hit && n > 1 {
                v = lo + (self.rr_next + 1) % n;
                self.rr_next = (self.rr_next + 2) % n;
            } else {
                self.rr_next = (self.rr_next + 1) % n;
            }
            v
        };
        self.read_into(page, victim)?;
        self.last_hit = victim;
        Ok(victim)
    }

    /// Returns a frame containing `page`, preferring `want` on a miss.
    /// Used to pin the root page to its reserved frame.
    pub fn read_pinned(&mut self, page: u32, want: usize) -> ReedResult<usize> {
        if let Some(idx) = self.cached_in(page) {
            self.stats.frame_hits += 1;
            self.last_hit = idx;
            return Ok(idx);
        }
        self.read_into(page, want)?;
        self.last_hit = want;
        Ok(want)
    }

    /// Frame index for root reads under the current pool size.
    pub fn root_frame(&self) -> usize {
        if self.frames.len() == 2 {
            SCRATCH_FRAME
        } else {
            ROOT_FRAME
        }
    }

    /// Forces `page` into a specific frame (the caller will mutate it).
    pub fn read_into(&mut self, page: u32, idx: usize) -> ReedResult<()> {
        if self.frames[idx].page != Some(page) {
            // One in-memory copy per page: evict any duplicate first.
            self.invalidate_cached(page);
            self.frames[idx].page = None;
            let Self { driver, frames, .. } = self;
            driver.read(page, &mut frames[idx].buf)?;
            self.frames[idx].page = Some(page);
            self.stats.reads += 1;
        } else {
            self.stats.frame_hits += 1;
        }
        Ok(())
    }

    /// Resets a frame to the layout's erased/blank state and detaches it
    /// from any cached page.
    pub fn init_frame(&mut self, idx: usize) {
        self.frames[idx].page = None;
        let fill = self.fill;
        self.frames[idx].buf.fill(fill);
    }

    /// Stamps the next logical id into the frame, places it at a fresh
    /// physical page, persists it, and marks the page live.
    pub fn write(&mut self, idx: usize, obs: &mut dyn PageObserver) -> ReedResult<u32> {
        let page = self.place(obs)?;
        let logical = self.next_logical;
        self.next_logical = self.next_logical.wrapping_add(1);

        node::set_logical_id(&mut self.frames[idx].buf, logical);
        let Self { driver, frames, .. } = self;
        driver.write(page, &frames[idx].buf)?;

        self.free.set(page as usize, false);
        if self.requires_erase {
            self.erased.set(page as usize, false);
        }
        self.invalidate_cached(page);
        self.frames[idx].page = Some(page);
        self.stats.writes += 1;
        Ok(page)
    }

    /// Rewrites the page a frame caches, at the same address. Only legal
    /// on media/modes that admit in-place updates; the logical id is not
    /// restamped (same incarnation).
    pub fn overwrite(&mut self, idx: usize) -> ReedResult<()> {
        if !self.allow_overwrite {
            return Err(ReedError::IoError {
                operation: "overwrite".to_string(),
                reason: "in-place page rewrite is not permitted in this mode".to_string(),
            });
        }
        let page = self.frames[idx].page.ok_or_else(|| ReedError::IoError {
            operation: "overwrite".to_string(),
            reason: "frame holds no placed page".to_string(),
        })?;
        let Self { driver, frames, .. } = self;
        driver.write(page, &frames[idx].buf)?;
        self.stats.overwrites += 1;
        Ok(())
    }

    /// Marks a superseded page as holding no live data. Reuse still
    /// waits for the erased window (erase media) and for any mapping
    /// naming the page to be dropped.
    pub fn retire(&mut self, page: u32) {
        self.free.set(page as usize, true);
        self.invalidate_cached(page);
        self.stats.retired += 1;
    }

    /// Advisory: push everything to the medium.
    pub fn flush(&mut self) -> ReedResult<()> {
        self.driver.flush()
    }

    pub fn close(&mut self) -> ReedResult<()> {
        self.driver.close()
    }

    // --- internals shared with the space manager ---

    pub(crate) fn usable(&self, page: u32, obs: &dyn PageObserver) -> bool {
        self.free.get(page as usize)
            && (!self.requires_erase || self.erased.get(page as usize))
            && !obs.is_remapped(page)
    }

    fn place(&mut self, obs: &mut dyn PageObserver) -> ReedResult<u32> {
        if !self.requires_erase {
            for step in 0..self.capacity {
                let p = (self.cursor + step) % self.capacity;
                if self.usable(p, obs) {
                    self.cursor = (p + 1) % self.capacity;
                    return Ok(p);
                }
            }
            return Err(ReedError::StorageFull { requested: 1 });
        }

        loop {
            if self.window_len == 0 {
                self.ensure_space(1, obs)?;
            }
            let p = self.cursor;
            self.cursor = (self.cursor + 1) % self.capacity;
            self.window_len -= 1;
            if self.usable(p, obs) {
                return Ok(p);
            }
            // Live or held page inside the window: the cursor walks past.
        }
    }

    /// Recovery hook: marks a page live without writing it.
    pub(crate) fn mark_live(&mut self, page: u32) {
        self.free.set(page as usize, false);
        if self.requires_erase {
            self.erased.set(page as usize, false);
        }
    }

    /// Recovery hook: resumes the logical-id counter.
    pub(crate) fn resume_logical(&mut self, next: u32) {
        self.next_logical = next;
    }
}
