// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Space manager: erased-window upkeep and block compaction.
//!
//! `ensure_space(n)` guarantees that the next `n` page writes succeed
//! without the cursor overtaking the erased window. When the window runs
//! short it selects the next erase block, saves the live pages into the
//! block scratch, erases, writes the survivors back to their original
//! positions, and notifies the tree through the observer. A block whose
//! every page is live cannot yield space; the window advances past it
//! and the next block is tried, bailing out with `StorageFull` once the
//! whole device has been examined.
//!
//! Live pages keep their physical ids across a compaction, so no parent
//! pointer changes; the observer callback exists to refresh pointers
//! INSIDE a moved page that resolve differently now, and to re-anchor
//! the root in the active path.

use crate::buffer::{PageBuffer, PageObserver};
use crate::error::{ReedError, ReedResult};

impl PageBuffer {
    /// Guarantees `n` placeable pages ahead of the cursor.
    ///
    /// Idempotent: when the window already covers the requirement the
    /// call returns without touching the device.
    pub fn ensure_space(&mut self, n: u32, obs: &mut dyn PageObserver) -> ReedResult<()> {
        if !self.requires_erase {
            // Byte-addressable media: superseded pages are directly
            // reusable, so the whole device is the window and there is
            // nothing to compact.
            if self.count_usable(n, obs) >= n {
                return Ok(());
            }
            return Err(ReedError::StorageFull { requested: n });
        }

        let blocks = self.capacity.div_ceil(self.block_pages);
        let mut scanned = 0u32;
        loop {
            if self.count_usable(n, obs) >= n {
                return Ok(());
            }
            // The window growing to the whole device means every block
            // has been through compaction already.
            if scanned >= blocks || self.window_len >= self.capacity {
                return Err(ReedError::StorageFull { requested: n });
            }
            self.compact_next_block(obs)?;
            scanned += 1;
        }
    }

    /// Counts placeable pages ahead of the cursor, stopping at `need`.
    fn count_usable(&self, need: u32, obs: &dyn PageObserver) -> u32 {
        let span = if self.requires_erase {
            self.window_len.min(self.capacity)
        } else {
            self.capacity
        };
        let mut found = 0u32;
        for step in 0..span {
            let p = (self.cursor + step) % self.capacity;
            if self.usable(p, obs) {
                found += 1;
                if found >= need {
                    break;
                }
            }
        }
        found
    }

    /// Erases the block at the window's end, relocating its live pages
    /// in place.
    fn compact_next_block(&mut self, obs: &mut dyn PageObserver) -> ReedResult<()> {
        let cap = self.capacity;
        let psz = self.page_size;
        let b_start = self.erased_end;
        let b_end = (b_start + self.block_pages - 1).min(cap - 1);
        let len = b_end - b_start + 1;

        // Classify. Live pages are saved into the block scratch; free
        // pages either pin a live mapping (held: contents dead, id
        // unusable, which `usable` re-checks at placement time) or are
        // reclaimed outright by the erase.
        self.saved.clear();
        for p in b_start..=b_end {
            if !self.free.get(p as usize) {
                let slot = (p - b_start) as usize * psz;
                let Self { driver, scratch, .. } = self;
                driver.read(p, &mut scratch[slot..slot + psz])?;
                self.saved.push(p);
            }
        }

        if self.saved.len() as u32 == len {
            // Full-live block: nothing to gain here. The window walks
            // past it; the cursor will skip every page inside.
            self.erased_end = (b_end + 1) % cap;
            self.window_len = (self.window_len + len).min(cap);
            return Ok(());
        }

        self.driver.erase(b_start, b_end)?;
        self.stats.erases += 1;
        for p in b_start..=b_end {
            self.erased.set(p as usize, true);
        }

        // Write survivors back to their own slots, giving the tree a
        // chance to refresh stale embedded pointers first. prev == curr
        // by construction.
        for i in 0..self.saved.len() {
            let p = self.saved[i];
            let slot = (p - b_start) as usize * psz;
            let Self { scratch, .. } = self;
            obs.page_moved(p, p, &mut scratch[slot..slot + psz]);

            let Self { driver, scratch, .. } = self;
            driver.write(p, &scratch[slot..slot + psz])?;
            self.erased.set(p as usize, false);
            self.stats.direct_writes += 1;
            self.stats.pages_moved += 1;

            // Any frame caching the page may now hold stale pointers.
            self.invalidate_cached(p);
        }

        self.erased_end = (b_end + 1) % cap;
        self.window_len = (self.window_len + len).min(cap);
        Ok(())
    }
}
