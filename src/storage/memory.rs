// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! In-RAM storage driver.
//!
//! Backs the test suite and benchmarks. In relaxed mode it behaves like a
//! byte-addressable device: writes land anywhere, erase fills the range
//! with `0xFF`. In strict mode it models NOR flash discipline:
//!
//! - a page must be erased before its first write,
//! - a rewrite may only clear bits (1 → 0); any write that would set an
//!   erased-to-programmed bit back to 1 is rejected.
//!
//! Strict mode turns the erase-before-write rule from a convention into a
//! unit-testable property.

use crate::bits::BitArray;
use crate::error::{ReedError, ReedResult};
use crate::storage::{check_buf, check_erase, check_page, StorageDriver};

/// In-memory page device.
#[derive(Debug)]
pub struct MemStorage {
    data: Vec<u8>,
    page_size: usize,
    capacity: u32,
    strict: bool,
    /// Strict mode only: pages currently in the erased state.
    erased: BitArray,
    /// Strict mode only: pages written since their last erase.
    written: BitArray,
}

impl MemStorage {
    /// Creates a relaxed in-memory device (file-like semantics).
    pub fn new(capacity: u32, page_size: usize) -> Self {
        Self::build(capacity, page_size, false)
    }

    /// Creates a strict erase-before-write device (NOR-like semantics).
    /// The device starts fully erased.
    pub fn strict(capacity: u32, page_size: usize) -> Self {
        Self::build(capacity, page_size, true)
    }

    fn build(capacity: u32, page_size: usize, strict: bool) -> Self {
        let fill = if strict { 0xFF } else { 0x00 };
        Self {
            data: vec![fill; capacity as usize * page_size],
            page_size,
            capacity,
            strict,
            erased: BitArray::new(capacity as usize, strict),
            written: BitArray::new(capacity as usize, false),
        }
    }

    fn range(&self, page: u32) -> std::ops::Range<usize> {
        let start = page as usize * self.page_size;
        start..start + self.page_size
    }

    /// Strict mode: whether `page` is in the erased state.
    pub fn is_erased(&self, page: u32) -> bool {
        self.erased.get(page as usize)
    }
}

impl StorageDriver for MemStorage {
    fn capacity_pages(&self) -> u32 {
        self.capacity
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn requires_erase(&self) -> bool {
        self.strict
    }

    fn read(&mut self, page: u32, buf: &mut [u8]) -> ReedResult<()> {
        check_page(page, self.capacity)?;
        check_buf("mem_read", buf.len(), self.page_size)?;
        buf.copy_from_slice(&self.data[self.range(page)]);
        Ok(())
    }

    fn write(&mut self, page: u32, buf: &[u8]) -> ReedResult<()> {
        check_page(page, self.capacity)?;
        check_buf("mem_write", buf.len(), self.page_size)?;

        if self.strict {
            let idx = page as usize;
            if !self.erased.get(idx) && !self.written.get(idx) {
                return Err(ReedError::NotErased { page });
            }
            // A rewrite may only clear bits.
            let range = self.range(page);
            for (old, new) in self.data[range.clone()].iter().zip(buf.iter()) {
                if old & new != *new {
                    return Err(ReedError::NotErased { page });
                }
            }
            self.erased.set(idx, false);
            self.written.set(idx, true);
        }

        let range = self.range(page);
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn erase(&mut self, start: u32, end: u32) -> ReedResult<()> {
        check_erase(start, end, self.capacity)?;
        for page in start..=end {
            let range = self.range(page);
            self.data[range].fill(0xFF);
            self.erased.set(page as usize, true);
            self.written.set(page as usize, false);
        }
        Ok(())
    }

    fn close(&mut self) -> ReedResult<()> {
        Ok(())
    }
}
