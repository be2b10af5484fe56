// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Storage driver contract.
//!
//! A driver exposes a linear array of fixed-size pages and four essential
//! operations: read, write, erase, close. Drivers do not track free or
//! erase state; that bookkeeping belongs to the page buffer. The erase
//! operation is meaningful only on erase-before-write media; a file-backed
//! driver may treat it as a no-op.
//!
//! ## Drivers
//!
//! - [`FileStorage`]: byte-addressable file, memory-mapped I/O.
//! - [`MemStorage`]: in-RAM device, optionally with strict NOR-style
//!   erase semantics for tests.

pub mod file;
pub mod memory;

#[cfg(test)]
mod file_test;
#[cfg(test)]
mod memory_test;

pub use file::FileStorage;
pub use memory::MemStorage;

use crate::error::{ReedError, ReedResult};

/// Block-storage contract exposed to the page buffer.
///
/// All offsets are page numbers; every `buf` must be exactly
/// `page_size()` bytes. Writes are considered durable when the driver
/// returns ok; `flush` is advisory.
pub trait StorageDriver {
    /// Logical capacity in pages, fixed at initialisation.
    fn capacity_pages(&self) -> u32;

    /// Page size in bytes, fixed at initialisation.
    fn page_size(&self) -> usize;

    /// Whether this medium requires erase-before-write.
    fn requires_erase(&self) -> bool;

    /// Copies page `page` into `buf`.
    fn read(&mut self, page: u32, buf: &mut [u8]) -> ReedResult<()>;

    /// Persists `buf` at page `page`.
    fn write(&mut self, page: u32, buf: &[u8]) -> ReedResult<()>;

    /// Erases the inclusive page range `start..=end`. The range must be
    /// aligned to the device's erase-block size. Media without erase
    /// semantics may no-op.
    fn erase(&mut self, start: u32, end: u32) -> ReedResult<()>;

    /// Pushes buffered writes to the medium.
    fn flush(&mut self) -> ReedResult<()> {
        Ok(())
    }

    /// Releases underlying handles.
    fn close(&mut self) -> ReedResult<()>;
}

/// Validates a page number against a driver's capacity.
pub fn check_page(page: u32, capacity: u32) -> ReedResult<()> {
    if page >= capacity {
        return Err(ReedError::OutOfBounds { page, capacity });
    }
    Ok(())
}

/// Validates a buffer length against a driver's page size.
pub fn check_buf(operation: &str, buf_len: usize, page_size: usize) -> ReedResult<()> {
    if buf_len != page_size {
        return Err(ReedError::IoError {
            operation: operation.to_string(),
            reason: format!("buffer is {} bytes, page size is {}", buf_len, page_size),
        });
    }
    Ok(())
}

/// Validates an inclusive erase range.
pub fn check_erase(start: u32, end: u32, capacity: u32) -> ReedResult<()> {
    if start > end || end >= capacity {
        return Err(ReedError::OutOfBounds {
            page: end,
            capacity,
        });
    }
    Ok(())
}
