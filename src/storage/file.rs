// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! File-backed storage driver.
//!
//! Maps the index file with `memmap2` and serves page reads and writes
//! straight out of the mapping. The file is sized to the full declared
//! capacity up front, so no remapping happens after initialisation. An
//! advisory exclusive lock (fs2) is held for the driver's lifetime;
//! a second process opening the same file fails fast instead of
//! corrupting it.
//!
//! Files are byte-addressable, so `erase` is a no-op and
//! `requires_erase` is false.

use crate::error::{ReedError, ReedResult};
use crate::storage::{check_buf, check_erase, check_page, StorageDriver};
use fs2::FileExt;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Byte-addressable driver over a regular file.
pub struct FileStorage {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    page_size: usize,
    capacity: u32,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl FileStorage {
    /// Opens or creates the backing file and sizes it to
    /// `capacity * page_size` bytes.
    ///
    /// ## Error Conditions
    /// - Parent directory does not exist
    /// - Another process holds the lock
    /// - Disk full while sizing a new file
    pub fn open<P: AsRef<Path>>(path: P, capacity: u32, page_size: usize) -> ReedResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| ReedError::IoError {
                operation: "open_storage_file".to_string(),
                reason: e.to_string(),
            })?;

        file.try_lock_exclusive().map_err(|e| ReedError::IoError {
            operation: "lock_storage_file".to_string(),
            reason: e.to_string(),
        })?;

        let size = capacity as u64 * page_size as u64;
        let current = file
            .metadata()
            .map_err(|e| ReedError::IoError {
                operation: "stat_storage_file".to_string(),
                reason: e.to_string(),
            })?
            .len();
        if current < size {
            file.set_len(size).map_err(|e| ReedError::IoError {
                operation: "size_storage_file".to_string(),
                reason: e.to_string(),
            })?;
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| ReedError::IoError {
                operation: "mmap_storage_file".to_string(),
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            path,
            file,
            mmap,
            page_size,
            capacity,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn range(&self, page: u32) -> std::ops::Range<usize> {
        let start = page as usize * self.page_size;
        start..start + self.page_size
    }
}

impl StorageDriver for FileStorage {
    fn capacity_pages(&self) -> u32 {
        self.capacity
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn requires_erase(&self) -> bool {
        false
    }

    fn read(&mut self, page: u32, buf: &mut [u8]) -> ReedResult<()> {
        check_page(page, self.capacity)?;
        check_buf("file_read", buf.len(), self.page_size)?;
        buf.copy_from_slice(&self.mmap[self.range(page)]);
        Ok(())
    }

    fn write(&mut self, page: u32, buf: &[u8]) -> ReedResult<()> {
        check_page(page, self.capacity)?;
        check_buf("file_write", buf.len(), self.page_size)?;
        let range = self.range(page);
        self.mmap[range].copy_from_slice(buf);
        Ok(())
    }

    fn erase(&mut self, start: u32, end: u32) -> ReedResult<()> {
        // Byte-addressable medium: nothing to erase, but the range is
        // still validated so driver misuse surfaces on every backend.
        check_erase(start, end, self.capacity)
    }

    fn flush(&mut self) -> ReedResult<()> {
        self.mmap.flush().map_err(|e| ReedError::IoError {
            operation: "flush_storage_file".to_string(),
            reason: e.to_string(),
        })
    }

    fn close(&mut self) -> ReedResult<()> {
        self.flush()?;
        let _ = self.file.unlock();
        Ok(())
    }
}
