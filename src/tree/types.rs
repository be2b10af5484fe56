// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tree configuration and key comparators.

use crate::error::{ReedError, ReedResult};
use crate::node::KeyCompare;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How the engine maps tree updates onto the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// Sorted pages rewritten at their own address. For byte-addressable
    /// media (files, RAM).
    UpdateInPlace,
    /// Sorted pages; every update writes a fresh page and the mapping
    /// table redirects stale parent pointers. For NAND-style media that
    /// forbid in-place updates.
    CopyOnWrite,
    /// Unsorted slot pages mutated by clearing bits in place. For
    /// NOR/dataflash media that permit bit-clearing overwrites inside an
    /// erased page.
    InPageOverwrite,
}

/// Everything `BPlusTree::create`/`open` needs to know.
///
/// `compare` orders raw key bytes; [`compare_bytes`], [`compare_u32_le`]
/// and [`compare_i32_le`] cover the common encodings.
#[derive(Clone)]
pub struct TreeConfig {
    pub page_size: usize,
    pub key_size: usize,
    pub data_size: usize,
    /// Buffer frame count, at least 2.
    pub frame_count: usize,
    /// Erase-block size in pages.
    pub erase_block_pages: u32,
    pub mode: StorageMode,
    /// Mapping-table budget in bytes; 0 disables the table.
    pub mapping_bytes: usize,
    pub compare: KeyCompare,
}

impl std::fmt::Debug for TreeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeConfig")
            .field("page_size", &self.page_size)
            .field("key_size", &self.key_size)
            .field("data_size", &self.data_size)
            .field("frame_count", &self.frame_count)
            .field("erase_block_pages", &self.erase_block_pages)
            .field("mode", &self.mode)
            .field("mapping_bytes", &self.mapping_bytes)
            .finish()
    }
}

impl TreeConfig {
    /// Shape checks that need no driver.
    pub fn validate(&self) -> ReedResult<()> {
        if self.frame_count < 2 {
            return Err(ReedError::ConfigError {
                reason: format!("need at least 2 buffer frames, got {}", self.frame_count),
            });
        }
        if self.erase_block_pages == 0 {
            return Err(ReedError::ConfigError {
                reason: "erase block size must be nonzero".to_string(),
            });
        }
        if self.mode == StorageMode::CopyOnWrite && self.mapping_bytes == 0 {
            return Err(ReedError::ConfigError {
                reason: "copy-on-write mode needs a mapping-table budget".to_string(),
            });
        }
        Ok(())
    }
}

/// Lexicographic byte order.
pub fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// Little-endian unsigned 32-bit keys.
pub fn compare_u32_le(a: &[u8], b: &[u8]) -> Ordering {
    let ka = u32::from_le_bytes(a[0..4].try_into().unwrap());
    let kb = u32::from_le_bytes(b[0..4].try_into().unwrap());
    ka.cmp(&kb)
}

/// Little-endian signed 32-bit keys (two's complement).
pub fn compare_i32_le(a: &[u8], b: &[u8]) -> Ordering {
    let ka = i32::from_le_bytes(a[0..4].try_into().unwrap());
    let kb = i32::from_le_bytes(b[0..4].try_into().unwrap());
    ka.cmp(&kb)
}
