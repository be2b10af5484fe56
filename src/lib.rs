// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! ReedTree - page-oriented B+-tree index engine for constrained devices.
//!
//! One tree, three media. ReedTree stores fixed-size key/value records in
//! 512-byte-class pages and keeps working when the medium underneath
//! changes character completely:
//!
//! - **Files / RAM** (`UpdateInPlace`): sorted pages rewritten at their
//!   own address.
//! - **NAND-style flash** (`CopyOnWrite`): erase-before-write, no
//!   in-place updates; every change writes a fresh page and a small
//!   virtual-mapping table redirects stale parent pointers so a leaf
//!   update does not rewrite every ancestor.
//! - **NOR / dataflash** (`InPageOverwrite`): bit-clearing overwrites
//!   inside an erased page; records live in unsorted slots guarded by
//!   per-slot bitmaps, so an insert is a single in-place page write.
//!
//! All memory is acquired at initialisation - frame pool, block scratch,
//! free-page map, mapping table, key scratches. Inserts and lookups
//! allocate nothing.
//!
//! ## Quick Start
//!
//! ```rust
//! use reedtree::storage::MemStorage;
//! use reedtree::tree::{compare_u32_le, BPlusTree, StorageMode, TreeConfig};
//!
//! let config = TreeConfig {
//!     page_size: 512,
//!     key_size: 4,
//!     data_size: 12,
//!     frame_count: 3,
//!     erase_block_pages: 8,
//!     mode: StorageMode::UpdateInPlace,
//!     mapping_bytes: 0,
//!     compare: compare_u32_le,
//! };
//! let driver = Box::new(MemStorage::new(256, 512));
//! let mut tree = BPlusTree::create(driver, config)?;
//!
//! tree.put(&7u32.to_le_bytes(), b"hello, tree!")?;
//! let mut out = [0u8; 12];
//! assert!(tree.get(&7u32.to_le_bytes(), &mut out)?.is_some());
//! assert_eq!(&out, b"hello, tree!");
//! # Ok::<(), reedtree::ReedError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ tree: BPlusTree  (put/get/range, splits,     │
//! │       active path, mapping table)            │
//! └───────────────┬──────────────────────────────┘
//!                 │ read/write/overwrite     ▲ observer:
//!                 ▼                          │ isRemapped/pageMoved
//! ┌──────────────────────────────────────────┴───┐
//! │ buffer: PageBuffer  (frames, free map,       │
//! │         erased window, block compaction)     │
//! └───────────────┬──────────────────────────────┘
//!                 ▼
//! ┌──────────────────────────────────────────────┐
//! │ storage: StorageDriver  (file | RAM | flash) │
//! └──────────────────────────────────────────────┘
//! ```

pub mod bits;
pub mod buffer;
pub mod error;
pub mod mapping;
pub mod node;
pub mod storage;
pub mod tree;

// Re-export commonly used types
pub use buffer::{BufferStats, PageBuffer, PageObserver};
pub use error::{ReedError, ReedResult};
pub use mapping::MappingTable;
pub use storage::{FileStorage, MemStorage, StorageDriver};
pub use tree::{BPlusTree, RangeIterator, StorageMode, TreeConfig};
