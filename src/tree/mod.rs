// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! B+-tree operations over the page buffer.
//!
//! The tree owns the buffer, the mapping table, and the active path; the
//! buffer owns the storage device. `put`, `get`, and the range iterator
//! descend from the cached root id, resolving every stored pointer
//! through the mapping table before use. Mutations go through the
//! mode-specific write path:
//!
//! - **UpdateInPlace**: sorted pages, rewritten at their own address.
//! - **CopyOnWrite**: sorted pages, every change is a fresh page; the
//!   mapping table (or, under pressure, an ancestor rewrite walk)
//!   reconnects the parent.
//! - **InPageOverwrite**: unsorted slot pages mutated by clearing bits,
//!   split through compact-and-sort when full.
//!
//! Splits propagate iteratively along the active path; a split above the
//! old root allocates a new root whose location lives only in the active
//! path, never in the mapping table.

pub mod iter;
pub mod path;
pub mod tree;
pub mod types;

#[cfg(test)]
mod iter_test;
#[cfg(test)]
mod path_test;
#[cfg(test)]
mod scenario_test;
#[cfg(test)]
mod types_test;

pub use iter::RangeIterator;
pub use path::ActivePath;
pub use tree::BPlusTree;
pub use types::{compare_bytes, compare_i32_le, compare_u32_le, StorageMode, TreeConfig};
