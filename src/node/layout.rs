// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Page geometry: how many records fit and where each field lives.
//!
//! All capacities derive from three configured sizes (page, key, data)
//! and the fixed header and pointer widths. Sorted pages pack records
//! after the header; overwrite pages additionally reserve two bits per
//! slot in the bitmaps at byte 10, which costs roughly one record of
//! capacity on a 512-byte page.

use crate::error::{ReedError, ReedResult};
use crate::node::{HEADER_SIZE, PTR_SIZE};

/// Derived geometry shared by every page of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    pub page_size: usize,
    pub key_size: usize,
    pub data_size: usize,
    /// Sorted leaf: max records.
    pub leaf_max: usize,
    /// Sorted interior: max keys (holds one more child pointer).
    pub interior_max: usize,
    /// Overwrite leaf: max slots.
    pub ow_leaf_max: usize,
    /// Overwrite leaf: bytes per slot bitmap.
    pub ow_leaf_bitmap: usize,
    /// Overwrite interior: max slots (each slot is key + child pointer).
    pub ow_interior_max: usize,
    /// Overwrite interior: bytes per slot bitmap.
    pub ow_interior_bitmap: usize,
}

/// Overwrite capacity: two bitmap bits per slot, rounded-up bitmaps
/// re-checked against the page because the closed formula ignores the
/// byte rounding.
fn overwrite_capacity(page_size: usize, record_size: usize) -> (usize, usize) {
    let mut max = (page_size - HEADER_SIZE) * 8 / (record_size * 8 + 2);
    while max > 0 && HEADER_SIZE + 2 * max.div_ceil(8) + max * record_size > page_size {
        max -= 1;
    }
    (max, max.div_ceil(8))
}

impl NodeLayout {
    pub fn new(page_size: usize, key_size: usize, data_size: usize) -> ReedResult<Self> {
        if key_size == 0 || data_size == 0 {
            return Err(ReedError::ConfigError {
                reason: "key and data sizes must be nonzero".to_string(),
            });
        }

        let record = key_size + data_size;
        let leaf_max = (page_size.saturating_sub(HEADER_SIZE)) / record;
        let interior_max =
            page_size.saturating_sub(HEADER_SIZE + PTR_SIZE) / (key_size + PTR_SIZE);
        let (ow_leaf_max, ow_leaf_bitmap) = overwrite_capacity(page_size, record);
        let (ow_interior_max, ow_interior_bitmap) =
            overwrite_capacity(page_size, key_size + PTR_SIZE);

        if leaf_max < 3 || interior_max < 3 || ow_leaf_max < 3 || ow_interior_max < 3 {
            return Err(ReedError::ConfigError {
                reason: format!(
                    "page size {} holds fewer than 3 records of {} key + {} data bytes",
                    page_size, key_size, data_size
                ),
            });
        }

        Ok(Self {
            page_size,
            key_size,
            data_size,
            leaf_max,
            interior_max,
            ow_leaf_max,
            ow_leaf_bitmap,
            ow_interior_max,
            ow_interior_bitmap,
        })
    }

    // --- sorted layout, SoA ---

    pub fn leaf_key_off(&self, i: usize) -> usize {
        HEADER_SIZE + i * self.key_size
    }

    pub fn leaf_data_off(&self, i: usize) -> usize {
        HEADER_SIZE + self.leaf_max * self.key_size + i * self.data_size
    }

    pub fn interior_key_off(&self, i: usize) -> usize {
        HEADER_SIZE + i * self.key_size
    }

    pub fn interior_ptr_off(&self, i: usize) -> usize {
        HEADER_SIZE + self.interior_max * self.key_size + i * PTR_SIZE
    }

    // --- overwrite layout ---

    pub fn ow_max(&self, interior: bool) -> usize {
        if interior {
            self.ow_interior_max
        } else {
            self.ow_leaf_max
        }
    }

    pub fn ow_bitmap_bytes(&self, interior: bool) -> usize {
        if interior {
            self.ow_interior_bitmap
        } else {
            self.ow_leaf_bitmap
        }
    }

    /// Payload width of one slot: record data for leaves, a child
    /// pointer for interiors.
    pub fn ow_payload_size(&self, interior: bool) -> usize {
        if interior {
            PTR_SIZE
        } else {
            self.data_size
        }
    }

    /// Slot-free bitmap offset (1 = free).
    pub fn ow_free_off(&self) -> usize {
        HEADER_SIZE
    }

    /// Slot-valid bitmap offset (1 = valid).
    pub fn ow_valid_off(&self, interior: bool) -> usize {
        HEADER_SIZE + self.ow_bitmap_bytes(interior)
    }

    fn ow_slot_base(&self, interior: bool) -> usize {
        HEADER_SIZE + 2 * self.ow_bitmap_bytes(interior)
    }

    pub fn ow_key_off(&self, interior: bool, i: usize) -> usize {
        self.ow_slot_base(interior) + i * self.key_size
    }

    pub fn ow_payload_off(&self, interior: bool, i: usize) -> usize {
        self.ow_slot_base(interior)
            + self.ow_max(interior) * self.key_size
            + i * self.ow_payload_size(interior)
    }
}
