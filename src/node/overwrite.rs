// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Overwrite-layout node operations.
//!
//! Used by the in-page-overwrite (NOR/dataflash) mode. Records occupy
//! fixed slots guarded by two bitmaps: slot-free (1 = free) and
//! slot-valid (1 = valid). A live record is a slot that is occupied AND
//! valid. Mutating a page only ever clears bits - occupying a slot
//! clears its free bit and programs erased `0xFF` bytes, replacing or
//! superseding a record clears its valid bit - so the whole page can be
//! rewritten in place on media that forbid erase-less bit setting.
//!
//! Records are NOT key-ordered in storage. Searches scan the valid
//! slots; a point lookup touches one page once, and the scan is what
//! buys the in-place overwrite that saves a page write. Do not sort
//! eagerly.
//!
//! Interior slots pair a separator with a child pointer; the separator
//! is the child's greatest key at the time the slot was written. The
//! child with the greatest separator also receives every key above all
//! separators, so it may outgrow its own.

use crate::bits::{slice_get_bit, slice_set_bit};
use crate::node::{KeyCompare, NodeLayout, PTR_SIZE};
use std::cmp::Ordering;

pub fn slot_key<'a>(page: &'a [u8], lay: &NodeLayout, interior: bool, i: usize) -> &'a [u8] {
    let off = lay.ow_key_off(interior, i);
    &page[off..off + lay.key_size]
}

pub fn slot_payload<'a>(page: &'a [u8], lay: &NodeLayout, interior: bool, i: usize) -> &'a [u8] {
    let off = lay.ow_payload_off(interior, i);
    &page[off..off + lay.ow_payload_size(interior)]
}

pub fn slot_child(page: &[u8], lay: &NodeLayout, i: usize) -> u32 {
    let off = lay.ow_payload_off(true, i);
    u32::from_le_bytes(page[off..off + PTR_SIZE].try_into().unwrap())
}

/// The free bitmap sits at the same offset for both node kinds.
pub fn slot_is_free(page: &[u8], lay: &NodeLayout, _interior: bool, i: usize) -> bool {
    slice_get_bit(&page[lay.ow_free_off()..], i)
}

fn slot_valid_bit(page: &[u8], lay: &NodeLayout, interior: bool, i: usize) -> bool {
    slice_get_bit(&page[lay.ow_valid_off(interior)..], i)
}

/// A live record: occupied and not invalidated.
pub fn slot_is_record(page: &[u8], lay: &NodeLayout, interior: bool, i: usize) -> bool {
    !slot_is_free(page, lay, interior, i) && slot_valid_bit(page, lay, interior, i)
}

/// Lowest free slot, if any.
pub fn find_free_slot(page: &[u8], lay: &NodeLayout, interior: bool) -> Option<usize> {
    (0..lay.ow_max(interior)).find(|&i| slot_is_free(page, lay, interior, i))
}

pub fn free_slot_count(page: &[u8], lay: &NodeLayout, interior: bool) -> usize {
    (0..lay.ow_max(interior))
        .filter(|&i| slot_is_free(page, lay, interior, i))
        .count()
}

pub fn record_count(page: &[u8], lay: &NodeLayout, interior: bool) -> usize {
    (0..lay.ow_max(interior))
        .filter(|&i| slot_is_record(page, lay, interior, i))
        .count()
}

/// Programs a record into a free slot: clears the free bit and writes
/// key and payload. The valid bit is already 1 in the erased state.
pub fn occupy_slot(
    page: &mut [u8],
    lay: &NodeLayout,
    interior: bool,
    i: usize,
    key: &[u8],
    payload: &[u8],
) {
    debug_assert!(slot_is_free(page, lay, interior, i));
    slice_set_bit(&mut page[lay.ow_free_off()..], i, false);
    let ko = lay.ow_key_off(interior, i);
    page[ko..ko + lay.key_size].copy_from_slice(key);
    let po = lay.ow_payload_off(interior, i);
    page[po..po + payload.len()].copy_from_slice(payload);
}

/// Clears a record's valid bit (1 -> 0). The slot stays occupied until
/// the page is compacted into a fresh incarnation.
pub fn invalidate_slot(page: &mut [u8], lay: &NodeLayout, interior: bool, i: usize) {
    let off = lay.ow_valid_off(interior);
    slice_set_bit(&mut page[off..], i, false);
}

/// Linear scan for an exact key among live records.
pub fn find_exact(
    page: &[u8],
    lay: &NodeLayout,
    interior: bool,
    cmp: KeyCompare,
    key: &[u8],
) -> Option<usize> {
    (0..lay.ow_max(interior)).find(|&i| {
        slot_is_record(page, lay, interior, i)
            && cmp(slot_key(page, lay, interior, i), key) == Ordering::Equal
    })
}

/// Routing for a descent: the valid slot with the smallest separator
/// >= `key`, falling back to the greatest separator when `key` exceeds
/// them all. None only on a page with no live slots.
pub fn child_slot_lub(page: &[u8], lay: &NodeLayout, cmp: KeyCompare, key: &[u8]) -> Option<usize> {
    let mut lub: Option<usize> = None;
    let mut greatest: Option<usize> = None;
    for i in 0..lay.ow_max(true) {
        if !slot_is_record(page, lay, true, i) {
            continue;
        }
        let k = slot_key(page, lay, true, i);
        if greatest.is_none_or(|g| cmp(k, slot_key(page, lay, true, g)) == Ordering::Greater) {
            greatest = Some(i);
        }
        if cmp(k, key) != Ordering::Less
            && lub.is_none_or(|l| cmp(k, slot_key(page, lay, true, l)) == Ordering::Less)
        {
            lub = Some(i);
        }
    }
    lub.or(greatest)
}

/// Slot holding child pointer `child_id`, if present.
pub fn find_child_slot(page: &[u8], lay: &NodeLayout, child_id: u32) -> Option<usize> {
    (0..lay.ow_max(true))
        .find(|&i| slot_is_record(page, lay, true, i) && slot_child(page, lay, i) == child_id)
}

/// Live slot with the smallest key, for leftmost descents.
pub fn min_key_slot(page: &[u8], lay: &NodeLayout, interior: bool, cmp: KeyCompare) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in 0..lay.ow_max(interior) {
        if slot_is_record(page, lay, interior, i)
            && best.is_none_or(|b| {
                cmp(slot_key(page, lay, interior, i), slot_key(page, lay, interior, b))
                    == Ordering::Less
            })
        {
            best = Some(i);
        }
    }
    best
}

/// Live slot with the greatest key.
pub fn max_key_slot(page: &[u8], lay: &NodeLayout, interior: bool, cmp: KeyCompare) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in 0..lay.ow_max(interior) {
        if slot_is_record(page, lay, interior, i)
            && best.is_none_or(|b| {
                cmp(slot_key(page, lay, interior, i), slot_key(page, lay, interior, b))
                    == Ordering::Greater
            })
        {
            best = Some(i);
        }
    }
    best
}

/// Live slot with the smallest key strictly above `key`, for in-order
/// traversal of an unsorted page.
pub fn next_slot_by_key(
    page: &[u8],
    lay: &NodeLayout,
    interior: bool,
    cmp: KeyCompare,
    key: &[u8],
) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in 0..lay.ow_max(interior) {
        if !slot_is_record(page, lay, interior, i) {
            continue;
        }
        let k = slot_key(page, lay, interior, i);
        if cmp(k, key) == Ordering::Greater
            && best.is_none_or(|b| cmp(k, slot_key(page, lay, interior, b)) == Ordering::Less)
        {
            best = Some(i);
        }
    }
    best
}

/// Insert-or-replace while BUILDING a fresh page image (split halves).
/// A replace rewrites the payload bytes directly, which is only legal
/// because the image is headed for a fresh write to an erased page, not
/// a bit-clearing overwrite. Returns false when the key is new and no
/// free slot remains.
pub fn upsert(
    page: &mut [u8],
    lay: &NodeLayout,
    interior: bool,
    cmp: KeyCompare,
    key: &[u8],
    payload: &[u8],
) -> bool {
    if let Some(slot) = find_exact(page, lay, interior, cmp, key) {
        let off = lay.ow_payload_off(interior, slot);
        page[off..off + payload.len()].copy_from_slice(payload);
        return true;
    }
    match find_free_slot(page, lay, interior) {
        Some(slot) => {
            occupy_slot(page, lay, interior, slot, key, payload);
            true
        }
        None => false,
    }
}

fn swap_ranges(page: &mut [u8], a: usize, b: usize, len: usize) {
    for k in 0..len {
        page.swap(a + k, b + k);
    }
}

fn swap_slots(page: &mut [u8], lay: &NodeLayout, interior: bool, a: usize, b: usize) {
    swap_ranges(
        page,
        lay.ow_key_off(interior, a),
        lay.ow_key_off(interior, b),
        lay.key_size,
    );
    swap_ranges(
        page,
        lay.ow_payload_off(interior, a),
        lay.ow_payload_off(interior, b),
        lay.ow_payload_size(interior),
    );
}

fn move_slot(page: &mut [u8], lay: &NodeLayout, interior: bool, from: usize, to: usize) {
    let ks = lay.ow_key_off(interior, from);
    let kd = lay.ow_key_off(interior, to);
    page.copy_within(ks..ks + lay.key_size, kd);
    let ps = lay.ow_payload_off(interior, from);
    let pd = lay.ow_payload_off(interior, to);
    page.copy_within(ps..ps + lay.ow_payload_size(interior), pd);
}

/// Compacts a full page in the frame before a split: drops invalidated
/// slots, packs survivors to the front, insertion-sorts them by key, and
/// rewrites both bitmaps. The unused tail is returned to the erased
/// `0xFF` state so the image is fit for a fresh write. Insertion sort on
/// purpose: slot counts stay around thirty and recursion is unwelcome
/// here.
///
/// Returns the survivor count. The caller must persist the result as a
/// NEW page - the packed image is not a bit-clearing rewrite of the old
/// one.
pub fn compact_sort(page: &mut [u8], lay: &NodeLayout, interior: bool, cmp: KeyCompare) -> usize {
    let max = lay.ow_max(interior);

    // Pack live records to the front, preserving slot order.
    let mut n = 0usize;
    for i in 0..max {
        if slot_is_record(page, lay, interior, i) {
            if i != n {
                move_slot(page, lay, interior, i, n);
            }
            n += 1;
        }
    }

    // Insertion sort the packed prefix.
    for i in 1..n {
        let mut j = i;
        while j > 0
            && cmp(
                slot_key(page, lay, interior, j - 1),
                slot_key(page, lay, interior, j),
            ) == Ordering::Greater
        {
            swap_slots(page, lay, interior, j - 1, j);
            j -= 1;
        }
    }

    rewrite_tail(page, lay, interior, n);
    n
}

/// Moves the upper half of a compacted page into the freshly initialised
/// `dst`. Both images end up packed, sorted, and erased-clean in the
/// tail.
pub fn split_into(src: &mut [u8], dst: &mut [u8], lay: &NodeLayout, interior: bool, n: usize) {
    let mid = n / 2;
    let moved = n - mid;

    let payload = lay.ow_payload_size(interior);
    dst[lay.ow_key_off(interior, 0)..lay.ow_key_off(interior, moved)]
        .copy_from_slice(&src[lay.ow_key_off(interior, mid)..lay.ow_key_off(interior, n)]);
    dst[lay.ow_payload_off(interior, 0)..lay.ow_payload_off(interior, 0) + moved * payload]
        .copy_from_slice(
            &src[lay.ow_payload_off(interior, mid)..lay.ow_payload_off(interior, mid) + moved * payload],
        );

    rewrite_tail(src, lay, interior, mid);
    rewrite_tail(dst, lay, interior, moved);
}

/// Rewrites both bitmaps for a packed prefix of `n` records and restores
/// the erased state on everything behind it.
fn rewrite_tail(page: &mut [u8], lay: &NodeLayout, interior: bool, n: usize) {
    let max = lay.ow_max(interior);
    for i in 0..max {
        slice_set_bit(&mut page[lay.ow_free_off()..], i, i >= n);
        let off = lay.ow_valid_off(interior);
        slice_set_bit(&mut page[off..], i, true);
    }
    // Erase the record bytes of the tail slots.
    if n < max {
        let ks = lay.ow_key_off(interior, n);
        let ke = lay.ow_key_off(interior, max);
        page[ks..ke].fill(0xFF);
        let ps = lay.ow_payload_off(interior, n);
        let pe = lay.ow_payload_off(interior, max);
        page[ps..pe].fill(0xFF);
    }
}
