// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for range iteration.

#[cfg(test)]
mod tests {
    use crate::storage::{MemStorage, StorageDriver};
    use crate::tree::{compare_i32_le, BPlusTree, StorageMode, TreeConfig};

    const PAGE: usize = 512;

    fn tree_with(mode: StorageMode, keys: impl Iterator<Item = i32>) -> BPlusTree {
        let driver: Box<dyn StorageDriver> = match mode {
            StorageMode::UpdateInPlace => Box::new(MemStorage::new(1024, PAGE)),
            _ => Box::new(MemStorage::strict(1024, PAGE)),
        };
        let mut tree = BPlusTree::create(
            driver,
            TreeConfig {
                page_size: PAGE,
                key_size: 4,
                data_size: 12,
                frame_count: 3,
                erase_block_pages: 8,
                mode,
                mapping_bytes: 256,
                compare: compare_i32_le,
            },
        )
        .unwrap();
        let mut data = [0u8; 12];
        for i in keys {
            data[..4].copy_from_slice(&i.to_le_bytes());
            tree.put(&i.to_le_bytes(), &data).unwrap();
        }
        tree
    }

    fn drain(
        tree: &mut BPlusTree,
        min: Option<i32>,
        max: Option<i32>,
    ) -> Vec<i32> {
        let min_b = min.map(|m| m.to_le_bytes());
        let max_b = max.map(|m| m.to_le_bytes());
        tree.collect_range(min_b.as_ref().map(|b| &b[..]), max_b.as_ref().map(|b| &b[..]))
            .unwrap()
            .into_iter()
            .map(|(k, d)| {
                // Data integrity rides along with every drain.
                assert_eq!(&d[..4], &k[..]);
                i32::from_le_bytes(k[..].try_into().unwrap())
            })
            .collect()
    }

    const ALL_MODES: [StorageMode; 3] = [
        StorageMode::UpdateInPlace,
        StorageMode::CopyOnWrite,
        StorageMode::InPageOverwrite,
    ];

    #[test]
    fn test_empty_tree_yields_nothing() {
        for mode in ALL_MODES {
            let mut tree = tree_with(mode, std::iter::empty());
            assert!(drain(&mut tree, None, None).is_empty());
            assert!(drain(&mut tree, Some(0), Some(100)).is_empty());
        }
    }

    #[test]
    fn test_full_scan_is_sorted_and_total() {
        for mode in ALL_MODES {
            // Insertion order scrambled; iteration order must not be.
            let mut tree = tree_with(mode, (0..500).map(|i| (i * 7919) % 500));
            let got = drain(&mut tree, None, None);
            let expect: Vec<i32> = (0..500).collect();
            assert_eq!(got, expect, "mode {:?}", mode);
        }
    }

    #[test]
    fn test_bounds_are_inclusive() {
        for mode in ALL_MODES {
            let mut tree = tree_with(mode, 0..100);
            assert_eq!(drain(&mut tree, Some(10), Some(20)), (10..=20).collect::<Vec<_>>());
            assert_eq!(drain(&mut tree, Some(50), Some(50)), vec![50]);
        }
    }

    #[test]
    fn test_bounds_between_keys() {
        for mode in ALL_MODES {
            // Only even keys present; odd bounds fall between records.
            let mut tree = tree_with(mode, (0..100).map(|i| i * 2));
            let got = drain(&mut tree, Some(31), Some(41));
            assert_eq!(got, vec![32, 34, 36, 38, 40]);
        }
    }

    #[test]
    fn test_min_only_and_max_only() {
        for mode in ALL_MODES {
            let mut tree = tree_with(mode, 0..100);
            assert_eq!(drain(&mut tree, Some(90), None), (90..100).collect::<Vec<_>>());
            assert_eq!(drain(&mut tree, None, Some(9)), (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_range_outside_key_space() {
        for mode in ALL_MODES {
            let mut tree = tree_with(mode, 0..50);
            assert!(drain(&mut tree, Some(100), Some(200)).is_empty());
            assert!(drain(&mut tree, Some(-50), Some(-1)).is_empty());
            // Bracketing the whole space yields everything.
            assert_eq!(drain(&mut tree, Some(-50), Some(200)), (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_scan_crosses_leaf_boundaries() {
        for mode in ALL_MODES {
            // Enough records for several leaves and an interior level.
            let mut tree = tree_with(mode, 0..1000);
            assert!(tree.height() >= 2);
            let got = drain(&mut tree, Some(25), Some(975));
            assert_eq!(got, (25..=975).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_iterator_streaming_api() {
        let mut tree = tree_with(StorageMode::UpdateInPlace, 0..100);
        let min = 40i32.to_le_bytes();
        let max = 44i32.to_le_bytes();
        let mut it = tree.range_scan(Some(&min), Some(&max)).unwrap();

        let mut key = [0u8; 4];
        let mut data = [0u8; 12];
        let mut got = Vec::new();
        while tree.next_record(&mut it, &mut key, &mut data).unwrap() {
            got.push(i32::from_le_bytes(key));
        }
        assert_eq!(got, vec![40, 41, 42, 43, 44]);
        assert!(it.is_done());
        // Exhausted iterators stay exhausted.
        assert!(!tree.next_record(&mut it, &mut key, &mut data).unwrap());
    }

    #[test]
    fn test_scan_sees_replaced_values() {
        for mode in ALL_MODES {
            let mut tree = tree_with(mode, 0..60);
            let mut data = [0xABu8; 12];
            data[..4].copy_from_slice(&30i32.to_le_bytes());
            tree.put(&30i32.to_le_bytes(), &data).unwrap();

            let rows = tree
                .collect_range(Some(&30i32.to_le_bytes()), Some(&30i32.to_le_bytes()))
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].1[4..], [0xABu8; 8]);
        }
    }
}
