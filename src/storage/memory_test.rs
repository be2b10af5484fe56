// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the in-memory storage driver.

#[cfg(test)]
mod tests {
    use crate::error::ReedError;
    use crate::storage::{MemStorage, StorageDriver};

    const PAGE: usize = 64;

    #[test]
    fn test_relaxed_read_write_round_trip() {
        let mut dev = MemStorage::new(8, PAGE);
        let tx = [0xABu8; PAGE];
        dev.write(3, &tx).unwrap();

        let mut rx = [0u8; PAGE];
        dev.read(3, &mut rx).unwrap();
        assert_eq!(rx, tx);

        // Untouched pages read back zeroed.
        dev.read(4, &mut rx).unwrap();
        assert_eq!(rx, [0u8; PAGE]);
    }

    #[test]
    fn test_relaxed_rewrite_in_place() {
        let mut dev = MemStorage::new(4, PAGE);
        dev.write(0, &[0x00u8; PAGE]).unwrap();
        dev.write(0, &[0xFFu8; PAGE]).unwrap();
        let mut rx = [0u8; PAGE];
        dev.read(0, &mut rx).unwrap();
        assert_eq!(rx, [0xFFu8; PAGE]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut dev = MemStorage::new(4, PAGE);
        let mut buf = [0u8; PAGE];
        assert!(matches!(
            dev.read(4, &mut buf),
            Err(ReedError::OutOfBounds { page: 4, capacity: 4 })
        ));
        assert!(dev.write(9, &buf).is_err());
        assert!(dev.erase(0, 4).is_err());
    }

    #[test]
    fn test_wrong_buffer_size() {
        let mut dev = MemStorage::new(4, PAGE);
        let mut small = [0u8; PAGE - 1];
        assert!(dev.read(0, &mut small).is_err());
    }

    #[test]
    fn test_strict_starts_erased() {
        let mut dev = MemStorage::strict(4, PAGE);
        assert!(dev.is_erased(0));
        let mut rx = [0u8; PAGE];
        dev.read(0, &mut rx).unwrap();
        assert_eq!(rx, [0xFFu8; PAGE]);
    }

    #[test]
    fn test_strict_write_clears_erased_state() {
        let mut dev = MemStorage::strict(4, PAGE);
        dev.write(1, &[0x55u8; PAGE]).unwrap();
        assert!(!dev.is_erased(1));
    }

    #[test]
    fn test_strict_bit_clearing_rewrite_allowed() {
        let mut dev = MemStorage::strict(4, PAGE);
        dev.write(0, &[0b1111_0000u8; PAGE]).unwrap();
        // 1 -> 0 transitions only: permitted.
        dev.write(0, &[0b1010_0000u8; PAGE]).unwrap();
        let mut rx = [0u8; PAGE];
        dev.read(0, &mut rx).unwrap();
        assert_eq!(rx, [0b1010_0000u8; PAGE]);
    }

    #[test]
    fn test_strict_bit_setting_rewrite_rejected() {
        let mut dev = MemStorage::strict(4, PAGE);
        dev.write(0, &[0b0000_1111u8; PAGE]).unwrap();
        // Attempts a 0 -> 1 transition.
        let err = dev.write(0, &[0b0001_1111u8; PAGE]).unwrap_err();
        assert!(matches!(err, ReedError::NotErased { page: 0 }));
    }

    #[test]
    fn test_strict_erase_enables_rewrite() {
        let mut dev = MemStorage::strict(8, PAGE);
        dev.write(2, &[0x00u8; PAGE]).unwrap();
        assert!(matches!(
            dev.write(2, &[0xFFu8; PAGE]),
            Err(ReedError::NotErased { .. })
        ));

        dev.erase(0, 7).unwrap();
        assert!(dev.is_erased(2));
        dev.write(2, &[0xFFu8; PAGE]).unwrap();
    }
}
