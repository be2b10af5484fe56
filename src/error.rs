// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Error types for ReedTree operations.
//!
//! Provides structured error handling with detailed context for debugging.
//! Key-not-found is deliberately NOT an error: lookups return
//! `ReedResult<Option<...>>` so callers can distinguish a missing key from
//! a failing device without inspecting error variants.

use std::fmt;

/// Standard Result type for all ReedTree operations.
pub type ReedResult<T> = Result<T, ReedError>;

/// Error types for ReedTree operations.
#[derive(Debug, Clone)]
pub enum ReedError {
    /// I/O error raised by a storage driver; surfaced unchanged.
    IoError { operation: String, reason: String },

    /// Page number outside the driver's declared capacity.
    OutOfBounds { page: u32, capacity: u32 },

    /// The space manager could not free enough pages anywhere on the
    /// device. The tree is left consistent; the failing operation
    /// performed no writes.
    StorageFull { requested: u32 },

    /// A page failed validation (bad flags, impossible count, stale
    /// incarnation where a live one was expected).
    CorruptedPage { page: u32, reason: String },

    /// Rejected tree configuration.
    ConfigError { reason: String },

    /// Write to a page that has not been erased, on media that require
    /// erase-before-write (strict driver mode only).
    NotErased { page: u32 },
}

impl fmt::Display for ReedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError { operation, reason } => {
                write!(f, "I/O error during '{}': {}", operation, reason)
            }
            Self::OutOfBounds { page, capacity } => {
                write!(f, "Page {} outside device capacity {}", page, capacity)
            }
            Self::StorageFull { requested } => {
                write!(f, "Storage full: could not free {} page(s)", requested)
            }
            Self::CorruptedPage { page, reason } => {
                write!(f, "Page {} corrupted: {}", page, reason)
            }
            Self::ConfigError { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }
            Self::NotErased { page } => {
                write!(f, "Write to non-erased page {}", page)
            }
        }
    }
}

impl std::error::Error for ReedError {}

// Convenience conversion from std::io::Error
impl From<std::io::Error> for ReedError {
    fn from(err: std::io::Error) -> Self {
        ReedError::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}
