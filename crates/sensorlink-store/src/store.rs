// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Measurement store abstraction
//!
//! Defines the trait for relational backends.

use sensorlink_proto::{Reading, ReadingKind};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same (id, device, ts) key already exists.
    #[error("duplicate row in {table}")]
    Duplicate { table: &'static str },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Table receiving readings of the given kind.
pub fn table_name(kind: ReadingKind) -> &'static str {
    match kind {
        ReadingKind::Power => "power",
        ReadingKind::TempHum => "temp_hum",
        ReadingKind::Plug => "plug",
    }
}

/// Measurement store trait
///
/// One table per reading kind, keyed by (record id, device, timestamp).
///
/// # Implementations
///
/// - `SqliteStore` -- file-backed or in-memory
pub trait MeasurementStore {
    /// Insert one reading in its own transaction.
    ///
    /// A key conflict leaves the table unchanged and returns
    /// [`StoreError::Duplicate`].
    fn insert(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Number of rows stored for a reading kind.
    fn count(&self, kind: ReadingKind) -> Result<u64, StoreError>;
}
