// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Storage worker
//!
//! Drains the storage queue one reading at a time and writes it to the
//! store. Every failure is logged and the loop moves on; it returns only
//! once all producers have dropped their senders.

use crate::store::{MeasurementStore, StoreError};
use crossbeam::channel::Receiver;
use sensorlink_proto::Reading;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Storage worker statistics
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Rows written.
    pub stored: AtomicU64,
    /// Key conflicts rolled back.
    pub duplicates: AtomicU64,
    /// Plug readings failing the validity check.
    pub rejected: AtomicU64,
    /// Other persistence errors.
    pub failed: AtomicU64,
}

impl StorageStats {
    pub fn snapshot(&self) -> StorageStatsSnapshot {
        StorageStatsSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of storage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStatsSnapshot {
    pub stored: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Consumes readings and persists them through a [`MeasurementStore`].
pub struct StorageWorker<S: MeasurementStore> {
    store: S,
    stats: Arc<StorageStats>,
}

impl<S: MeasurementStore> StorageWorker<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            stats: Arc::new(StorageStats::default()),
        }
    }

    /// Shared handle on the worker counters.
    pub fn stats(&self) -> Arc<StorageStats> {
        Arc::clone(&self.stats)
    }

    /// Process readings until the channel is closed.
    pub fn run(self, rx: Receiver<Reading>) -> StorageStatsSnapshot {
        info!("Storage worker started");

        for reading in rx.iter() {
            self.process(&reading);
        }

        let snapshot = self.stats.snapshot();
        info!(
            stored = snapshot.stored,
            duplicates = snapshot.duplicates,
            rejected = snapshot.rejected,
            failed = snapshot.failed,
            "Storage queue closed, worker stopping"
        );
        snapshot
    }

    /// Persist one reading.
    pub fn process(&self, reading: &Reading) {
        if let Reading::Plug(plug) = reading {
            if !plug.is_valid() {
                warn!(
                    device = %plug.mac_address,
                    id = %plug.id,
                    "Plug reported OFF without data, not stored"
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        match self.store.insert(reading) {
            Ok(()) => {
                debug!(
                    kind = %reading.kind(),
                    device = %reading.device_key(),
                    "Reading stored"
                );
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
            }
            Err(StoreError::Duplicate { table }) => {
                info!(
                    table,
                    id = %reading.record_id(),
                    device = %reading.device_key(),
                    "Duplicate reading skipped"
                );
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(
                    kind = %reading.kind(),
                    device = %reading.device_key(),
                    "Failed to store reading: {}",
                    e
                );
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
