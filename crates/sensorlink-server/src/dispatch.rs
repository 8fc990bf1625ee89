// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out of accepted readings into the worker queues.

use crossbeam::channel::Sender;
use sensorlink_proto::Reading;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Counters shared by every clone of a [`Dispatcher`].
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Readings handed to the dispatcher.
    pub readings: AtomicU64,
    /// Enqueue failures on the storage queue.
    pub storage_dropped: AtomicU64,
    /// Enqueue failures on the metrics queue.
    pub metrics_dropped: AtomicU64,
}

/// Copies each reading into the storage and metrics queues.
///
/// Enqueueing never blocks. A closed queue is logged and does not affect the
/// other one.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    storage: Sender<Reading>,
    metrics: Sender<Reading>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(storage: Sender<Reading>, metrics: Sender<Reading>) -> Self {
        Self {
            storage,
            metrics,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Enqueue every reading of an accepted batch.
    pub fn dispatch(&self, readings: Vec<Reading>) {
        for reading in readings {
            self.stats.readings.fetch_add(1, Ordering::Relaxed);

            if self.storage.send(reading.clone()).is_err() {
                error!(device = %reading.device_key(), "Storage queue closed, reading dropped");
                self.stats.storage_dropped.fetch_add(1, Ordering::Relaxed);
            }

            if let Err(e) = self.metrics.send(reading) {
                error!(device = %e.0.device_key(), "Metrics queue closed, reading dropped");
                self.stats.metrics_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
