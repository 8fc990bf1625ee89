// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sensorlink storage
//!
//! Persists accepted readings into one relational table per reading kind.
//!
//! # Architecture
//!
//! ```text
//! storage queue (crossbeam)
//!       |
//!       v
//! StorageWorker ---> MeasurementStore (SqliteStore)
//!                      +-- power
//!                      +-- plug
//!                      +-- temp_hum
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensorlink_store::{SqliteStore, StorageWorker};
//!
//! let (tx, rx) = crossbeam::channel::unbounded();
//! let worker = StorageWorker::new(SqliteStore::new("sensorlink.db")?);
//! std::thread::spawn(move || worker.run(rx));
//! # drop(tx);
//! # Ok::<(), sensorlink_store::StoreError>(())
//! ```

pub mod sqlite;
pub mod store;
pub mod worker;

pub use sqlite::SqliteStore;
pub use store::{table_name, MeasurementStore, StoreError};
pub use worker::{StorageStats, StorageStatsSnapshot, StorageWorker};
