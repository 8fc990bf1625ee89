// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # sensorlink-carbon
//!
//! Publishes sensorlink readings to a Graphite/Carbon plaintext listener.
//!
//! ## Architecture
//!
//! ```text
//! metrics queue (crossbeam) -> MetricsForwarder -> CarbonClient -> carbon:2003
//!                                    |
//!                                    +-- DeviceNames (device key -> metric path)
//! ```
//!
//! Each reading becomes one line per field:
//!
//! ```text
//! home.kitchen.rfmpi.power1 120.5 1741944413
//! home.kitchen.rfmpi.vrms 231.5 1741944413
//! ```

pub mod client;
pub mod forwarder;
pub mod line;
pub mod names;

pub use client::{CarbonClient, ForwardError};
pub use forwarder::{ForwarderConfig, ForwarderStats, ForwarderStatsSnapshot, MetricsForwarder};
pub use names::{DeviceNames, NameTableError};
