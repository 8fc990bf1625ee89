// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sensorlink gateway
//!
//! Terminates mutually authenticated TLS connections from sensor devices,
//! runs the session protocol on each of them, and fans accepted readings out
//! to the storage and metrics workers.
//!
//! # Architecture
//!
//! ```text
//! device --TLS--> GatewayServer --> run_session (one task per device)
//!                                        |
//!                                   Dispatcher
//!                                   /        \
//!                      storage queue          metrics queue
//!                           |                      |
//!                    StorageWorker          MetricsForwarder
//!                     (thread)                 (thread)
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod server;
pub mod tls;

pub use config::{ConfigError, GatewayConfig, MetricsConfig, StorageConfig, TlsConfig};
pub use connection::{ConnectionError, DeviceConnection};
pub use dispatch::{DispatchStats, Dispatcher};
pub use server::{run_session, GatewayServer, ServerError, ServerStats};
pub use tls::{ExpiredSerials, TlsError, EXPIRED_NOTICE};
