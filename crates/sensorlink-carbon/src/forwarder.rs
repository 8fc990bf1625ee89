// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics forwarder worker
//!
//! Drains the metrics queue and publishes each reading as Carbon plaintext
//! samples. Transport failures drop the current reading, wait, and reconnect;
//! the loop returns only once all producers have dropped their senders.

use crate::client::{CarbonClient, ForwardError};
use crate::line;
use crate::names::DeviceNames;
use crossbeam::channel::Receiver;
use sensorlink_proto::{Reading, ReadingKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Forwarder configuration.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub host: String,
    pub port: u16,
    /// Pause after each power reading, matching the Carbon retention step.
    pub retention_interval: Duration,
    /// Pause before reconnecting after a transport failure.
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 2003,
            retention_interval: Duration::from_millis(1000),
            reconnect_delay: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

/// Forwarder statistics
#[derive(Debug, Default)]
pub struct ForwarderStats {
    /// Readings taken off the queue.
    pub items: AtomicU64,
    /// Plaintext lines written.
    pub lines_sent: AtomicU64,
    /// Plug readings failing the validity check.
    pub skipped: AtomicU64,
    /// Readings dropped on error.
    pub send_failures: AtomicU64,
    /// Successful reconnects after a failure.
    pub reconnects: AtomicU64,
}

impl ForwarderStats {
    pub fn snapshot(&self) -> ForwarderStatsSnapshot {
        ForwarderStatsSnapshot {
            items: self.items.load(Ordering::Relaxed),
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of forwarder statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStatsSnapshot {
    pub items: u64,
    pub lines_sent: u64,
    pub skipped: u64,
    pub send_failures: u64,
    pub reconnects: u64,
}

enum Forwarded {
    Sent(usize),
    Skipped,
}

/// Publishes readings to Carbon.
pub struct MetricsForwarder {
    client: CarbonClient,
    names: DeviceNames,
    config: ForwarderConfig,
    stats: Arc<ForwarderStats>,
    // set when a reconnect attempt failed and the next send must reopen
    reconnect_pending: bool,
}

impl MetricsForwarder {
    pub fn new(config: ForwarderConfig, names: DeviceNames) -> Self {
        Self {
            client: CarbonClient::new(&config.host, config.port, config.connect_timeout),
            names,
            config,
            stats: Arc::new(ForwarderStats::default()),
            reconnect_pending: false,
        }
    }

    /// Shared handle on the worker counters.
    pub fn stats(&self) -> Arc<ForwarderStats> {
        Arc::clone(&self.stats)
    }

    /// Process readings until the channel is closed.
    pub fn run(mut self, rx: Receiver<Reading>) -> ForwarderStatsSnapshot {
        info!("Metrics forwarder started, target {}", self.client.addr());

        if let Err(e) = self.client.connect() {
            warn!("Initial carbon connection failed, retrying on first reading: {}", e);
        }

        for reading in rx.iter() {
            self.handle(&reading);
        }

        let snapshot = self.stats.snapshot();
        info!(
            items = snapshot.items,
            lines_sent = snapshot.lines_sent,
            skipped = snapshot.skipped,
            send_failures = snapshot.send_failures,
            reconnects = snapshot.reconnects,
            "Metrics queue closed, forwarder stopping"
        );
        snapshot
    }

    /// Forward one reading, recovering from failures.
    pub fn handle(&mut self, reading: &Reading) {
        self.stats.items.fetch_add(1, Ordering::Relaxed);
        let was_connected = self.client.is_connected();

        match self.forward(reading) {
            Ok(Forwarded::Sent(lines)) => {
                self.stats
                    .lines_sent
                    .fetch_add(lines as u64, Ordering::Relaxed);
                if self.reconnect_pending && !was_connected {
                    info!("Carbon connection restored");
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    self.reconnect_pending = false;
                }
                if reading.kind() == ReadingKind::Power && !self.config.retention_interval.is_zero()
                {
                    thread::sleep(self.config.retention_interval);
                }
            }
            Ok(Forwarded::Skipped) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_transport() => {
                error!(
                    device = %reading.device_key(),
                    "Carbon transport failure, reading dropped: {}",
                    e
                );
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                self.reconnect();
            }
            Err(e) => {
                error!(device = %reading.device_key(), "Failed to forward reading: {}", e);
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn forward(&mut self, reading: &Reading) -> Result<Forwarded, ForwardError> {
        if let Reading::Plug(plug) = reading {
            if !plug.is_valid() {
                warn!(
                    device = %plug.mac_address,
                    "Plug reported OFF without data, not forwarded"
                );
                return Ok(Forwarded::Skipped);
            }
        }

        let base = self.names.resolve(reading.device_key());
        let lines = line::render(base, reading, chrono::Utc::now().timestamp());
        debug!(kind = %reading.kind(), path = base, "Sending {} samples", lines.len());

        self.client.send_lines(&lines)?;
        Ok(Forwarded::Sent(lines.len()))
    }

    fn reconnect(&mut self) {
        self.client.disconnect();
        thread::sleep(self.config.reconnect_delay);

        match self.client.connect() {
            Ok(()) => {
                self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                self.reconnect_pending = false;
            }
            Err(e) => {
                warn!("Reconnect to carbon failed, retrying on next reading: {}", e);
                self.reconnect_pending = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crossbeam::channel::unbounded;
    use sensorlink_proto::{PlugReading, PowerReading, TempHumReading};
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Instant;

    fn config(port: u16) -> ForwarderConfig {
        ForwarderConfig {
            host: "127.0.0.1".into(),
            port,
            retention_interval: Duration::ZERO,
            reconnect_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn power() -> Reading {
        Reading::Power(PowerReading {
            id: "r".into(),
            deviceid: "rfmpi-7".into(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            power1: 1.5,
            power2: 2.0,
            power3: 3.0,
            power4: 4.0,
            vrms: 230.0,
            temp: 20.0,
        })
    }

    fn temp_hum() -> Reading {
        Reading::TempHum(TempHumReading {
            id: "t".into(),
            deviceid: "th-1".into(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            temp: 18.0,
            temp_external: 3.5,
            humidity: 60.0,
            battery: 2.8,
        })
    }

    fn live_plug() -> Reading {
        Reading::Plug(PlugReading {
            id: "p".into(),
            mac_address: "00:0d:6f:00:0b:12:34:56".into(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            load: Some(40.0),
            irms: Some(0.2),
            vrms: Some(230.0),
            freq: Some(50.0),
            pow: "ON".into(),
            work: Some(3.5),
        })
    }

    fn dead_plug() -> Reading {
        Reading::Plug(PlugReading {
            id: "p".into(),
            mac_address: "00:0d:6f:00:0b:12:34:56".into(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            load: None,
            irms: None,
            vrms: None,
            freq: None,
            pow: "OFF".into(),
            work: None,
        })
    }

    #[test]
    fn test_forwards_lines_with_resolved_path() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = String::new();
            sock.read_to_string(&mut buf).unwrap();
            buf
        });

        let names: DeviceNames = [("rfmpi-7", "home.kitchen.")].into_iter().collect();
        let forwarder = MetricsForwarder::new(config(port), names);
        let (tx, rx) = unbounded();

        tx.send(power()).unwrap();
        tx.send(dead_plug()).unwrap();
        tx.send(temp_hum()).unwrap();
        drop(tx);

        let stats = forwarder.run(rx);
        assert_eq!(stats.items, 3);
        assert_eq!(stats.lines_sent, 10);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.send_failures, 0);

        let received = reader.join().unwrap();
        let lines: Vec<&str> = received.lines().collect();
        assert_eq!(lines.len(), 10);
        assert!(lines[0].starts_with("home.kitchen.power1 1.5 "));
        assert!(lines[5].starts_with("home.kitchen.temperature 20 "));
        // unmapped device falls back to its raw key
        assert!(lines[6].starts_with("th-1.temperature 18 "));
        assert!(!received.contains("12:34:56"));
    }

    #[test]
    fn test_unreachable_carbon_drops_items_and_continues() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let forwarder = MetricsForwarder::new(config(port), DeviceNames::new());
        let (tx, rx) = unbounded();
        tx.send(power()).unwrap();
        tx.send(temp_hum()).unwrap();
        drop(tx);

        let stats = forwarder.run(rx);
        assert_eq!(stats.items, 2);
        assert_eq!(stats.send_failures, 2);
        assert_eq!(stats.reconnects, 0);
        assert_eq!(stats.lines_sent, 0);
    }

    fn timed(forwarder: &mut MetricsForwarder, reading: &Reading) -> Duration {
        let start = Instant::now();
        forwarder.handle(reading);
        start.elapsed()
    }

    #[test]
    fn test_retention_pause_only_after_power() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = String::new();
            sock.read_to_string(&mut buf).unwrap();
            buf
        });

        let retention = Duration::from_millis(300);
        let mut forwarder = MetricsForwarder::new(
            ForwarderConfig {
                retention_interval: retention,
                ..config(port)
            },
            DeviceNames::new(),
        );

        assert!(timed(&mut forwarder, &power()) >= retention);
        assert!(timed(&mut forwarder, &temp_hum()) < retention);
        assert!(timed(&mut forwarder, &live_plug()) < retention);

        let stats = forwarder.stats().snapshot();
        assert_eq!(stats.lines_sent, 16);
        drop(forwarder);
        assert_eq!(reader.join().unwrap().lines().count(), 16);
    }

    #[test]
    fn test_reconnects_after_peer_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = std::thread::spawn(move || {
            let (first, _) = listener.accept().unwrap();
            drop(first);

            let (mut second, _) = listener.accept().unwrap();
            let mut buf = String::new();
            second.read_to_string(&mut buf).unwrap();
            buf
        });

        let mut forwarder = MetricsForwarder::new(config(port), DeviceNames::new());

        // lands in the kernel buffer of a socket the peer already closed
        forwarder.handle(&temp_hum());
        std::thread::sleep(Duration::from_millis(200));

        // the peer's reset surfaces here; reading dropped, connection reopened
        forwarder.handle(&power());
        let stats = forwarder.stats().snapshot();
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.reconnects, 1);

        forwarder.handle(&live_plug());
        let stats = forwarder.stats().snapshot();
        assert_eq!(stats.items, 3);
        assert_eq!(stats.send_failures, 1);
        drop(forwarder);

        let received = reader.join().unwrap();
        assert_eq!(received.lines().count(), 6);
        assert!(received.starts_with("00:0d:6f:00:0b:12:34:56.load 40 "));
        assert!(!received.contains("power1"));
    }
}
