// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway server core.

use crate::config::GatewayConfig;
use crate::connection::{ConnectionError, DeviceConnection};
use crate::dispatch::Dispatcher;
use crate::tls::{self, ExpiredSerials, TlsError, EXPIRED_NOTICE};
use sensorlink_proto::{codec, Session, SessionStats, Transition};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Accept-loop counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections: AtomicU64,
    pub handshake_failures: AtomicU64,
    pub expired_rejected: AtomicU64,
    pub active_sessions: AtomicU64,
}

/// TLS ingestion server: one session engine per device connection.
#[derive(Clone)]
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    acceptor: TlsAcceptor,
    expired: Arc<ExpiredSerials>,
    dispatcher: Dispatcher,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    stats: Arc<ServerStats>,
}

impl GatewayServer {
    /// Create a new server, loading TLS material from the configured paths.
    pub fn new(config: GatewayConfig, dispatcher: Dispatcher) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let acceptor = tls::acceptor(&config.tls)?;
        let expired = ExpiredSerials::new(&config.tls.expired_serials);
        if !expired.is_empty() {
            info!("{} client certificate serials marked expired", expired.len());
        }

        Ok(Self {
            config: Arc::new(config),
            acceptor,
            expired: Arc::new(expired),
            dispatcher,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        match listener.local_addr() {
            Ok(addr) => info!("Gateway listening on {}", addr),
            Err(e) => warn!("Gateway listening (local address unavailable: {})", e),
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("New connection from {}", peer_addr);
                            self.stats.connections.fetch_add(1, Ordering::Relaxed);

                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// TLS handshake, expired-serial check, then the session loop.
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let limit = Duration::from_millis(self.config.handshake_timeout_ms);
        let tls_stream = match tokio::time::timeout(limit, self.acceptor.accept(stream)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                self.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
                return Err(ServerError::Handshake(e));
            }
            Err(_) => {
                self.stats.handshake_failures.fetch_add(1, Ordering::Relaxed);
                return Err(ServerError::HandshakeTimeout(limit));
            }
        };

        let serial = {
            let (_, session) = tls_stream.get_ref();
            match session.peer_certificates().and_then(|certs| certs.first()) {
                Some(leaf) => Some(tls::certificate_serial(leaf)?),
                None => None,
            }
        };
        debug!(peer = %peer_addr, serial = ?serial, "Handshake complete");

        let mut conn = DeviceConnection::new(tls_stream, peer_addr, self.config.max_frame_size);

        if let Some(serial) = serial.as_deref() {
            if self.expired.contains(serial) {
                warn!(peer = %peer_addr, serial, "Client certificate expired, closing");
                self.stats.expired_rejected.fetch_add(1, Ordering::Relaxed);
                conn.send_payload(EXPIRED_NOTICE.as_bytes()).await?;
                conn.shutdown().await?;
                return Ok(());
            }
        }

        self.stats.active_sessions.fetch_add(1, Ordering::Relaxed);
        let result = run_session(&mut conn, &self.dispatcher, &self.shutdown).await;
        self.stats.active_sessions.fetch_sub(1, Ordering::Relaxed);

        let stats = result?;
        info!(
            peer = %peer_addr,
            accepted = stats.accepted,
            backfilled = stats.backfilled,
            abandoned = stats.abandoned,
            duplicates = stats.duplicates,
            resync_requests = stats.resync_requests,
            malformed_readings = stats.malformed_readings,
            "Session closed"
        );
        Ok(())
    }

    /// Signal the server to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Check if server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Drive one device session until the peer disconnects or shutdown is
/// signalled.
///
/// Malformed frames are logged and skipped; transport errors end the session.
pub async fn run_session<S>(
    conn: &mut DeviceConnection<S>,
    dispatcher: &Dispatcher,
    shutdown: &Notify,
) -> Result<SessionStats, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = conn.peer_addr();
    let mut session = Session::new();

    loop {
        let payload = tokio::select! {
            result = conn.read_frame() => match result? {
                Some(payload) => payload,
                None => {
                    info!("Connection closed: {}", peer);
                    break;
                }
            },
            _ = shutdown.notified() => {
                debug!("Session shutting down: {}", peer);
                break;
            }
        };

        let msg = match codec::decode(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(peer = %peer, "Dropping malformed frame: {}", e);
                continue;
            }
        };
        debug!(peer = %peer, kind = msg.type_name(), "Message received");

        let transition = session.handle(msg);
        if let Some(reply) = transition.reply() {
            conn.send_message(reply).await?;
        }

        if let Transition::Accepted {
            backfill: true,
            readings,
            ..
        } = &transition
        {
            info!(
                peer = %peer,
                readings = readings.len(),
                still_missing = session.missing().len(),
                "Gap filled by late measurement"
            );
        }

        let readings = transition.into_readings();
        if !readings.is_empty() {
            dispatcher.dispatch(readings);
        }
    }

    Ok(session.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crossbeam::channel::unbounded;
    use sensorlink_proto::{Message, PowerReading, Reading};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn power(id: &str) -> Reading {
        Reading::Power(PowerReading {
            id: id.into(),
            deviceid: "rfmpi-7".into(),
            ts: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            power1: 1.0,
            power2: 2.0,
            power3: 3.0,
            power4: 4.0,
            vrms: 230.0,
            temp: 22.0,
        })
    }

    async fn send(device: &mut DuplexStream, msg: &Message) {
        device.write_all(&codec::encode(msg).unwrap()).await.unwrap();
    }

    async fn recv(device: &mut DuplexStream) -> Message {
        let mut len = [0u8; 4];
        device.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        device.read_exact(&mut body).await.unwrap();
        codec::decode(&body).unwrap()
    }

    fn spawn_session(
        server: DuplexStream,
        dispatcher: Dispatcher,
    ) -> tokio::task::JoinHandle<Result<SessionStats, ConnectionError>> {
        tokio::spawn(async move {
            let mut conn = DeviceConnection::new(server, "127.0.0.1:5000".parse().unwrap(), 4096);
            let shutdown = Notify::new();
            run_session(&mut conn, &dispatcher, &shutdown).await
        })
    }

    #[tokio::test]
    async fn test_session_gap_and_backfill() {
        let (storage_tx, storage_rx) = unbounded();
        let (metrics_tx, metrics_rx) = unbounded();
        let (mut device, server) = duplex(4096);
        let task = spawn_session(server, Dispatcher::new(storage_tx, metrics_tx));

        send(&mut device, &Message::measurement(1, vec![power("a")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(1, None));

        send(&mut device, &Message::measurement(3, vec![power("c")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(3, Some(2)));

        send(&mut device, &Message::measurement(2, vec![power("b")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(2, None));

        // stale id outside the missing set
        send(&mut device, &Message::measurement(1, vec![power("a")])).await;
        assert_eq!(recv(&mut device).await, Message::counter_request());

        drop(device);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.backfilled, 1);
        assert_eq!(stats.resync_requests, 1);

        assert_eq!(storage_rx.try_iter().count(), 3);
        assert_eq!(metrics_rx.try_iter().count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_session() {
        let (storage_tx, storage_rx) = unbounded();
        let (metrics_tx, _metrics_rx) = unbounded();
        let (mut device, server) = duplex(4096);
        let task = spawn_session(server, Dispatcher::new(storage_tx, metrics_tx));

        device
            .write_all(&codec::encode_payload(b"{\"type\":\"nope\"}").unwrap())
            .await
            .unwrap();
        device.write_all(&[0, 0, 0, 0]).await.unwrap();
        send(&mut device, &Message::measurement(1, vec![power("a")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(1, None));

        drop(device);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.accepted, 1);
        assert_eq!(storage_rx.try_iter().count(), 1);
    }

    #[tokio::test]
    async fn test_counter_reply_then_abandoned_gap() {
        let (storage_tx, storage_rx) = unbounded();
        let (metrics_tx, _metrics_rx) = unbounded();
        let (mut device, server) = duplex(4096);
        let task = spawn_session(server, Dispatcher::new(storage_tx, metrics_tx));

        send(&mut device, &Message::counter_reply(10)).await;
        send(&mut device, &Message::measurement(12, vec![power("x")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(12, Some(10)));

        send(&mut device, &Message::lost(10)).await;
        send(&mut device, &Message::measurement(11, vec![power("y")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(11, None));

        drop(device);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.backfilled, 1);
        assert_eq!(storage_rx.try_iter().count(), 2);
    }

    #[tokio::test]
    async fn test_bad_reading_is_dropped_and_batch_acked() {
        let (storage_tx, storage_rx) = unbounded();
        let (metrics_tx, metrics_rx) = unbounded();
        let (mut device, server) = duplex(4096);
        let task = spawn_session(server, Dispatcher::new(storage_tx, metrics_tx));

        send(&mut device, &Message::measurement(1, vec![power("a")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(1, None));

        let batch = r#"{"type":"measurement","id":2,"data":[
            {"type":"power_measurement","id":"b","deviceid":"rfmpi-7",
             "ts":"2025-03-01 08:00:00","power1":1.0,"power2":2.0,"power3":3.0,
             "power4":4.0,"vrms":230.0,"temp":22.0},
            {"type":"power_measurement","id":17,"deviceid":"rfmpi-7",
             "ts":"2025-03-01T08:00:00Z","power1":1.0,"power2":2.0,"power3":3.0,
             "power4":4.0,"vrms":230.0,"temp":null}
        ]}"#;
        device
            .write_all(&codec::encode_payload(batch.as_bytes()).unwrap())
            .await
            .unwrap();
        assert_eq!(recv(&mut device).await, Message::ack(2, None));

        send(&mut device, &Message::measurement(3, vec![power("c")])).await;
        assert_eq!(recv(&mut device).await, Message::ack(3, None));

        drop(device);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.malformed_readings, 1);

        let stored: Vec<Reading> = storage_rx.try_iter().collect();
        assert_eq!(stored, vec![power("a"), power("b"), power("c")]);
        assert_eq!(metrics_rx.try_iter().count(), 3);
    }

    #[tokio::test]
    async fn test_truncated_stream_ends_session_with_error() {
        let (storage_tx, _storage_rx) = unbounded();
        let (metrics_tx, _metrics_rx) = unbounded();
        let (mut device, server) = duplex(4096);
        let task = spawn_session(server, Dispatcher::new(storage_tx, metrics_tx));

        device.write_all(&[0, 0, 0, 50, b'{']).await.unwrap();
        drop(device);

        assert!(task.await.unwrap().is_err());
    }
}
