// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking TCP client for the Carbon plaintext listener.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while talking to Carbon.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[from] io::Error),
}

impl ForwardError {
    /// True for failures of the TCP transport itself (connect or write).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Send(_))
    }
}

/// Persistent connection to a Carbon endpoint.
///
/// The connection is opened lazily and dropped on the first write error.
#[derive(Debug)]
pub struct CarbonClient {
    addr: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl CarbonClient {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            connect_timeout,
            stream: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection, replacing any existing one.
    pub fn connect(&mut self) -> Result<(), ForwardError> {
        self.stream = None;
        self.stream = Some(self.open()?);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("Disconnected from carbon at {}", self.addr);
        }
    }

    /// Write `lines` in one buffer, connecting first if needed.
    ///
    /// A failed write drops the connection.
    pub fn send_lines(&mut self, lines: &[String]) -> Result<(), ForwardError> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.open()?,
        };

        let payload = lines.concat();
        stream.write_all(payload.as_bytes())?;
        stream.flush()?;

        self.stream = Some(stream);
        Ok(())
    }

    fn open(&self) -> Result<TcpStream, ForwardError> {
        let target = self.resolve()?;
        let stream = TcpStream::connect_timeout(&target, self.connect_timeout).map_err(|e| {
            ForwardError::Connect {
                addr: self.addr.clone(),
                source: e,
            }
        })?;
        stream.set_nodelay(true)?;

        info!("Connected to carbon at {}", self.addr);
        Ok(stream)
    }

    fn resolve(&self) -> Result<SocketAddr, ForwardError> {
        self.addr
            .to_socket_addrs()
            .map_err(|e| ForwardError::Resolve {
                addr: self.addr.clone(),
                source: e,
            })?
            .next()
            .ok_or_else(|| ForwardError::NoAddress(self.addr.clone()))
    }
}
