// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed device connection.

use sensorlink_proto::codec::{self, CodecError, DecodeError, FrameBuffer};
use sensorlink_proto::Message;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK_SIZE: usize = 8192;

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Frame(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] CodecError),

    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    #[error("outbound frame too large: {size} > {max}")]
    TooLarge { size: usize, max: usize },
}

/// A connected device, over any byte stream (TLS in production).
pub struct DeviceConnection<S> {
    stream: S,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    frames: FrameBuffer,
    chunk: Box<[u8; READ_CHUNK_SIZE]>,
}

impl<S> DeviceConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer_addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer_addr,
            max_frame_size,
            frames: FrameBuffer::new(max_frame_size),
            chunk: Box::new([0u8; READ_CHUNK_SIZE]),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read the next frame payload.
    ///
    /// Returns `Ok(None)` if the connection is closed on a frame boundary.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        loop {
            if let Some(payload) = self.frames.next_frame()? {
                return Ok(Some(payload));
            }

            let n = self.stream.read(&mut self.chunk[..]).await?;
            if n == 0 {
                if self.frames.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::Truncated {
                    buffered: self.frames.len(),
                });
            }
            self.frames.extend(&self.chunk[..n]);
        }
    }

    /// Send a message to the device.
    pub async fn send_message(&mut self, msg: &Message) -> Result<(), ConnectionError> {
        let frame = codec::encode(msg)?;
        self.send_frame(&frame).await
    }

    /// Send raw bytes as one frame.
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let frame = codec::encode_payload(payload)?;
        self.send_frame(&frame).await
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let size = frame.len() - codec::LENGTH_PREFIX_SIZE;
        if size > self.max_frame_size {
            return Err(ConnectionError::TooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shutdown the connection.
    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
