// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec.
//!
//! Every message travels as one frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | length (u32 BE)| JSON payload (length bytes)|
//! +----------------+---------------------------+
//! ```

use crate::wire::Message;
use thiserror::Error;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for a single frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors raised while decoding a frame or its payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid message: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl DecodeError {
    /// True when the byte stream can no longer be trusted to be aligned on a
    /// frame boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. })
    }
}

/// Errors raised while encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("payload too large: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Encode a message into one length-prefixed frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(msg)?;
    encode_payload(&json)
}

/// Wrap raw payload bytes into a frame.
pub fn encode_payload(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let len = u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Decode one frame payload (without length prefix).
pub fn decode(payload: &[u8]) -> Result<Message, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Decode one complete frame (length prefix followed by payload).
pub fn decode_frame(frame: &[u8]) -> Result<Message, DecodeError> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(DecodeError::Truncated {
            expected: LENGTH_PREFIX_SIZE,
            actual: frame.len(),
        });
    }

    let len = read_prefix(frame);
    let body = &frame[LENGTH_PREFIX_SIZE..];
    if body.len() < len {
        return Err(DecodeError::Truncated {
            expected: len,
            actual: body.len(),
        });
    }

    decode(&body[..len])
}

fn read_prefix(bytes: &[u8]) -> usize {
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    len_buf.copy_from_slice(&bytes[..LENGTH_PREFIX_SIZE]);
    u32::from_be_bytes(len_buf) as usize
}

/// Reassembles frames from arbitrary byte chunks.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameBuffer {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            max_frame_size,
        }
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame payload, if one is buffered.
    ///
    /// A zero-length frame yields an empty payload; callers hand it to
    /// [`decode`], which rejects it without losing stream alignment.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = read_prefix(&self.buf);
        if len > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX_SIZE + len;
        if self.buf.len() < total {
            return Ok(None);
        }

        let payload = self.buf[LENGTH_PREFIX_SIZE..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(payload))
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
