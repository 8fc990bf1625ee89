// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # sensorlink-proto
//!
//! Wire protocol shared by sensorlink devices and the ingestion server.
//!
//! - [`reading`]: typed sensor readings and the plug-validity check
//! - [`wire`]: measurement / ack / request messages
//! - [`codec`]: length-prefixed JSON framing
//! - [`session`]: per-connection sequence tracking and gap recovery
//!
//! ## Example
//!
//! ```
//! use sensorlink_proto::{codec, Message, Session};
//!
//! let mut session = Session::new();
//! let frame = codec::encode(&Message::lost(1)).unwrap();
//! let msg = codec::decode_frame(&frame).unwrap();
//!
//! let transition = session.handle(msg);
//! assert_eq!(transition.reply(), Some(&Message::ack(1, None)));
//! ```

pub mod codec;
pub mod reading;
pub mod session;
pub mod wire;

pub use codec::{CodecError, DecodeError, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use reading::{PlugReading, PowerReading, Reading, ReadingKind, TempHumReading};
pub use session::{MissingSet, Session, SessionStats, Transition};
pub use wire::{
    Acknowledgment, MeasurementMessage, Message, ReadingEntry, Readings, RequestKind,
    RequestMessage,
};
