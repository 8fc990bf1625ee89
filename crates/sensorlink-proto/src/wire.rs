// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device <-> server message model.
//!
//! Three message kinds travel on a session, distinguished by their `type`
//! field:
//!
//! ```text
//! {"type":"measurement", "id":17, "data":[ <reading>, ... ]}
//! {"type":"ack",         "success":17, "wanted":12 | null}
//! {"type":"request",     "request":"GET_MSG_COUNTER", "data":42 | null}
//! ```

use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A message exchanged between a device and the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Batch of readings stamped with the device's sequence number.
    #[serde(rename = "measurement")]
    Measurement(MeasurementMessage),

    /// Server acknowledges a sequence number.
    #[serde(rename = "ack")]
    Ack(Acknowledgment),

    /// Synchronization request (either direction).
    #[serde(rename = "request")]
    Request(RequestMessage),
}

/// Sequence-numbered batch of readings.
///
/// `data` is null (or empty) when the device re-sends a sequence number it no
/// longer holds, which tells the server to stop waiting for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMessage {
    pub id: u64,
    #[serde(default)]
    pub data: Option<Vec<ReadingEntry>>,
}

/// One element of a measurement's `data` array.
///
/// Entries that do not parse as a [`Reading`] are kept as raw JSON so that a
/// single bad record does not fail the whole message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingEntry {
    Reading(Reading),
    Malformed(serde_json::Value),
}

impl From<Reading> for ReadingEntry {
    fn from(reading: Reading) -> Self {
        Self::Reading(reading)
    }
}

/// Readings extracted from a measurement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub readings: Vec<Reading>,
    /// Entries dropped because they did not parse.
    pub malformed: u64,
}

impl MeasurementMessage {
    /// True when the message carries at least one entry, parsed or not.
    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Consume the message, keeping the well-formed readings.
    ///
    /// Malformed entries are logged with their parse error and counted.
    pub fn into_readings(self) -> Readings {
        let mut out = Readings::default();

        for entry in self.data.unwrap_or_default() {
            match entry {
                ReadingEntry::Reading(reading) => out.readings.push(reading),
                ReadingEntry::Malformed(value) => {
                    match serde_json::from_value::<Reading>(value) {
                        Ok(reading) => out.readings.push(reading),
                        Err(e) => {
                            warn!(id = self.id, "Dropping malformed reading: {}", e);
                            out.malformed += 1;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Acknowledgment of one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    /// Sequence number that was received.
    #[serde(rename = "success")]
    pub acked_id: u64,

    /// Lowest sequence number the server is still waiting for.
    #[serde(rename = "wanted", default)]
    pub wanted_id: Option<u64>,
}

/// Request kinds understood on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Ask the peer for its current message counter.
    #[serde(rename = "GET_MSG_COUNTER")]
    GetMsgCounter,
}

/// Request message. The server sends it without payload; the device answers
/// with the same kind and its counter as payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(rename = "request")]
    pub kind: RequestKind,

    #[serde(rename = "data", default)]
    pub payload: Option<u64>,
}

impl Message {
    /// Measurement message carrying `readings`.
    pub fn measurement(id: u64, readings: Vec<Reading>) -> Self {
        Self::Measurement(MeasurementMessage {
            id,
            data: Some(readings.into_iter().map(ReadingEntry::from).collect()),
        })
    }

    /// Measurement message declaring `id` permanently lost.
    pub fn lost(id: u64) -> Self {
        Self::Measurement(MeasurementMessage { id, data: None })
    }

    pub fn ack(acked_id: u64, wanted_id: Option<u64>) -> Self {
        Self::Ack(Acknowledgment {
            acked_id,
            wanted_id,
        })
    }

    /// Server-side request for the device's message counter.
    pub fn counter_request() -> Self {
        Self::Request(RequestMessage {
            kind: RequestKind::GetMsgCounter,
            payload: None,
        })
    }

    /// Device-side reply to a counter request.
    pub fn counter_reply(counter: u64) -> Self {
        Self::Request(RequestMessage {
            kind: RequestKind::GetMsgCounter,
            payload: Some(counter),
        })
    }

    /// Wire discriminator, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Measurement(_) => "measurement",
            Self::Ack(_) => "ack",
            Self::Request(_) => "request",
        }
    }
}
