// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor readings carried inside measurement messages.
//!
//! A measurement message bundles one or more readings. Each reading is a
//! tagged record whose `type` field selects the device family:
//!
//! ```text
//! {"type":"power_measurement",    "deviceid":"..",    "ts":"..", power1..power4, vrms, temp}
//! {"type":"temp_hum_measurement", "deviceid":"..",    "ts":"..", temp, temp_external, humidity, battery}
//! {"type":"plug_measurement",     "mac_address":"..", "ts":"..", load, irms, vrms, freq, pow, work}
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;

/// Power-state value reported by a plug that has been switched off.
pub const POWER_STATE_OFF: &str = "OFF";

/// Power-state value reported by a plug that is switched on.
pub const POWER_STATE_ON: &str = "ON";

/// One typed sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Reading {
    #[serde(rename = "power_measurement")]
    Power(PowerReading),

    #[serde(rename = "temp_hum_measurement")]
    TempHum(TempHumReading),

    #[serde(rename = "plug_measurement")]
    Plug(PlugReading),
}

/// Reading family, used for routing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    Power,
    TempHum,
    Plug,
}

impl ReadingKind {
    /// Wire discriminator of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Power => "power_measurement",
            Self::TempHum => "temp_hum_measurement",
            Self::Plug => "plug_measurement",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-channel power meter with line voltage and board temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// Record identifier assigned by the device.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub deviceid: String,
    #[serde(deserialize_with = "timestamp")]
    pub ts: DateTime<Utc>,
    pub power1: f64,
    pub power2: f64,
    pub power3: f64,
    pub power4: f64,
    pub vrms: f64,
    pub temp: f64,
}

/// Temperature/humidity sensor with an external probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempHumReading {
    /// Record identifier assigned by the device.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub deviceid: String,
    #[serde(deserialize_with = "timestamp")]
    pub ts: DateTime<Utc>,
    pub temp: f64,
    pub temp_external: f64,
    pub humidity: f64,
    pub battery: f64,
}

/// Smart-plug telemetry.
///
/// A plug that has been switched off (or tripped on overload) reports
/// `pow = "OFF"` and leaves its measurement fields null, so every numeric
/// field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugReading {
    /// Record identifier assigned by the device.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub mac_address: String,
    #[serde(deserialize_with = "timestamp")]
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub load: Option<f64>,
    #[serde(default)]
    pub irms: Option<f64>,
    #[serde(default)]
    pub vrms: Option<f64>,
    #[serde(default)]
    pub freq: Option<f64>,
    /// Power state (`"ON"` / `"OFF"`).
    pub pow: String,
    #[serde(default)]
    pub work: Option<f64>,
}

impl PlugReading {
    /// Returns `false` when the plug reports OFF without usable sensor data.
    ///
    /// A reading is rejected iff its power state is `"OFF"` and at least one
    /// of load, current, voltage, frequency or accumulated work is null or
    /// zero. Both the storage writer and the metrics forwarder apply this
    /// check before handling plug data.
    pub fn is_valid(&self) -> bool {
        let has_data = [self.load, self.irms, self.vrms, self.freq, self.work]
            .iter()
            .all(|field| matches!(field, Some(v) if *v != 0.0));

        has_data || self.pow != POWER_STATE_OFF
    }

    /// Power state as a numeric sample (`1` when on, `0` otherwise).
    pub fn power_state_value(&self) -> f64 {
        if self.pow.eq_ignore_ascii_case(POWER_STATE_ON) {
            1.0
        } else {
            0.0
        }
    }
}

impl Reading {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Self::Power(_) => ReadingKind::Power,
            Self::TempHum(_) => ReadingKind::TempHum,
            Self::Plug(_) => ReadingKind::Plug,
        }
    }

    /// Key identifying the device: `deviceid` for power and temp/humidity
    /// sensors, the hardware address for plugs.
    pub fn device_key(&self) -> &str {
        match self {
            Self::Power(r) => &r.deviceid,
            Self::TempHum(r) => &r.deviceid,
            Self::Plug(r) => &r.mac_address,
        }
    }

    /// Record identifier assigned by the device.
    pub fn record_id(&self) -> &str {
        match self {
            Self::Power(r) => &r.id,
            Self::TempHum(r) => &r.id,
            Self::Plug(r) => &r.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Power(r) => r.ts,
            Self::TempHum(r) => r.ts,
            Self::Plug(r) => r.ts,
        }
    }
}

/// Parse a reading timestamp.
///
/// RFC 3339 strings keep their offset. Timestamps without an offset
/// (`2025-03-14 09:26:53`, `2025-03-14T09:26:53.250`) are taken as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text)
        .map_err(|e| de::Error::custom(format!("invalid timestamp {text:?}: {e}")))
}

/// Accept identifiers sent either as strings or as bare integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Key {
        Text(String),
        Number(u64),
    }

    Ok(match Key::deserialize(deserializer)? {
        Key::Text(s) => s,
        Key::Number(n) => n.to_string(),
    })
}
