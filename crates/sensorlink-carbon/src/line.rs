// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Carbon plaintext protocol.
//!
//! One sample per line:
//! ```text
//! <dotted.path> <value> <unix_seconds>\n
//! ```
//!
//! See: <https://graphite.readthedocs.io/en/latest/feeding-carbon.html>

use sensorlink_proto::{PlugReading, PowerReading, Reading, TempHumReading};

/// Join a device path and a field name with a single dot.
pub fn metric_path(base: &str, field: &str) -> String {
    let base = base.trim_end_matches('.');
    if base.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", base, field)
    }
}

/// Format one plaintext line.
pub fn format_line(path: &str, value: f64, timestamp: i64) -> String {
    format!("{} {} {}\n", path, value, timestamp)
}

/// `(field, value)` samples published for a reading, in send order.
///
/// Null plug fields are left out, so a plug may publish fewer than six
/// samples. The plaintext protocol has no encoding for a missing value and
/// Carbon discards lines whose value does not parse as a number.
pub fn samples(reading: &Reading) -> Vec<(&'static str, f64)> {
    match reading {
        Reading::Power(r) => power_samples(r),
        Reading::TempHum(r) => temp_hum_samples(r),
        Reading::Plug(r) => plug_samples(r),
    }
}

fn power_samples(r: &PowerReading) -> Vec<(&'static str, f64)> {
    vec![
        ("power1", r.power1),
        ("power2", r.power2),
        ("power3", r.power3),
        ("power4", r.power4),
        ("vrms", r.vrms),
        ("temperature", r.temp),
    ]
}

fn temp_hum_samples(r: &TempHumReading) -> Vec<(&'static str, f64)> {
    vec![
        ("temperature", r.temp),
        ("external_temperature", r.temp_external),
        ("humidity", r.humidity),
        ("battery", r.battery),
    ]
}

/// Plug samples. The power state goes out as 1/0; null fields produce no line
/// since Carbon only stores numeric values.
fn plug_samples(r: &PlugReading) -> Vec<(&'static str, f64)> {
    [
        ("load", r.load),
        ("work", r.work),
        ("power", Some(r.power_state_value())),
        ("frequency", r.freq),
        ("vrms", r.vrms),
        ("irms", r.irms),
    ]
    .into_iter()
    .filter_map(|(field, value)| value.map(|v| (field, v)))
    .collect()
}

/// Render every sample of `reading` under `base`.
pub fn render(base: &str, reading: &Reading, timestamp: i64) -> Vec<String> {
    samples(reading)
        .into_iter()
        .map(|(field, value)| format_line(&metric_path(base, field), value, timestamp))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sensorlink_proto::PlugReading;

    fn plug(load: Option<f64>) -> Reading {
        Reading::Plug(PlugReading {
            id: "p".into(),
            mac_address: "m".into(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            load,
            irms: Some(0.5),
            vrms: Some(230.5),
            freq: Some(50.0),
            pow: "ON".into(),
            work: Some(1.25),
        })
    }

    #[test]
    fn test_metric_path_trims_trailing_dots() {
        assert_eq!(metric_path("home.kitchen.", "vrms"), "home.kitchen.vrms");
        assert_eq!(metric_path("home.kitchen", "vrms"), "home.kitchen.vrms");
        assert_eq!(metric_path("rfmpi-7", "power1"), "rfmpi-7.power1");
    }

    #[test]
    fn test_format_line() {
        assert_eq!(format_line("a.b", 230.5, 1700000000), "a.b 230.5 1700000000\n");
    }

    #[test]
    fn test_power_field_order() {
        let reading = Reading::Power(PowerReading {
            id: "r".into(),
            deviceid: "d".into(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            power1: 1.0,
            power2: 2.0,
            power3: 3.0,
            power4: 4.0,
            vrms: 230.0,
            temp: 20.5,
        });

        let fields: Vec<_> = samples(&reading).into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            fields,
            vec!["power1", "power2", "power3", "power4", "vrms", "temperature"]
        );
    }

    #[test]
    fn test_plug_power_state_is_numeric() {
        let lines = render("home.plug", &plug(Some(10.0)), 42);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "home.plug.load 10 42\n");
        assert_eq!(lines[2], "home.plug.power 1 42\n");
        assert_eq!(lines[3], "home.plug.frequency 50 42\n");
    }

    #[test]
    fn test_plug_null_fields_skipped() {
        let fields: Vec<_> = samples(&plug(None)).into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["work", "power", "frequency", "vrms", "irms"]);
    }
}
