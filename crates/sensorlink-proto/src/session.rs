// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection session protocol engine.
//!
//! Devices number their measurement messages with a monotonically increasing
//! counter. The engine tracks the highest sequence number seen and the set of
//! sequence numbers skipped on the way there, and decides for each incoming
//! message whether to accept it, what to answer, and whether the readings go
//! downstream.
//!
//! | incoming                                  | reply              | readings   |
//! |-------------------------------------------|--------------------|------------|
//! | measurement, `id > last`                  | ack(id, wanted)    | forwarded  |
//! | measurement, `id` missing, with data      | ack(id, wanted)    | forwarded  |
//! | measurement, `id` missing, without data   | none               | dropped    |
//! | measurement, `id == last`                 | ack(id, wanted)    | dropped    |
//! | measurement, `id < last`, not missing     | counter request    | dropped    |
//! | counter reply `c`                         | none               | -          |
//!
//! The engine does no I/O; the connection layer writes replies and hands
//! accepted readings to the dispatcher.

use crate::reading::Reading;
use crate::wire::{MeasurementMessage, Message, RequestKind, RequestMessage};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Set of missing sequence numbers stored as disjoint inclusive ranges.
///
/// A device that jumps from 1 to 1_000_000 creates one range, not a million
/// entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingSet {
    // start -> end (inclusive); ranges never overlap or touch
    ranges: BTreeMap<u64, u64>,
    len: u64,
}

impl MissingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert every id in `start..=end`. Does nothing when `start > end`.
    pub fn insert_range(&mut self, start: u64, end: u64) {
        if start > end {
            return;
        }

        let absorbed: Vec<(u64, u64)> = self
            .ranges
            .range(..=end.saturating_add(1))
            .rev()
            .take_while(|&(_, &e)| e.saturating_add(1) >= start)
            .map(|(&s, &e)| (s, e))
            .collect();

        let mut lo = start;
        let mut hi = end;
        for (s, e) in absorbed {
            self.ranges.remove(&s);
            self.len -= e - s + 1;
            lo = lo.min(s);
            hi = hi.max(e);
        }

        self.ranges.insert(lo, hi);
        self.len += hi - lo + 1;
    }

    pub fn insert(&mut self, id: u64) {
        self.insert_range(id, id);
    }

    /// Remove `id`, returning whether it was present.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some((start, end)) = self.range_of(id) else {
            return false;
        };

        self.ranges.remove(&start);
        if start < id {
            self.ranges.insert(start, id - 1);
        }
        if id < end {
            self.ranges.insert(id + 1, end);
        }
        self.len -= 1;
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        self.range_of(id).is_some()
    }

    /// Lowest missing id.
    pub fn first(&self) -> Option<u64> {
        self.ranges.keys().next().copied()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterate missing ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|(&s, &e)| s..=e)
    }

    fn range_of(&self, id: u64) -> Option<(u64, u64)> {
        self.ranges
            .range(..=id)
            .next_back()
            .filter(|&(_, &end)| id <= end)
            .map(|(&s, &e)| (s, e))
    }
}

/// Per-session counters, logged when the session closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Messages accepted in order (or after a skip).
    pub accepted: u64,
    /// Previously missing messages accepted late.
    pub backfilled: u64,
    /// Missing messages the device declared lost.
    pub abandoned: u64,
    /// Re-sends of the last accepted message.
    pub duplicates: u64,
    /// Counter requests sent to resynchronize.
    pub resync_requests: u64,
    /// Readings dropped from accepted messages because they did not parse.
    pub malformed_readings: u64,
}

/// Outcome of feeding one message to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Readings accepted; `backfill` is set when they fill an earlier gap.
    Accepted {
        ack: Message,
        readings: Vec<Reading>,
        backfill: bool,
    },
    /// The device gave up on a missing id.
    Abandoned { id: u64 },
    /// Stale id outside the missing set; ask the device for its counter.
    Resync { request: Message },
    /// Re-send of the last accepted id.
    Duplicate { ack: Message },
    /// Device reported its counter.
    CounterReset { last_received: u64 },
    /// Message has no effect on the session.
    Ignored { reason: &'static str },
}

impl Transition {
    /// Frame to send back to the device, if any.
    pub fn reply(&self) -> Option<&Message> {
        match self {
            Self::Accepted { ack, .. } | Self::Duplicate { ack } => Some(ack),
            Self::Resync { request } => Some(request),
            Self::Abandoned { .. } | Self::CounterReset { .. } | Self::Ignored { .. } => None,
        }
    }

    /// Readings to forward downstream (empty unless accepted).
    pub fn into_readings(self) -> Vec<Reading> {
        match self {
            Self::Accepted { readings, .. } => readings,
            _ => Vec::new(),
        }
    }
}

/// Protocol state for one connection.
#[derive(Debug, Default)]
pub struct Session {
    last_received: u64,
    missing: MissingSet,
    stats: SessionStats,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_received(&self) -> u64 {
        self.last_received
    }

    pub fn missing(&self) -> &MissingSet {
        &self.missing
    }

    /// Lowest sequence number still awaited.
    pub fn wanted(&self) -> Option<u64> {
        self.missing.first()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Feed one decoded message to the engine.
    pub fn handle(&mut self, msg: Message) -> Transition {
        match msg {
            Message::Measurement(m) => self.on_measurement(m),
            Message::Request(r) => self.on_request(r),
            Message::Ack(ack) => {
                warn!(acked_id = ack.acked_id, "Unexpected ack from device, dropped");
                Transition::Ignored {
                    reason: "ack from device",
                }
            }
        }
    }

    pub fn on_measurement(&mut self, msg: MeasurementMessage) -> Transition {
        let id = msg.id;

        if id > self.last_received {
            if id > self.last_received + 1 {
                debug!(
                    from = self.last_received + 1,
                    to = id - 1,
                    "Sequence gap detected"
                );
                self.missing.insert_range(self.last_received + 1, id - 1);
            }
            self.last_received = id;
            self.stats.accepted += 1;

            return Transition::Accepted {
                ack: Message::ack(id, self.wanted()),
                readings: self.take_readings(msg),
                backfill: false,
            };
        }

        if id == self.last_received {
            debug!(id, "Duplicate measurement, re-acknowledging");
            self.stats.duplicates += 1;
            return Transition::Duplicate {
                ack: Message::ack(id, self.wanted()),
            };
        }

        if self.missing.remove(id) {
            if !msg.has_data() {
                warn!(id, "Device declared measurement lost");
                self.stats.abandoned += 1;
                return Transition::Abandoned { id };
            }

            debug!(id, remaining = self.missing.len(), "Backfilled measurement");
            self.stats.backfilled += 1;
            return Transition::Accepted {
                ack: Message::ack(id, self.wanted()),
                readings: self.take_readings(msg),
                backfill: true,
            };
        }

        debug!(
            id,
            last_received = self.last_received,
            "Stale measurement id, requesting device counter"
        );
        self.stats.resync_requests += 1;
        Transition::Resync {
            request: Message::counter_request(),
        }
    }

    fn take_readings(&mut self, msg: MeasurementMessage) -> Vec<Reading> {
        let out = msg.into_readings();
        self.stats.malformed_readings += out.malformed;
        out.readings
    }

    pub fn on_request(&mut self, req: RequestMessage) -> Transition {
        match (req.kind, req.payload) {
            (RequestKind::GetMsgCounter, Some(counter)) => {
                self.last_received = counter.saturating_sub(1);
                debug!(
                    counter,
                    last_received = self.last_received,
                    "Device counter received"
                );
                Transition::CounterReset {
                    last_received: self.last_received,
                }
            }
            (RequestKind::GetMsgCounter, None) => {
                warn!("Counter request from device without payload, dropped");
                Transition::Ignored {
                    reason: "counter request without payload",
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::tests::power;
    use crate::wire::ReadingEntry;

    fn measure(session: &mut Session, id: u64) -> Transition {
        session.on_measurement(MeasurementMessage {
            id,
            data: Some(vec![power(&format!("r-{}", id)).into()]),
        })
    }

    fn lost(session: &mut Session, id: u64) -> Transition {
        session.handle(Message::lost(id))
    }

    #[test]
    fn test_missing_set_merges_ranges() {
        let mut set = MissingSet::new();
        set.insert_range(5, 7);
        set.insert_range(10, 12);
        assert_eq!(set.len(), 6);

        set.insert_range(8, 9);
        assert_eq!(set.len(), 8);
        assert_eq!(set.iter().collect::<Vec<_>>(), (5..=12).collect::<Vec<_>>());

        set.insert_range(3, 6);
        assert_eq!(set.first(), Some(3));
        assert_eq!(set.len(), 10);
    }

    #[test]
    fn test_missing_set_remove_splits() {
        let mut set = MissingSet::new();
        set.insert_range(1, 5);

        assert!(set.remove(3));
        assert!(!set.remove(3));
        assert!(!set.contains(3));
        assert!(set.contains(2));
        assert!(set.contains(4));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 4, 5]);

        assert!(set.remove(1));
        assert_eq!(set.first(), Some(2));
        assert!(set.remove(2));
        assert!(set.remove(4));
        assert!(set.remove(5));
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_missing_set_large_gap() {
        let mut set = MissingSet::new();
        set.insert_range(2, 10_000_000);
        assert_eq!(set.len(), 9_999_999);
        assert!(set.remove(5_000_000));
        assert!(set.contains(4_999_999));
        assert!(!set.contains(5_000_000));
    }

    #[test]
    fn test_in_order_ids_accepted_once() {
        let mut session = Session::new();
        let mut forwarded = 0;

        for id in 1..=50 {
            let t = measure(&mut session, id);
            assert_eq!(t.reply(), Some(&Message::ack(id, None)));
            forwarded += t.into_readings().len();
        }

        assert!(session.missing().is_empty());
        assert_eq!(session.last_received(), 50);
        assert_eq!(forwarded, 50);
        assert_eq!(session.stats().accepted, 50);
    }

    #[test]
    fn test_skip_reports_wanted() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 2);

        let t = measure(&mut session, 5);
        assert_eq!(t.reply(), Some(&Message::ack(5, Some(3))));
        assert_eq!(session.missing().iter().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(t.into_readings().len(), 1);
    }

    #[test]
    fn test_backfill_forwards_and_advances_wanted() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 5);

        let t = measure(&mut session, 3);
        assert!(matches!(t, Transition::Accepted { backfill: true, .. }));
        assert_eq!(t.reply(), Some(&Message::ack(3, Some(2))));
        assert_eq!(t.into_readings().len(), 1);

        measure(&mut session, 2);
        let t = measure(&mut session, 4);
        assert_eq!(t.reply(), Some(&Message::ack(4, None)));
        assert!(session.missing().is_empty());
        assert_eq!(session.stats().backfilled, 3);
    }

    #[test]
    fn test_empty_backfill_abandons_gap() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 4);

        let t = lost(&mut session, 2);
        assert_eq!(t, Transition::Abandoned { id: 2 });
        assert!(t.reply().is_none());
        assert!(t.into_readings().is_empty());

        let t = session.on_measurement(MeasurementMessage {
            id: 3,
            data: Some(vec![]),
        });
        assert_eq!(t, Transition::Abandoned { id: 3 });
        assert!(session.missing().is_empty());
        assert_eq!(session.stats().abandoned, 2);
    }

    #[test]
    fn test_stale_id_requests_counter() {
        let mut session = Session::new();
        for id in 1..=4 {
            measure(&mut session, id);
        }

        let t = measure(&mut session, 2);
        assert_eq!(t.reply(), Some(&Message::counter_request()));
        assert!(t.into_readings().is_empty());
        assert_eq!(session.last_received(), 4);
        assert_eq!(session.stats().resync_requests, 1);
    }

    #[test]
    fn test_duplicate_last_id_reacked_not_forwarded() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 3);

        let t = measure(&mut session, 3);
        assert_eq!(t.reply(), Some(&Message::ack(3, Some(2))));
        assert!(t.into_readings().is_empty());
        assert_eq!(session.stats().duplicates, 1);
    }

    #[test]
    fn test_counter_reply_resets_last_received() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 10);

        let t = session.handle(Message::counter_reply(42));
        assert_eq!(t, Transition::CounterReset { last_received: 41 });
        assert_eq!(session.last_received(), 41);
        // missing untouched
        assert_eq!(session.missing().len(), 8);

        let t = measure(&mut session, 42);
        assert_eq!(t.reply(), Some(&Message::ack(42, Some(2))));
    }

    #[test]
    fn test_counter_reply_zero_saturates() {
        let mut session = Session::new();
        session.handle(Message::counter_reply(0));
        assert_eq!(session.last_received(), 0);
    }

    #[test]
    fn test_counter_reset_below_missing_merges_gaps() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 6); // missing 2..=5
        session.handle(Message::counter_reply(3)); // last = 2

        measure(&mut session, 9); // gap 3..=8 overlaps 3..=5
        assert_eq!(
            session.missing().iter().collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_unexpected_messages_ignored() {
        let mut session = Session::new();
        measure(&mut session, 1);

        let t = session.handle(Message::ack(1, None));
        assert!(matches!(t, Transition::Ignored { .. }));

        let t = session.handle(Message::counter_request());
        assert!(matches!(t, Transition::Ignored { .. }));
        assert!(t.reply().is_none());

        assert_eq!(session.last_received(), 1);
        assert!(session.missing().is_empty());
    }

    #[test]
    fn test_first_measurement_without_data_is_acked() {
        let mut session = Session::new();
        let t = lost(&mut session, 1);
        assert_eq!(t.reply(), Some(&Message::ack(1, None)));
        assert!(t.into_readings().is_empty());
        assert_eq!(session.last_received(), 1);
    }

    #[test]
    fn test_malformed_reading_does_not_hold_back_sequence() {
        let mut session = Session::new();
        measure(&mut session, 1);

        let bad = ReadingEntry::Malformed(serde_json::json!({
            "type": "power_measurement",
            "id": "r-2b",
            "temp": null
        }));
        let t = session.on_measurement(MeasurementMessage {
            id: 2,
            data: Some(vec![power("r-2a").into(), bad]),
        });

        assert_eq!(t.reply(), Some(&Message::ack(2, None)));
        assert_eq!(t.into_readings(), vec![power("r-2a")]);
        assert_eq!(session.last_received(), 2);
        assert!(session.missing().is_empty());
        assert_eq!(session.stats().malformed_readings, 1);

        let t = measure(&mut session, 3);
        assert_eq!(t.reply(), Some(&Message::ack(3, None)));
    }

    #[test]
    fn test_backfill_with_only_malformed_entries_clears_gap() {
        let mut session = Session::new();
        measure(&mut session, 1);
        measure(&mut session, 3);

        let t = session.on_measurement(MeasurementMessage {
            id: 2,
            data: Some(vec![ReadingEntry::Malformed(serde_json::json!(42))]),
        });

        assert_eq!(t.reply(), Some(&Message::ack(2, None)));
        assert!(t.into_readings().is_empty());
        assert_eq!(session.stats().backfilled, 1);
        assert_eq!(session.stats().malformed_readings, 1);
    }
}
