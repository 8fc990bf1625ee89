// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensorlink_proto::{Message, Session};

fuzz_target!(|data: &[u8]| {
    let mut session = Session::new();

    // Each 9-byte record: opcode + big-endian u64 argument
    for record in data.chunks_exact(9) {
        let mut arg = [0u8; 8];
        arg.copy_from_slice(&record[1..]);
        let id = u64::from_be_bytes(arg) % 4096;

        let msg = match record[0] % 3 {
            0 => Message::measurement(id, Vec::new()),
            1 => Message::lost(id),
            _ => Message::counter_reply(id),
        };
        let _ = session.handle(msg);

        assert_eq!(session.wanted(), session.missing().first());
    }
});
