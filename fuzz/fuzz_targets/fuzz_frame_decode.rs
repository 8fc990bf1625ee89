// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use sensorlink_proto::codec::{decode, decode_frame, FrameBuffer};

fuzz_target!(|data: &[u8]| {
    // Whole-buffer decoders
    let _ = decode(data);
    let _ = decode_frame(data);

    // Incremental reassembly, fed in uneven chunks
    let mut frames = FrameBuffer::new(64 * 1024);
    for chunk in data.chunks(7) {
        frames.extend(chunk);
        loop {
            match frames.next_frame() {
                Ok(Some(payload)) => {
                    let _ = decode(&payload);
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
