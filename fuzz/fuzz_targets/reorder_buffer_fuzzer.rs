//! Fuzz target for `ReorderBuffer::accept`.
//!
//! Drives a buffer with arbitrary out-of-order, duplicate, and stale
//! sequence numbers on a single flow to find panics or unbounded growth.
//! Should never panic: stale/duplicate/overflowing input must return the
//! corresponding `CoreError` variant, never crash.

#![no_main]

use arbitrary::Arbitrary;
use bifaci_core::{FlowKey, ReorderBuffer};
use bifaci_proto::{Frame, MessageId};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct FuzzFrame {
    seq: u16,
    end: bool,
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    max_reorder_buffer: u8,
    frames: Vec<FuzzFrame>,
}

fuzz_target!(|input: FuzzInput| {
    let id = MessageId::Uint(1);
    let flow = FlowKey(id, Some(id));
    let mut buffer = ReorderBuffer::new(u64::from(input.max_reorder_buffer));

    for fuzz_frame in input.frames.into_iter().take(256) {
        let mut frame = if fuzz_frame.end {
            Frame::end(id, Some(id), None)
        } else {
            Frame::chunk(id, Some(id), "stream", 0, Vec::new())
        };
        frame.seq = u64::from(fuzz_frame.seq);
        let _ = buffer.accept(flow, frame);
    }
});
