//! Fuzz target for Frame::decode.
//!
//! Feeds arbitrary bytes directly in as a frame body to find:
//! - Parser crashes or panics
//! - Integer overflows in size calculations
//! - Malformed CBOR maps that bypass required-field validation
//!
//! Should never panic: every invalid input must return `Err`.

#![no_main]

use bifaci_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);
});
