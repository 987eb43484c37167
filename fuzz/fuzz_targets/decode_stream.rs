//! Fuzzer for the streaming frame decoder.
//!
//! Drives the decoder the way a broker does: treat the input as a byte
//! stream, drain frames from the front while progress is made, and check
//! the decoder's contract at every step:
//!
//! - never panics on arbitrary input
//! - never claims more bytes than were provided
//! - `NeedMore`/`Invalid` consume nothing
//! - every yielded frame re-parses through the typed payload layer without
//!   panicking

#![no_main]

use cancha_proto::{FrameHeader, Opcode, ParseResult, Payload, decode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut cursor = data;

    loop {
        match decode(cursor) {
            ParseResult::Frame { consumed, frame } => {
                assert!(consumed <= cursor.len(), "decoder overran its input");
                assert_eq!(consumed, FrameHeader::SIZE + frame.payload.len());

                // Typed parsing must be total over decoder output: either a
                // payload or a structured error, never a panic.
                if let Some(opcode) = Opcode::from_u8(frame.opcode) {
                    let _ = Payload::parse(opcode, frame.payload);
                }

                cursor = &cursor[consumed..];
            }
            ParseResult::NeedMore | ParseResult::Invalid => break,
        }
    }
});
