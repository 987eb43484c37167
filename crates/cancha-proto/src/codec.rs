//! Streaming frame decoder.
//!
//! The decoder is a pure function over a byte slice. It neither allocates
//! nor copies: a successful parse borrows the payload out of the caller's
//! buffer. The caller owns buffer management, advancing past
//! [`consumed`](ParseResult::Frame) bytes after each successful parse and
//! calling [`decode`] again while it makes progress.
//!
//! Untrusted partial input is the normal case on a TCP stream, so the three
//! outcomes are modeled explicitly instead of being folded into an error
//! type:
//!
//! - [`ParseResult::NeedMore`]: fewer than 7 bytes available, or the header
//!   is valid but the payload has not fully arrived. Nothing is consumed.
//! - [`ParseResult::Invalid`]: magic mismatch or oversized length. Nothing
//!   is consumed; the stream is unrecoverable and the caller should drop
//!   the peer (TCP) or the datagram (UDP).
//! - [`ParseResult::Frame`]: one complete frame, with the number of bytes
//!   to advance by.

use crate::FrameHeader;

/// A decoded frame borrowing its payload from the input buffer.
///
/// The view is valid only while the source buffer is unchanged; copy
/// whatever outlives the buffer before advancing it. A zero-length payload
/// is an empty slice, so the happy path never deals in optional payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    /// Raw opcode byte; see [`Opcode::from_u8`](crate::Opcode::from_u8)
    pub opcode: u8,
    /// Payload bytes, borrowed from the input
    pub payload: &'a [u8],
}

impl FrameView<'_> {
    /// Payload length in bytes.
    #[must_use]
    pub const fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }
}

/// Outcome of one [`decode`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult<'a> {
    /// Input ends before a complete frame; consume nothing and retry with
    /// more bytes.
    NeedMore,
    /// Input cannot be the start of a valid frame; consume nothing.
    Invalid,
    /// One complete frame was parsed.
    Frame {
        /// Bytes to advance the input buffer by (header + payload)
        consumed: usize,
        /// Borrowed view of the frame
        frame: FrameView<'a>,
    },
}

/// Decode at most one frame from the front of `data`.
///
/// Never reads past `consumed` bytes of a returned frame, and never reads
/// past the header when the payload is incomplete.
#[must_use]
pub fn decode(data: &[u8]) -> ParseResult<'_> {
    if data.len() < FrameHeader::SIZE {
        return ParseResult::NeedMore;
    }

    let Ok(header) = FrameHeader::parse(data) else {
        return ParseResult::Invalid;
    };

    let total = header.frame_len();
    if data.len() < total {
        return ParseResult::NeedMore;
    }

    ParseResult::Frame {
        consumed: total,
        frame: FrameView {
            opcode: header.opcode,
            payload: &data[FrameHeader::SIZE..total],
        },
    }
}
