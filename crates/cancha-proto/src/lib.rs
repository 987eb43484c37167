//! # Cancha Protocol: Wire Format
//!
//! This crate implements the binary framing layer for the cancha pub/sub
//! protocol, shared by the brokers and the publisher/subscriber clients.
//!
//! ## Protocol Design
//!
//! Every message on the wire is a *frame*:
//!
//! ```text
//! magic: u16 (0xCAFE) | opcode: u8 | length: u32 | payload[length]
//! ```
//!
//! All integers are little-endian. The header is 7 bytes and `length` counts
//! payload bytes only, capped at 1 MiB.
//!
//! ## Implementation Notes
//!
//! - **Borrowed Payload Views**: [`decode`](codec::decode) hands back a
//!   [`FrameView`](codec::FrameView) that borrows the caller's buffer. The
//!   decoder never allocates and never copies; callers copy what they need
//!   before advancing their buffer past the consumed bytes.
//!
//! - **Partial Input Is Not an Error**: Stream transports deliver frames in
//!   arbitrary chunks. The decoder reports `NeedMore` for incomplete input
//!   and consumes nothing, so callers can simply retry with a longer buffer.
//!
//! - **Strict Encoding**: Encoders write exactly the number of bytes
//!   reported by `encoded_len`, and reject fields that cannot be represented
//!   on the wire (a client id longer than 255 bytes has no valid encoding,
//!   so it is an error, never a truncation).
//!
//! ## Security Properties
//!
//! - **Size Limits**: the 1 MiB payload cap is enforced during header
//!   parsing, before any payload byte is touched.
//!
//! - **Total Parsing**: opcode and error-code lookups are total functions
//!   returning `Option`; frames with unknown opcodes survive decoding so the
//!   handler layer can answer with a protocol-level error frame.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod header;
pub mod opcodes;
pub mod payloads;

pub use codec::{FrameView, ParseResult, decode};
pub use errors::{ProtocolError, Result};
pub use header::FrameHeader;
pub use opcodes::{ErrorCode, Opcode};
pub use payloads::Payload;

/// Frame magic, first two bytes of every header (little-endian on the wire).
pub const MAGIC: u16 = 0xCAFE;

/// Maximum payload length accepted by the decoder (1 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

/// Serialized header size in bytes.
pub const HEADER_SIZE: usize = 7;
