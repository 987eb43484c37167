//! Error types for frame parsing and encoding.
//!
//! All errors are structured and testable. Incomplete input is *not* an
//! error here; the streaming decoder reports it through
//! [`ParseResult::NeedMore`](crate::codec::ParseResult::NeedMore).

use thiserror::Error;

/// Protocol-level errors raised while parsing or encoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header did not start with the frame magic.
    #[error("invalid magic number: expected 0xCAFE, got {found:#06x}")]
    InvalidMagic {
        /// Value found in the first two header bytes
        found: u16,
    },

    /// Declared payload length exceeds the protocol cap.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Length declared in the header
        size: u32,
        /// Maximum allowed payload length
        max: u32,
    },

    /// A variable-length field cannot be represented on the wire.
    ///
    /// Raised by encoders when a length prefix would overflow its u8 slot,
    /// e.g. a client id longer than 255 bytes. Truncating would silently
    /// corrupt the frame, so the whole encode is refused.
    #[error("{field} too long: {len} exceeds wire maximum {max}")]
    FieldTooLong {
        /// Name of the offending field
        field: &'static str,
        /// Actual length supplied by the caller
        len: usize,
        /// Largest length the wire format can carry
        max: usize,
    },

    /// Payload bytes did not match the layout demanded by the opcode.
    #[error("malformed {opcode:?} payload: {reason}")]
    Malformed {
        /// Opcode whose layout was violated
        opcode: crate::Opcode,
        /// Short description of the violation
        reason: &'static str,
    },
}

/// Convenient result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
