//! Operation codes and wire error codes.
//!
//! Opcodes identify the type of operation carried by a frame. They are
//! grouped by function:
//!
//! - `0x01-0x0F`: connection lifecycle (handshakes, disconnect)
//! - `0x10-0x1F`: pub/sub operations
//! - `0x20-0x2F`: control (keepalive)
//! - `0xFF`: error reporting

/// Frame operation codes.
///
/// Serialized as a single byte in the frame header. `#[repr(u8)]` pins the
/// numeric values for wire compatibility.
///
/// # Security
///
/// `from_u8` returns `None` for unknown values rather than panicking. The
/// decoder deliberately does not validate opcodes; frames with unknown
/// opcodes must be rejected by the handler with
/// [`ErrorCode::InvalidOpcode`], not silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Connection lifecycle (0x01-0x0F)
    /// Publisher handshake: declares role and publish channel
    HandshakePub = 0x01,
    /// Subscriber handshake: declares role and initial subscriptions
    HandshakeSub = 0x02,
    /// Broker acknowledgment carrying the session id
    HandshakeAck = 0x03,
    /// Graceful disconnect
    Disconnect = 0x04,

    // Pub/Sub operations (0x10-0x1F)
    /// Client-to-broker publication
    Publish = 0x10,
    /// Add a channel subscription
    Subscribe = 0x11,
    /// Drop a channel subscription
    Unsubscribe = 0x12,
    /// Broker-to-subscriber delivery (timestamped)
    Message = 0x13,

    // Control (0x20-0x2F)
    /// Keepalive ping
    Ping = 0x20,
    /// Keepalive response
    Pong = 0x21,

    /// Error frame
    Error = 0xFF,
}

impl Opcode {
    /// Convert to the raw wire byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from a raw wire byte.
    ///
    /// Returns `None` if the value does not correspond to a known opcode.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::HandshakePub),
            0x02 => Some(Self::HandshakeSub),
            0x03 => Some(Self::HandshakeAck),
            0x04 => Some(Self::Disconnect),
            0x10 => Some(Self::Publish),
            0x11 => Some(Self::Subscribe),
            0x12 => Some(Self::Unsubscribe),
            0x13 => Some(Self::Message),
            0x20 => Some(Self::Ping),
            0x21 => Some(Self::Pong),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes carried by [`Opcode::Error`] frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Handshake payload was malformed or sent twice
    InvalidHandshake = 0x01,
    /// Referenced channel does not exist
    ChannelNotFound = 0x02,
    /// Frame or receive buffer exceeded the size limits
    MessageTooLarge = 0x03,
    /// Client exceeded its message rate
    RateLimitExceeded = 0x04,
    /// Peer speaks an incompatible protocol revision
    ProtocolVersionMismatch = 0x05,
    /// Opcode unknown or not valid for the client's role/state
    InvalidOpcode = 0x06,
    /// Payload layout did not match the opcode
    MalformedMessage = 0x07,
    /// Operation not permitted for this client
    Unauthorized = 0x08,
}

impl ErrorCode {
    /// Convert to the raw wire byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from a raw wire byte, `None` for unknown codes.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::InvalidHandshake),
            0x02 => Some(Self::ChannelNotFound),
            0x03 => Some(Self::MessageTooLarge),
            0x04 => Some(Self::RateLimitExceeded),
            0x05 => Some(Self::ProtocolVersionMismatch),
            0x06 => Some(Self::InvalidOpcode),
            0x07 => Some(Self::MalformedMessage),
            0x08 => Some(Self::Unauthorized),
            _ => None,
        }
    }
}
