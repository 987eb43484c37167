//! Frame header parsing and serialization.
//!
//! The header is a fixed 7-byte little-endian structure:
//!
//! ```text
//! offset 0..2   magic   u16   always 0xCAFE
//! offset 2      opcode  u8    see [`Opcode`](crate::Opcode)
//! offset 3..7   length  u32   payload bytes, <= 1 MiB
//! ```
//!
//! Fields are read with `from_le_bytes` rather than struct casting; at 7
//! bytes there is nothing to win from a zero-copy cast and the explicit
//! reads keep endianness visible at the use site.

use bytes::BufMut;

use crate::{
    HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE, Opcode,
    errors::{ProtocolError, Result},
};

/// Parsed frame header.
///
/// The magic is validated during [`FrameHeader::parse`] and re-emitted by
/// [`FrameHeader::write`]; it is not stored.
///
/// The opcode is kept as a raw byte: opcode validation is a handler concern,
/// and a broker must be able to answer an unknown opcode with an error frame
/// rather than tearing the connection down at the parsing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw operation code
    pub opcode: u8,
    /// Payload length in bytes
    pub length: u32,
}

impl FrameHeader {
    /// Serialized header size (7 bytes).
    pub const SIZE: usize = HEADER_SIZE;

    /// Build a header for a known opcode.
    #[must_use]
    pub const fn new(opcode: Opcode, payload_len: u32) -> Self {
        Self { opcode: opcode.to_u8(), length: payload_len }
    }

    /// Parse a header from the front of `bytes`.
    ///
    /// The caller must supply at least [`FrameHeader::SIZE`] bytes; the
    /// streaming decoder handles shorter input as incomplete, so running
    /// into it here is a caller bug.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMagic`] if the first two bytes are
    /// not 0xCAFE, and [`ProtocolError::PayloadTooLarge`] if the declared
    /// length exceeds [`MAX_PAYLOAD_SIZE`].
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len() < Self::SIZE`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        assert!(bytes.len() >= Self::SIZE, "header parse requires {} bytes", Self::SIZE);

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic { found: magic });
        }

        let opcode = bytes[2];
        let length = u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
        if length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: length, max: MAX_PAYLOAD_SIZE });
        }

        Ok(Self { opcode, length })
    }

    /// Serialize the header, magic included.
    pub fn write(&self, dst: &mut impl BufMut) {
        dst.put_u16_le(MAGIC);
        dst.put_u8(self.opcode);
        dst.put_u32_le(self.length);
    }

    /// Total frame size: header plus declared payload.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        Self::SIZE + self.length as usize
    }

    /// Opcode as an enum, `None` when unknown.
    #[must_use]
    pub const fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }
}
