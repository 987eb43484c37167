//! Typed frame payloads.
//!
//! Each opcode has a fixed little-endian payload layout:
//!
//! | Opcode | Layout |
//! |---|---|
//! | `HANDSHAKE_PUB` | `channel:u8, cid_len:u8, client_id[cid_len]` |
//! | `HANDSHAKE_SUB` | `ch_count:u8, channels[ch_count], cid_len:u8, client_id[cid_len]` |
//! | `HANDSHAKE_ACK` | `status:u8, session_id:u64` |
//! | `PUBLISH` | `channel:u8, message[..]` |
//! | `SUBSCRIBE` / `UNSUBSCRIBE` | `channel:u8` |
//! | `MESSAGE` | `channel:u8, timestamp:u64, message[..]` |
//! | `ERROR` | `code:u8` |
//! | `DISCONNECT` / `PING` / `PONG` | empty |
//!
//! Encoders write the full frame (header included) and write exactly
//! [`encoded_len`](Payload::encoded_len) bytes. Parsers take the payload
//! slice of an already-decoded frame and borrow from it.
//!
//! # Security
//!
//! - **No Silent Truncation**: a `client_id` over 255 bytes or a channel
//!   list over 255 entries cannot be length-prefixed; encoding refuses with
//!   [`ProtocolError::FieldTooLong`] instead of emitting a corrupt frame.
//!
//! - **Tolerant Trailing Bytes**: parsers accept payloads longer than the
//!   declared inner fields require, matching what existing peers emit. They
//!   never read past the declared lengths.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ErrorCode, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// Largest length a u8-prefixed field can carry.
const U8_FIELD_MAX: usize = u8::MAX as usize;

/// Publisher handshake: the channel this client will publish on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePub<'a> {
    /// Publish channel
    pub channel: u8,
    /// Client-chosen identifier, at most 255 bytes
    pub client_id: &'a [u8],
}

impl<'a> HandshakePub<'a> {
    /// Parse from a decoded frame's payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the payload is shorter
    /// than its declared fields.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let malformed = |reason| ProtocolError::Malformed { opcode: Opcode::HandshakePub, reason };

        if payload.len() < 2 {
            return Err(malformed("missing channel or cid_len"));
        }
        let channel = payload[0];
        let cid_len = payload[1] as usize;
        let client_id = payload
            .get(2..2 + cid_len)
            .ok_or(malformed("client_id shorter than cid_len"))?;

        Ok(Self { channel, client_id })
    }
}

/// Subscriber handshake: initial channel subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeSub<'a> {
    /// Channels to subscribe to, at most 255 entries
    pub channels: &'a [u8],
    /// Client-chosen identifier, at most 255 bytes
    pub client_id: &'a [u8],
}

impl<'a> HandshakeSub<'a> {
    /// Parse from a decoded frame's payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the payload is shorter
    /// than its declared fields.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let malformed = |reason| ProtocolError::Malformed { opcode: Opcode::HandshakeSub, reason };

        if payload.is_empty() {
            return Err(malformed("missing ch_count"));
        }
        let ch_count = payload[0] as usize;
        let channels = payload
            .get(1..1 + ch_count)
            .ok_or(malformed("channel list shorter than ch_count"))?;

        let cid_len = *payload.get(1 + ch_count).ok_or(malformed("missing cid_len"))? as usize;
        let cid_start = 1 + ch_count + 1;
        let client_id = payload
            .get(cid_start..cid_start + cid_len)
            .ok_or(malformed("client_id shorter than cid_len"))?;

        Ok(Self { channels, client_id })
    }
}

/// Broker handshake acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeAck {
    /// 0 on success
    pub status: u8,
    /// Broker-issued monotonically increasing session id
    pub session_id: u64,
}

impl HandshakeAck {
    /// Wire payload size: status plus session id.
    pub const PAYLOAD_LEN: u32 = 9;

    /// Parse from a decoded frame's payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when fewer than 9 payload bytes
    /// are present.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PAYLOAD_LEN as usize {
            return Err(ProtocolError::Malformed {
                opcode: Opcode::HandshakeAck,
                reason: "payload shorter than status + session_id",
            });
        }
        let mut session = [0u8; 8];
        session.copy_from_slice(&payload[1..9]);

        Ok(Self { status: payload[0], session_id: u64::from_le_bytes(session) })
    }
}

/// Client-to-broker publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    /// Target channel
    pub channel: u8,
    /// Application bytes
    pub message: &'a [u8],
}

impl<'a> Publish<'a> {
    /// Parse from a decoded frame's payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] on an empty payload (the
    /// channel byte is mandatory).
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (&channel, message) = payload.split_first().ok_or(ProtocolError::Malformed {
            opcode: Opcode::Publish,
            reason: "missing channel",
        })?;
        Ok(Self { channel, message })
    }
}

/// Broker-to-subscriber delivery, stamped with the broker's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// Channel the message was published on
    pub channel: u8,
    /// Broker wall-clock milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Application bytes
    pub message: &'a [u8],
}

impl<'a> Message<'a> {
    /// Parse from a decoded frame's payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when fewer than 9 payload bytes
    /// are present.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < 9 {
            return Err(ProtocolError::Malformed {
                opcode: Opcode::Message,
                reason: "payload shorter than channel + timestamp",
            });
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&payload[1..9]);

        Ok(Self {
            channel: payload[0],
            timestamp_ms: u64::from_le_bytes(ts),
            message: &payload[9..],
        })
    }
}

/// Add a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribe {
    /// Channel to subscribe to
    pub channel: u8,
}

/// Drop a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsubscribe {
    /// Channel to unsubscribe from
    pub channel: u8,
}

fn parse_channel(opcode: Opcode, payload: &[u8]) -> Result<u8> {
    payload
        .first()
        .copied()
        .ok_or(ProtocolError::Malformed { opcode, reason: "missing channel" })
}

/// Broker error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Raw error code byte; see [`ErrorCode::from_u8`]
    pub code: u8,
}

impl ErrorFrame {
    /// Parse from a decoded frame's payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] on an empty payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let code = payload.first().copied().ok_or(ProtocolError::Malformed {
            opcode: Opcode::Error,
            reason: "missing error code",
        })?;
        Ok(Self { code })
    }
}

impl From<ErrorCode> for ErrorFrame {
    fn from(code: ErrorCode) -> Self {
        Self { code: code.to_u8() }
    }
}

/// All frame payloads, borrowed where the wire carries variable data.
///
/// The variant is determined by the frame header's opcode; payload bytes
/// never carry a discriminator of their own.
///
/// # Invariants
///
/// - `encode` writes exactly `encoded_len` bytes, header included.
/// - `parse(p.opcode(), encoded_payload)` reproduces `p` for every valid
///   payload `p` (round-trip identity, pinned by tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Publisher handshake
    HandshakePub(HandshakePub<'a>),
    /// Subscriber handshake
    HandshakeSub(HandshakeSub<'a>),
    /// Handshake acknowledgment
    HandshakeAck(HandshakeAck),
    /// Graceful disconnect (empty)
    Disconnect,
    /// Publication
    Publish(Publish<'a>),
    /// Subscription add
    Subscribe(Subscribe),
    /// Subscription drop
    Unsubscribe(Unsubscribe),
    /// Timestamped delivery
    Message(Message<'a>),
    /// Keepalive ping (empty)
    Ping,
    /// Keepalive response (empty)
    Pong,
    /// Error report
    Error(ErrorFrame),
}

impl<'a> Payload<'a> {
    /// Opcode for this payload variant.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::HandshakePub(_) => Opcode::HandshakePub,
            Self::HandshakeSub(_) => Opcode::HandshakeSub,
            Self::HandshakeAck(_) => Opcode::HandshakeAck,
            Self::Disconnect => Opcode::Disconnect,
            Self::Publish(_) => Opcode::Publish,
            Self::Subscribe(_) => Opcode::Subscribe,
            Self::Unsubscribe(_) => Opcode::Unsubscribe,
            Self::Message(_) => Opcode::Message,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Payload length on the wire, excluding the header.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FieldTooLong`] when a u8-prefixed field
    /// exceeds 255 entries.
    pub fn payload_len(&self) -> Result<u32> {
        let len = match self {
            Self::HandshakePub(p) => {
                check_u8_field("client_id", p.client_id.len())?;
                2 + p.client_id.len()
            }
            Self::HandshakeSub(p) => {
                check_u8_field("channels", p.channels.len())?;
                check_u8_field("client_id", p.client_id.len())?;
                1 + p.channels.len() + 1 + p.client_id.len()
            }
            Self::HandshakeAck(_) => HandshakeAck::PAYLOAD_LEN as usize,
            Self::Disconnect | Self::Ping | Self::Pong => 0,
            Self::Publish(p) => 1 + p.message.len(),
            Self::Subscribe(_) | Self::Unsubscribe(_) => 1,
            Self::Message(m) => 1 + 8 + m.message.len(),
            Self::Error(_) => 1,
        };
        Ok(len as u32)
    }

    /// Full frame length on the wire, header included.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Payload::payload_len`].
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(FrameHeader::SIZE + self.payload_len()? as usize)
    }

    /// Encode the full frame (header + payload) into `dst`.
    ///
    /// Writes exactly [`Payload::encoded_len`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FieldTooLong`] when a u8-prefixed field
    /// exceeds 255 entries; nothing is written in that case.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<usize> {
        let payload_len = self.payload_len()?;
        FrameHeader::new(self.opcode(), payload_len).write(dst);

        match self {
            Self::HandshakePub(p) => {
                dst.put_u8(p.channel);
                dst.put_u8(p.client_id.len() as u8);
                dst.put_slice(p.client_id);
            }
            Self::HandshakeSub(p) => {
                dst.put_u8(p.channels.len() as u8);
                dst.put_slice(p.channels);
                dst.put_u8(p.client_id.len() as u8);
                dst.put_slice(p.client_id);
            }
            Self::HandshakeAck(a) => {
                dst.put_u8(a.status);
                dst.put_u64_le(a.session_id);
            }
            Self::Disconnect | Self::Ping | Self::Pong => {}
            Self::Publish(p) => {
                dst.put_u8(p.channel);
                dst.put_slice(p.message);
            }
            Self::Subscribe(s) => dst.put_u8(s.channel),
            Self::Unsubscribe(u) => dst.put_u8(u.channel),
            Self::Message(m) => {
                dst.put_u8(m.channel);
                dst.put_u64_le(m.timestamp_ms);
                dst.put_slice(m.message);
            }
            Self::Error(e) => dst.put_u8(e.code),
        }

        Ok(FrameHeader::SIZE + payload_len as usize)
    }

    /// Encode into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Payload::encode`].
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len()?);
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse the payload of a decoded frame into its typed form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the payload bytes do not
    /// match the opcode's layout.
    pub fn parse(opcode: Opcode, payload: &'a [u8]) -> Result<Self> {
        Ok(match opcode {
            Opcode::HandshakePub => Self::HandshakePub(HandshakePub::parse(payload)?),
            Opcode::HandshakeSub => Self::HandshakeSub(HandshakeSub::parse(payload)?),
            Opcode::HandshakeAck => Self::HandshakeAck(HandshakeAck::parse(payload)?),
            Opcode::Disconnect => Self::Disconnect,
            Opcode::Publish => Self::Publish(Publish::parse(payload)?),
            Opcode::Subscribe => {
                Self::Subscribe(Subscribe { channel: parse_channel(opcode, payload)? })
            }
            Opcode::Unsubscribe => {
                Self::Unsubscribe(Unsubscribe { channel: parse_channel(opcode, payload)? })
            }
            Opcode::Message => Self::Message(Message::parse(payload)?),
            Opcode::Ping => Self::Ping,
            Opcode::Pong => Self::Pong,
            Opcode::Error => Self::Error(ErrorFrame::parse(payload)?),
        })
    }
}

fn check_u8_field(field: &'static str, len: usize) -> Result<()> {
    if len > U8_FIELD_MAX {
        return Err(ProtocolError::FieldTooLong { field, len, max: U8_FIELD_MAX });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::codec::{ParseResult, decode};

    fn round_trip(payload: Payload<'_>) {
        let wire = payload.to_bytes().expect("encode");
        assert_eq!(wire.len(), payload.encoded_len().expect("len"));

        let ParseResult::Frame { consumed, frame } = decode(&wire) else {
            panic!("encoded frame must decode");
        };
        assert_eq!(consumed, wire.len());

        let opcode = Opcode::from_u8(frame.opcode).expect("known opcode");
        let parsed = Payload::parse(opcode, frame.payload).expect("parse");
        assert_eq!(parsed, payload);
    }

    #[test]
    fn all_payloads_round_trip() {
        round_trip(Payload::HandshakePub(HandshakePub { channel: 7, client_id: b"pub-1" }));
        round_trip(Payload::HandshakeSub(HandshakeSub {
            channels: &[0, 5, 255],
            client_id: b"sub-1",
        }));
        round_trip(Payload::HandshakeAck(HandshakeAck { status: 0, session_id: u64::MAX }));
        round_trip(Payload::Disconnect);
        round_trip(Payload::Publish(Publish { channel: 1, message: b"gol" }));
        round_trip(Payload::Subscribe(Subscribe { channel: 200 }));
        round_trip(Payload::Unsubscribe(Unsubscribe { channel: 200 }));
        round_trip(Payload::Message(Message {
            channel: 9,
            timestamp_ms: 1_700_000_000_123,
            message: b"penalti",
        }));
        round_trip(Payload::Ping);
        round_trip(Payload::Pong);
        round_trip(Payload::Error(ErrorFrame::from(ErrorCode::InvalidOpcode)));
    }

    #[test]
    fn empty_client_id_and_message_are_valid() {
        round_trip(Payload::HandshakePub(HandshakePub { channel: 0, client_id: b"" }));
        round_trip(Payload::HandshakeSub(HandshakeSub { channels: &[], client_id: b"" }));
        round_trip(Payload::Publish(Publish { channel: 0, message: b"" }));
    }

    #[test]
    fn oversized_client_id_is_rejected_before_writing() {
        let id = [b'x'; 256];
        let payload = Payload::HandshakePub(HandshakePub { channel: 0, client_id: &id });

        let mut buf = Vec::new();
        let err = payload.encode(&mut buf).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::FieldTooLong { field: "client_id", len: 256, max: 255 }
        );
        assert!(buf.is_empty(), "nothing may be written on refusal");
    }

    #[test]
    fn oversized_channel_list_is_rejected() {
        let channels = [0u8; 256];
        let payload = Payload::HandshakeSub(HandshakeSub { channels: &channels, client_id: b"s" });
        assert!(matches!(
            payload.to_bytes(),
            Err(ProtocolError::FieldTooLong { field: "channels", .. })
        ));
    }

    #[test]
    fn handshake_pub_with_truncated_client_id_is_malformed() {
        // cid_len claims 5 bytes, only 2 present.
        let err = HandshakePub::parse(&[0x01, 0x05, b'a', b'b']).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { opcode: Opcode::HandshakePub, .. }));
    }

    #[test]
    fn handshake_sub_with_truncated_channel_list_is_malformed() {
        // ch_count claims 4 channels, only 2 present and no cid_len.
        let err = HandshakeSub::parse(&[0x04, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { opcode: Opcode::HandshakeSub, .. }));
    }

    #[test]
    fn handshake_sub_tolerates_trailing_bytes() {
        // One channel, two-byte id, then junk the peer appended.
        let parsed = HandshakeSub::parse(&[0x01, 0x05, 0x02, b'h', b'i', 0xEE, 0xFF]).unwrap();
        assert_eq!(parsed.channels, &[0x05]);
        assert_eq!(parsed.client_id, b"hi");
    }

    #[test]
    fn message_too_short_is_malformed() {
        let err = Message::parse(&[0x05, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { opcode: Opcode::Message, .. }));
    }

    proptest! {
        #[test]
        fn handshake_sub_round_trips(
            channels in prop::collection::vec(any::<u8>(), 0..=255),
            client_id in prop::collection::vec(any::<u8>(), 0..=255),
        ) {
            let payload = Payload::HandshakeSub(HandshakeSub {
                channels: &channels,
                client_id: &client_id,
            });

            let wire = payload.to_bytes().unwrap();
            let ParseResult::Frame { frame, .. } = decode(&wire) else {
                return Err(TestCaseError::fail("must decode"));
            };
            let parsed = Payload::parse(Opcode::HandshakeSub, frame.payload).unwrap();
            prop_assert_eq!(parsed, payload);
        }

        #[test]
        fn publish_round_trips(
            channel in any::<u8>(),
            message in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let payload = Payload::Publish(Publish { channel, message: &message });
            let wire = payload.to_bytes().unwrap();

            let ParseResult::Frame { consumed, frame } = decode(&wire) else {
                return Err(TestCaseError::fail("must decode"));
            };
            prop_assert_eq!(consumed, wire.len());
            let parsed = Payload::parse(Opcode::Publish, frame.payload).unwrap();
            prop_assert_eq!(parsed, payload);
        }
    }
}
