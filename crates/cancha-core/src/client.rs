//! Per-client records and shared frame classification.
//!
//! Both brokers keep one record per client. The TCP record carries the full
//! connection lifecycle (handshake state, receive buffer, in-flight send);
//! the UDP record is smaller because datagram peers have no connection to
//! manage.

use bytes::{Bytes, BytesMut};
use cancha_proto::{FrameView, Opcode, Payload};

use crate::channels::ChannelMask;
use crate::queue::SendQueue;

/// Client role, declared once by the handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No handshake processed yet
    #[default]
    Unknown,
    /// Sends PUBLISH frames
    Publisher,
    /// Receives MESSAGE frames
    Subscriber,
}

/// TCP connection lifecycle. Transitions are monotone:
/// `Handshake -> Ready -> Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TcpState {
    /// Waiting for the first (handshake) frame
    #[default]
    Handshake,
    /// Handshake accepted; operational frames flow
    Ready,
    /// Terminal; the record is freed at the next dispatcher opportunity
    Closing,
}

/// Per-connection record kept by the TCP broker.
#[derive(Debug)]
pub struct TcpClient {
    /// Lifecycle state
    pub state: TcpState,
    /// Role declared by the handshake
    pub role: Role,
    /// Channels this client is subscribed to (subscribers) or publishes on
    pub channels: ChannelMask,
    /// Bytes received but not yet parsed into frames
    pub recv_buffer: BytesMut,
    /// Encoded frames awaiting transmission
    pub send_queue: SendQueue,
    /// Whether a send is currently in flight
    pub send_in_flight: bool,
    /// Bytes of the head frame already acknowledged by partial sends
    pub send_offset: usize,
    /// Identifier from the handshake, for logging
    pub client_id: String,
}

impl TcpClient {
    /// Fresh record in `Handshake` state.
    #[must_use]
    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            state: TcpState::Handshake,
            role: Role::Unknown,
            channels: ChannelMask::new(),
            recv_buffer: BytesMut::new(),
            send_queue: SendQueue::new(send_queue_capacity),
            send_in_flight: false,
            send_offset: 0,
            client_id: String::new(),
        }
    }
}

/// Per-peer record kept by the UDP broker.
///
/// Exists from the first valid handshake datagram onward; UDP has no close,
/// so records persist unless the broker is configured to drop them on
/// DISCONNECT.
#[derive(Debug)]
pub struct UdpClient {
    /// Role declared by the most recent handshake
    pub role: Role,
    /// Subscribed/publish channels
    pub channels: ChannelMask,
    /// Encoded datagrams awaiting transmission
    pub send_queue: SendQueue,
    /// Whether a datagram send to this peer is in flight
    pub send_in_flight: bool,
    /// Whether this peer is parked on the scheduler's ready list
    pub queued_for_send: bool,
    /// Identifier from the handshake, for logging
    pub client_id: String,
}

impl UdpClient {
    /// Fresh record with no role.
    #[must_use]
    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            role: Role::Unknown,
            channels: ChannelMask::new(),
            send_queue: SendQueue::new(send_queue_capacity),
            send_in_flight: false,
            queued_for_send: false,
            client_id: String::new(),
        }
    }
}

/// A decoded frame lifted into an owned operation.
///
/// Decoder output borrows the receive buffer, which the broker needs to
/// advance before dispatching can touch other clients. Classification copies
/// the handful of bytes each operation actually needs, severing the borrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameOp {
    HandshakePub { channel: u8, client_id: String },
    HandshakeSub { channels: Vec<u8>, client_id: String },
    Publish { channel: u8, message: Bytes },
    Subscribe { channel: u8 },
    Unsubscribe { channel: u8 },
    Disconnect,
    Ping,
    /// Known opcode that a client must not send to a broker
    Unexpected { opcode: Opcode },
    /// Opcode byte outside the protocol
    Unknown { opcode: u8 },
    /// Known opcode whose payload violates its layout
    Malformed { opcode: Opcode },
}

impl FrameOp {
    /// Classify a decoded frame from a broker's perspective.
    pub(crate) fn classify(frame: &FrameView<'_>) -> Self {
        let Some(opcode) = Opcode::from_u8(frame.opcode) else {
            return Self::Unknown { opcode: frame.opcode };
        };

        let payload = match Payload::parse(opcode, frame.payload) {
            Ok(payload) => payload,
            Err(_) => return Self::Malformed { opcode },
        };

        match payload {
            Payload::HandshakePub(p) => Self::HandshakePub {
                channel: p.channel,
                client_id: String::from_utf8_lossy(p.client_id).into_owned(),
            },
            Payload::HandshakeSub(p) => Self::HandshakeSub {
                channels: p.channels.to_vec(),
                client_id: String::from_utf8_lossy(p.client_id).into_owned(),
            },
            Payload::Publish(p) => Self::Publish {
                channel: p.channel,
                message: Bytes::copy_from_slice(p.message),
            },
            Payload::Subscribe(s) => Self::Subscribe { channel: s.channel },
            Payload::Unsubscribe(u) => Self::Unsubscribe { channel: u.channel },
            Payload::Disconnect => Self::Disconnect,
            Payload::Ping => Self::Ping,
            Payload::Pong | Payload::HandshakeAck(_) | Payload::Message(_) | Payload::Error(_) => {
                Self::Unexpected { opcode }
            }
        }
    }
}
