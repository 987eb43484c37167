//! Wire format stability tests.
//!
//! These pin the exact byte layout of every frame type so the format cannot
//! drift without a test failing. Interoperating peers depend on these bytes,
//! not on any Rust type.

use cancha_proto::{
    ErrorCode, FrameHeader, Opcode, ParseResult, Payload, decode,
    payloads::{
        ErrorFrame, HandshakeAck, HandshakePub, HandshakeSub, Message, Publish, Subscribe,
        Unsubscribe,
    },
};

fn encode(payload: &Payload<'_>) -> Vec<u8> {
    let mut buf = Vec::new();
    payload.encode(&mut buf).expect("encoding should succeed");
    buf
}

#[test]
fn subscriber_handshake_bytes() {
    // ch_count=2, channels=[0x05, 0x07], client_id="sub": 7 + 1 + 2 + 1 + 3
    // = 14 bytes on the wire.
    let wire = encode(&Payload::HandshakeSub(HandshakeSub {
        channels: &[0x05, 0x07],
        client_id: b"sub",
    }));

    assert_eq!(wire.len(), 14);
    assert_eq!(
        wire,
        [
            0xFE, 0xCA, // magic, little-endian
            0x02, // HANDSHAKE_SUB
            0x07, 0x00, 0x00, 0x00, // payload length
            0x02, // ch_count
            0x05, 0x07, // channels
            0x03, // cid_len
            b's', b'u', b'b',
        ]
    );
}

#[test]
fn handshake_ack_bytes() {
    // status + session_id: 7 + 9 = 16 bytes.
    let wire = encode(&Payload::HandshakeAck(HandshakeAck { status: 0, session_id: 1 }));

    assert_eq!(wire.len(), 16);
    assert_eq!(
        wire,
        [
            0xFE, 0xCA, 0x03, 0x09, 0x00, 0x00, 0x00, // header
            0x00, // status
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // session_id = 1
        ]
    );
}

#[test]
fn publish_bytes() {
    let wire = encode(&Payload::Publish(Publish { channel: 0x05, message: b"hi" }));

    assert_eq!(wire.len(), 10);
    assert_eq!(
        wire,
        [0xFE, 0xCA, 0x10, 0x03, 0x00, 0x00, 0x00, 0x05, b'h', b'i']
    );
}

#[test]
fn message_bytes() {
    let wire = encode(&Payload::Message(Message {
        channel: 0x05,
        timestamp_ms: 0x0102_0304_0506_0708,
        message: b"hi",
    }));

    assert_eq!(wire.len(), 18);
    assert_eq!(
        wire,
        [
            0xFE, 0xCA, 0x13, 0x0B, 0x00, 0x00, 0x00, // header, length 11
            0x05, // channel
            0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // timestamp LE
            b'h', b'i',
        ]
    );
}

#[test]
fn control_frames_are_bare_headers() {
    assert_eq!(encode(&Payload::Disconnect), [0xFE, 0xCA, 0x04, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(encode(&Payload::Ping), [0xFE, 0xCA, 0x20, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(encode(&Payload::Pong), [0xFE, 0xCA, 0x21, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn error_frame_bytes() {
    let wire = encode(&Payload::Error(ErrorFrame::from(ErrorCode::InvalidOpcode)));
    assert_eq!(wire, [0xFE, 0xCA, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x06]);
}

#[test]
fn encoded_len_matches_bytes_written_for_every_opcode() {
    let channels = [1u8, 2, 3];
    let payloads = [
        Payload::HandshakePub(HandshakePub { channel: 4, client_id: b"publisher" }),
        Payload::HandshakeSub(HandshakeSub { channels: &channels, client_id: b"subscriber" }),
        Payload::HandshakeAck(HandshakeAck { status: 0, session_id: 77 }),
        Payload::Disconnect,
        Payload::Publish(Publish { channel: 9, message: b"corner" }),
        Payload::Subscribe(Subscribe { channel: 12 }),
        Payload::Unsubscribe(Unsubscribe { channel: 12 }),
        Payload::Message(Message { channel: 9, timestamp_ms: 123, message: b"corner" }),
        Payload::Ping,
        Payload::Pong,
        Payload::Error(ErrorFrame::from(ErrorCode::MalformedMessage)),
    ];

    for payload in payloads {
        let wire = encode(&payload);
        assert_eq!(
            wire.len(),
            payload.encoded_len().unwrap(),
            "{:?}",
            payload.opcode()
        );

        // And every encoding decodes back to the identical payload.
        let ParseResult::Frame { consumed, frame } = decode(&wire) else {
            panic!("{:?} must decode", payload.opcode());
        };
        assert_eq!(consumed, wire.len());
        let parsed =
            Payload::parse(Opcode::from_u8(frame.opcode).unwrap(), frame.payload).unwrap();
        assert_eq!(parsed, payload);
    }
}

#[test]
fn partial_frame_then_completion() {
    // Header plus 1 of 2 payload bytes, then the final byte arrives.
    let partial = [0xFE, 0xCA, 0x13, 0x02, 0x00, 0x00, 0x00, 0x05];
    assert_eq!(decode(&partial), ParseResult::NeedMore);

    let mut complete = partial.to_vec();
    complete.push(0x41);
    match decode(&complete) {
        ParseResult::Frame { consumed, frame } => {
            assert_eq!(consumed, 9);
            assert_eq!(frame.payload, [0x05, 0x41]);
        }
        other => panic!("expected frame, got {other:?}"),
    }
}

#[test]
fn garbage_magic_is_invalid() {
    assert_eq!(
        decode(&[0xDE, 0xAD, 0x13, 0x00, 0x00, 0x00, 0x00]),
        ParseResult::Invalid
    );
}

#[test]
fn header_constants() {
    assert_eq!(FrameHeader::SIZE, 7);
    assert_eq!(cancha_proto::MAGIC, 0xCAFE);
    assert_eq!(cancha_proto::MAX_PAYLOAD_SIZE, 1_048_576);
}
