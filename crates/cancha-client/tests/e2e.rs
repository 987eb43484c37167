//! End-to-end tests over real loopback sockets.
//!
//! A broker driver runs in-process on an ephemeral port; raw Tokio sockets
//! play the clients so the bytes on the wire are spelled out exactly.

use std::net::SocketAddr;
use std::time::Duration;

use cancha_core::{TcpBrokerConfig, UdpBrokerConfig};
use cancha_proto::payloads::{HandshakeAck, HandshakePub, HandshakeSub, Message, Publish};
use cancha_proto::{Opcode, ParseResult, Payload, decode};
use cancha_server::{TcpServer, UdpServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

fn frame(payload: &Payload<'_>) -> Vec<u8> {
    let mut buf = Vec::new();
    payload.encode(&mut buf).expect("test frames encode");
    buf
}

fn parse_frame(data: &[u8]) -> (Opcode, Vec<u8>) {
    match decode(data) {
        ParseResult::Frame { consumed, frame } => {
            assert_eq!(consumed, data.len());
            (Opcode::from_u8(frame.opcode).expect("known opcode"), frame.payload.to_vec())
        }
        other => panic!("expected frame, got {other:?}"),
    }
}

async fn start_tcp_broker() -> (SocketAddr, oneshot::Sender<()>, JoinHandle<std::io::Result<()>>) {
    let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), TcpBrokerConfig::default())
        .await
        .expect("bind ephemeral port");
    let addr = server.local_addr().expect("local addr");

    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx, handle)
}

async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// Connect and handshake a raw TCP subscriber, returning the stream and
/// the session id from the 16-byte ack.
async fn tcp_subscriber(addr: SocketAddr, channels: &[u8]) -> (TcpStream, u64) {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let hs = frame(&Payload::HandshakeSub(HandshakeSub { channels, client_id: b"sub" }));
    stream.write_all(&hs).await.expect("send handshake");

    let ack = read_exact(&mut stream, 16).await;
    let (opcode, payload) = parse_frame(&ack);
    assert_eq!(opcode, Opcode::HandshakeAck);
    let ack = HandshakeAck::parse(&payload).expect("ack parses");
    assert_eq!(ack.status, 0);
    (stream, ack.session_id)
}

async fn tcp_publisher(addr: SocketAddr, channel: u8) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let hs = frame(&Payload::HandshakePub(HandshakePub { channel, client_id: b"pub" }));
    stream.write_all(&hs).await.expect("send handshake");

    let ack = read_exact(&mut stream, 16).await;
    let (opcode, _) = parse_frame(&ack);
    assert_eq!(opcode, Opcode::HandshakeAck);
    stream
}

#[tokio::test]
async fn tcp_handshake_publish_fan_out() {
    let (addr, stop, handle) = start_tcp_broker().await;

    let (mut sub_a, session_a) = tcp_subscriber(addr, &[0x05, 0x07]).await;
    let (mut sub_b, session_b) = tcp_subscriber(addr, &[0x05]).await;
    assert_eq!(session_a, 1);
    assert_eq!(session_b, 2);

    let mut publisher = tcp_publisher(addr, 0x05).await;
    let publish = frame(&Payload::Publish(Publish { channel: 0x05, message: b"hi" }));
    assert_eq!(publish.len(), 10);
    publisher.write_all(&publish).await.expect("send publish");

    // Both subscribers get the 18-byte MESSAGE with a live timestamp.
    for sub in [&mut sub_a, &mut sub_b] {
        let wire = read_exact(sub, 18).await;
        let (opcode, payload) = parse_frame(&wire);
        assert_eq!(opcode, Opcode::Message);
        let message = Message::parse(&payload).expect("message parses");
        assert_eq!(message.channel, 0x05);
        assert_eq!(message.message, b"hi");
        assert!(message.timestamp_ms > 0, "timestamp must be stamped");
    }

    // The publisher hears nothing back.
    let mut scratch = [0u8; 64];
    let echo = timeout(Duration::from_millis(250), publisher.read(&mut scratch)).await;
    assert!(echo.is_err(), "publisher must not receive its own publish");

    drop(stop);
    handle.await.expect("broker task").expect("broker exits cleanly");
}

#[tokio::test]
async fn tcp_per_publisher_ordering() {
    let (addr, stop, handle) = start_tcp_broker().await;

    let (mut sub, _) = tcp_subscriber(addr, &[9]).await;
    let mut publisher = tcp_publisher(addr, 9).await;

    let mut wire = Vec::new();
    for text in [b"p1".as_slice(), b"p2", b"p3"] {
        wire.extend_from_slice(&frame(&Payload::Publish(Publish { channel: 9, message: text })));
    }
    publisher.write_all(&wire).await.expect("send publishes");

    for expected in [b"p1".as_slice(), b"p2", b"p3"] {
        let delivery = read_exact(&mut sub, 18).await;
        let (_, payload) = parse_frame(&delivery);
        assert_eq!(Message::parse(&payload).unwrap().message, expected);
    }

    drop(stop);
    handle.await.expect("broker task").expect("broker exits cleanly");
}

#[tokio::test]
async fn tcp_disconnect_closes_the_connection() {
    let (addr, stop, handle) = start_tcp_broker().await;

    let (mut sub, _) = tcp_subscriber(addr, &[1]).await;
    sub.write_all(&frame(&Payload::Disconnect)).await.expect("send disconnect");

    // The broker drops us; the stream reaches EOF.
    let mut scratch = [0u8; 64];
    let read = timeout(IO_TIMEOUT, sub.read(&mut scratch))
        .await
        .expect("broker should close promptly")
        .expect("clean close, not an error");
    assert_eq!(read, 0);

    drop(stop);
    handle.await.expect("broker task").expect("broker exits cleanly");
}

#[tokio::test]
async fn tcp_invalid_magic_gets_the_client_dropped() {
    let (addr, stop, handle) = start_tcp_broker().await;

    let (mut sub, _) = tcp_subscriber(addr, &[1]).await;
    sub.write_all(&[0xDE, 0xAD, 0x13, 0x00, 0x00, 0x00, 0x00]).await.expect("send garbage");

    let mut scratch = [0u8; 64];
    let read = timeout(IO_TIMEOUT, sub.read(&mut scratch))
        .await
        .expect("broker should close promptly")
        .expect("clean close, not an error");
    assert_eq!(read, 0);

    drop(stop);
    handle.await.expect("broker task").expect("broker exits cleanly");
}

async fn udp_client(broker: SocketAddr) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind client socket");
    socket.connect(broker).await.expect("connect");
    socket
}

async fn udp_recv(socket: &UdpSocket) -> Vec<u8> {
    let mut scratch = vec![0u8; 2048];
    let len = timeout(IO_TIMEOUT, socket.recv(&mut scratch))
        .await
        .expect("recv timed out")
        .expect("recv failed");
    scratch.truncate(len);
    scratch
}

#[tokio::test]
async fn udp_handshake_then_publish() {
    let server = UdpServer::bind("127.0.0.1:0".parse().unwrap(), UdpBrokerConfig::default())
        .await
        .expect("bind ephemeral port");
    let addr = server.local_addr().expect("local addr");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    // Subscriber registers on channel 0.
    let subscriber = udp_client(addr).await;
    let hs = frame(&Payload::HandshakeSub(HandshakeSub { channels: &[0x00], client_id: b"s" }));
    subscriber.send(&hs).await.expect("send handshake");
    let (opcode, _) = parse_frame(&udp_recv(&subscriber).await);
    assert_eq!(opcode, Opcode::HandshakeAck);

    // Publisher registers and publishes a single datagram.
    let publisher = udp_client(addr).await;
    let hs = frame(&Payload::HandshakePub(HandshakePub { channel: 0x00, client_id: b"p" }));
    publisher.send(&hs).await.expect("send handshake");
    let (opcode, _) = parse_frame(&udp_recv(&publisher).await);
    assert_eq!(opcode, Opcode::HandshakeAck);

    let publish = frame(&Payload::Publish(Publish { channel: 0x00, message: b"x" }));
    publisher.send(&publish).await.expect("send publish");

    // Exactly one MESSAGE datagram lands at the subscriber.
    let delivery = udp_recv(&subscriber).await;
    assert_eq!(delivery.len(), 18);
    let (opcode, payload) = parse_frame(&delivery);
    assert_eq!(opcode, Opcode::Message);
    let message = Message::parse(&payload).expect("message parses");
    assert_eq!(message.channel, 0x00);
    assert_eq!(message.message, b"x");
    assert!(message.timestamp_ms > 0);

    drop(stop_tx);
    handle.await.expect("broker task").expect("broker exits cleanly");
}

#[tokio::test]
async fn udp_garbage_datagram_is_ignored() {
    let server = UdpServer::bind("127.0.0.1:0".parse().unwrap(), UdpBrokerConfig::default())
        .await
        .expect("bind ephemeral port");
    let addr = server.local_addr().expect("local addr");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let client = udp_client(addr).await;
    client.send(&[0xDE, 0xAD, 0xBE, 0xEF]).await.expect("send garbage");

    // No reply; a subsequent valid handshake still works.
    let hs = frame(&Payload::HandshakeSub(HandshakeSub { channels: &[1], client_id: b"s" }));
    client.send(&hs).await.expect("send handshake");
    let (opcode, _) = parse_frame(&udp_recv(&client).await);
    assert_eq!(opcode, Opcode::HandshakeAck);

    drop(stop_tx);
    handle.await.expect("broker task").expect("broker exits cleanly");
}
