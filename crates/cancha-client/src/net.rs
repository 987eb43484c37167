//! Broker connection shared by both clients.
//!
//! Hides the TCP/UDP split behind one frame-oriented surface: send a frame,
//! receive the next complete frame. On TCP that means accumulating stream
//! chunks and draining the decoder; on UDP every datagram is one frame and
//! damaged datagrams are skipped with a log line.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use bytes::{Buf, Bytes, BytesMut};
use cancha_proto::payloads::HandshakeAck;
use cancha_proto::{Opcode, ParseResult, decode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::Transport;

/// Receive scratch size for datagrams, sized above the UDP publish cap.
const UDP_RECV_BUFFER: usize = 2048;

/// How long to wait for the broker's HANDSHAKE_ACK.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// A frame copied out of the transport, owned by the caller.
pub(crate) struct OwnedFrame {
    pub opcode: u8,
    pub payload: Bytes,
}

enum Stream {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Frame-oriented client connection to a broker.
pub(crate) struct BrokerConn {
    stream: Stream,
    /// Stream accumulation buffer (TCP only)
    buffer: BytesMut,
}

impl BrokerConn {
    /// Connect over the chosen transport. UDP "connects" the socket so
    /// datagrams from other peers are filtered out by the kernel.
    pub(crate) async fn connect(transport: Transport, addr: SocketAddr) -> Result<Self> {
        let stream = match transport {
            Transport::Tcp => {
                let stream = TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("failed to connect to {addr}"))?;
                Stream::Tcp(stream)
            }
            Transport::Udp => {
                let bind_addr = if addr.is_ipv4() {
                    SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(bind_addr)
                    .await
                    .context("failed to bind local UDP socket")?;
                socket
                    .connect(addr)
                    .await
                    .with_context(|| format!("failed to connect to {addr}"))?;
                Stream::Udp(socket)
            }
        };

        info!(%addr, "connected to broker");
        Ok(Self { stream, buffer: BytesMut::new() })
    }

    /// Send one encoded frame.
    pub(crate) async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match &mut self.stream {
            Stream::Tcp(stream) => stream.write_all(frame).await,
            Stream::Udp(socket) => socket.send(frame).await.map(|_| ()),
        }
    }

    /// Wait for HANDSHAKE_ACK and return the session id.
    ///
    /// # Errors
    ///
    /// Fails when the ack does not arrive within five seconds, carries a
    /// non-zero status, or something else comes back first.
    pub(crate) async fn await_handshake_ack(&mut self) -> Result<u64> {
        let frame = tokio::time::timeout(ACK_TIMEOUT, self.recv_frame())
            .await
            .context("timed out waiting for handshake ack")??
            .context("broker closed the connection during handshake")?;

        if frame.opcode != Opcode::HandshakeAck.to_u8() {
            bail!("unexpected response opcode {:#04x}", frame.opcode);
        }

        let ack = HandshakeAck::parse(&frame.payload)?;
        ensure!(ack.status == 0, "broker rejected handshake with status {}", ack.status);
        Ok(ack.session_id)
    }

    /// Receive the next complete frame.
    ///
    /// Returns `None` when the broker closed the connection (TCP only; a
    /// UDP socket never closes).
    ///
    /// # Errors
    ///
    /// Fails when the TCP stream turns unparseable; the byte stream cannot
    /// recover from that. Damaged UDP datagrams are skipped instead.
    pub(crate) async fn recv_frame(&mut self) -> Result<Option<OwnedFrame>> {
        match &mut self.stream {
            Stream::Tcp(stream) => loop {
                match decode(&self.buffer) {
                    ParseResult::Frame { consumed, frame } => {
                        let owned = OwnedFrame {
                            opcode: frame.opcode,
                            payload: Bytes::copy_from_slice(frame.payload),
                        };
                        self.buffer.advance(consumed);
                        return Ok(Some(owned));
                    }
                    ParseResult::Invalid => bail!("broker sent an unparseable frame"),
                    ParseResult::NeedMore => {
                        let read = stream
                            .read_buf(&mut self.buffer)
                            .await
                            .context("failed to read from broker")?;
                        if read == 0 {
                            return Ok(None);
                        }
                    }
                }
            },
            Stream::Udp(socket) => loop {
                let mut scratch = vec![0u8; UDP_RECV_BUFFER];
                let len = socket
                    .recv(&mut scratch)
                    .await
                    .context("failed to receive from broker")?;

                match decode(&scratch[..len]) {
                    ParseResult::Frame { frame, .. } => {
                        return Ok(Some(OwnedFrame {
                            opcode: frame.opcode,
                            payload: Bytes::copy_from_slice(frame.payload),
                        }));
                    }
                    ParseResult::NeedMore => {
                        warn!(len, "incomplete datagram, skipping");
                    }
                    ParseResult::Invalid => {
                        debug!(len, "invalid datagram, skipping");
                    }
                }
            },
        }
    }
}
