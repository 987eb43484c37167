//! Datagram broker state machine.
//!
//! UDP peers have no connection lifecycle: a client exists from its first
//! valid handshake datagram onward, and every datagram carries exactly one
//! frame. What remains from the TCP design is routing, the per-peer bounded
//! send queue, and the send scheduler.
//!
//! # Send scheduling
//!
//! Each peer has at most one send in flight, which is what per-subscriber
//! FIFO ordering requires, but up to
//! [`UdpBrokerConfig::max_sends_in_flight`] peers may be transmitting at
//! once. Peers with queued datagrams and no free slot are parked on a FIFO
//! ready list, so a chatty channel cannot starve others.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use bytes::Bytes;
use cancha_proto::{
    ErrorCode, ParseResult, Payload, decode,
    payloads::{ErrorFrame, HandshakeAck, Message},
};
use tracing::{debug, info, warn};

use crate::channels::ChannelIndex;
use crate::client::{FrameOp, Role, UdpClient};
use crate::queue::PushOutcome;
use crate::tcp::broker_frame;

/// Actions the driver must execute after an event call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpAction {
    /// Transmit one datagram to `peer`. At most one send per peer is
    /// outstanding, and at most `max_sends_in_flight` process-wide.
    Send {
        /// Destination address
        peer: SocketAddr,
        /// Complete frame, 1:1 with the datagram
        data: Bytes,
    },
}

/// Tunables for the UDP broker.
#[derive(Debug, Clone)]
pub struct UdpBrokerConfig {
    /// Datagrams a peer's send queue holds before dropping new ones
    pub send_queue_capacity: usize,
    /// Process-wide cap on concurrently outstanding sends
    pub max_sends_in_flight: usize,
    /// Whether a DISCONNECT datagram removes the peer record. UDP has no
    /// connection to close, so records are kept by default.
    pub remove_on_disconnect: bool,
}

impl Default for UdpBrokerConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            max_sends_in_flight: 8,
            remove_on_disconnect: false,
        }
    }
}

/// The datagram broker.
pub struct UdpBroker {
    config: UdpBrokerConfig,
    clients: HashMap<SocketAddr, UdpClient>,
    channels: ChannelIndex<SocketAddr>,
    next_session_id: u64,
    sends_in_flight: usize,
    /// Peers with queued datagrams waiting for a send slot.
    ready: VecDeque<SocketAddr>,
}

impl UdpBroker {
    /// Broker with the given tunables.
    #[must_use]
    pub fn new(config: UdpBrokerConfig) -> Self {
        Self {
            config,
            clients: HashMap::new(),
            channels: ChannelIndex::new(),
            next_session_id: 1,
            sends_in_flight: 0,
            ready: VecDeque::new(),
        }
    }

    /// Number of known peer records.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Role of a peer, `None` when unknown.
    #[must_use]
    pub fn role(&self, peer: SocketAddr) -> Option<Role> {
        self.clients.get(&peer).map(|c| c.role)
    }

    /// One datagram arrived from `peer`. `now_ms` is the broker wall clock
    /// in milliseconds since the Unix epoch.
    pub fn on_datagram(&mut self, peer: SocketAddr, data: &[u8], now_ms: u64) -> Vec<UdpAction> {
        let mut actions = Vec::new();

        // UDP never splits frames across datagrams, so both partial and
        // poisoned input condemn only this datagram.
        let op = match decode(data) {
            ParseResult::NeedMore => {
                debug!(%peer, len = data.len(), "incomplete datagram dropped");
                return actions;
            }
            ParseResult::Invalid => {
                debug!(%peer, len = data.len(), "invalid datagram dropped");
                return actions;
            }
            ParseResult::Frame { frame, .. } => FrameOp::classify(&frame),
        };

        match op {
            FrameOp::HandshakePub { channel, client_id } => {
                let capacity = self.config.send_queue_capacity;
                let client = self
                    .clients
                    .entry(peer)
                    .or_insert_with(|| UdpClient::new(capacity));
                client.role = Role::Publisher;
                client.channels.set(channel);
                client.client_id = client_id;

                info!(%peer, client_id = %client.client_id, channel, "publisher registered");
                self.send_handshake_ack(peer, &mut actions);
            }
            FrameOp::HandshakeSub { channels, client_id } => {
                {
                    let capacity = self.config.send_queue_capacity;
                    let client = self
                        .clients
                        .entry(peer)
                        .or_insert_with(|| UdpClient::new(capacity));
                    client.role = Role::Subscriber;
                    client.client_id = client_id;
                    for &channel in &channels {
                        client.channels.set(channel);
                    }
                    info!(
                        %peer,
                        client_id = %client.client_id,
                        channels = ?channels,
                        "subscriber registered"
                    );
                }
                for channel in channels {
                    self.channels.subscribe(channel, peer);
                }
                self.send_handshake_ack(peer, &mut actions);
            }
            FrameOp::Publish { channel, message } => {
                let known_publisher =
                    matches!(self.clients.get(&peer), Some(c) if c.role == Role::Publisher);
                if !known_publisher {
                    // No handshake, no service.
                    debug!(%peer, channel, "publish from unknown or non-publisher peer dropped");
                    return actions;
                }
                debug!(%peer, channel, len = message.len(), "publish");
                self.route(channel, &message, peer, now_ms, &mut actions);
            }
            FrameOp::Disconnect => {
                info!(%peer, "disconnect datagram");
                if self.config.remove_on_disconnect {
                    self.remove_client(peer);
                }
            }
            FrameOp::Malformed { opcode } => {
                warn!(%peer, ?opcode, "malformed datagram dropped");
                self.send_error(peer, ErrorCode::MalformedMessage, &mut actions);
            }
            other => {
                debug!(%peer, ?other, "unhandled opcode dropped");
            }
        }

        actions
    }

    /// The in-flight send to `peer` completed. Datagrams are all-or-nothing,
    /// so a completion always retires the head frame; `ok` merely drives
    /// logging (UDP send errors do not condemn a peer).
    pub fn on_send_complete(&mut self, peer: SocketAddr, ok: bool) -> Vec<UdpAction> {
        let mut actions = Vec::new();

        debug_assert!(self.sends_in_flight > 0, "send completion without sends in flight");
        self.sends_in_flight = self.sends_in_flight.saturating_sub(1);

        if !ok {
            debug!(%peer, "datagram send failed");
        }

        if let Some(client) = self.clients.get_mut(&peer) {
            debug_assert!(client.send_in_flight);
            client.send_in_flight = false;
            client.send_queue.pop_head();

            if !client.send_queue.is_empty() && !client.queued_for_send {
                client.queued_for_send = true;
                self.ready.push_back(peer);
            }
        }

        self.pump_sends(&mut actions);
        actions
    }

    fn send_handshake_ack(&mut self, peer: SocketAddr, actions: &mut Vec<UdpAction>) {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let ack = broker_frame(&Payload::HandshakeAck(HandshakeAck { status: 0, session_id }));
        self.enqueue(peer, ack, actions);
    }

    fn send_error(&mut self, peer: SocketAddr, code: ErrorCode, actions: &mut Vec<UdpAction>) {
        let frame = broker_frame(&Payload::Error(ErrorFrame::from(code)));
        self.enqueue(peer, frame, actions);
    }

    /// Fan a publication out to every subscriber of `channel` except the
    /// sender.
    fn route(
        &mut self,
        channel: u8,
        message: &[u8],
        sender: SocketAddr,
        now_ms: u64,
        actions: &mut Vec<UdpAction>,
    ) {
        let frame = broker_frame(&Payload::Message(Message {
            channel,
            timestamp_ms: now_ms,
            message,
        }));

        let subscribers: Vec<SocketAddr> = self.channels.subscribers(channel).to_vec();
        debug!(channel, subscribers = subscribers.len(), "routing");

        for sub in subscribers {
            if sub == sender {
                continue;
            }
            self.enqueue(sub, frame.clone(), actions);
        }
    }

    /// Queue a datagram for `peer` and schedule it for transmission.
    fn enqueue(&mut self, peer: SocketAddr, data: Bytes, actions: &mut Vec<UdpAction>) {
        let Some(client) = self.clients.get_mut(&peer) else { return };

        if client.send_queue.push(data) == PushOutcome::Dropped {
            warn!(%peer, queued = client.send_queue.len(), "send queue full, dropping datagram");
            return;
        }

        if !client.send_in_flight && !client.queued_for_send {
            client.queued_for_send = true;
            self.ready.push_back(peer);
        }
        self.pump_sends(actions);
    }

    /// Start sends for ready peers while slots are free. Per-peer FIFO is
    /// preserved because a peer re-enters the ready list only after its
    /// current send completes.
    fn pump_sends(&mut self, actions: &mut Vec<UdpAction>) {
        while self.sends_in_flight < self.config.max_sends_in_flight {
            let Some(peer) = self.ready.pop_front() else { return };

            let Some(client) = self.clients.get_mut(&peer) else { continue };
            client.queued_for_send = false;

            if client.send_in_flight {
                continue;
            }
            let Some(head) = client.send_queue.head() else { continue };

            client.send_in_flight = true;
            self.sends_in_flight += 1;
            actions.push(UdpAction::Send { peer, data: head.clone() });
        }
    }

    fn remove_client(&mut self, peer: SocketAddr) {
        if let Some(client) = self.clients.remove(&peer) {
            self.channels.remove_everywhere(peer, &client.channels);
            debug!(%peer, client_id = %client.client_id, "peer removed");
        }
    }
}

impl Default for UdpBroker {
    fn default() -> Self {
        Self::new(UdpBrokerConfig::default())
    }
}

impl std::fmt::Debug for UdpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpBroker")
            .field("clients", &self.clients.len())
            .field("sends_in_flight", &self.sends_in_flight)
            .finish_non_exhaustive()
    }
}
