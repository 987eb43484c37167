//! Connection-oriented broker state machine.
//!
//! The driver owns the sockets and calls one event method per I/O
//! completion; each call returns the actions the driver must execute. The
//! lifecycle mirrors the completion-queue design:
//!
//! ```text
//! accept completion      -> on_accept(id)
//! recv completion (n>0)  -> on_recv(id, bytes, now_ms)
//! recv completion (n=0)  -> on_recv_closed(id)
//! recv error             -> on_recv_error(id)
//! send completion        -> on_send_complete(id, n)
//! send error             -> on_send_error(id)
//! ```
//!
//! Connections are identified by an opaque `u64` cookie assigned by the
//! driver, so nothing transport-specific leaks into the state machine and a
//! test can drive it with plain integers.
//!
//! # Per-client rules
//!
//! - At most one [`TcpAction::Send`] is outstanding per client; the next
//!   send starts only from `on_send_complete`. Partial completions resubmit
//!   the remaining slice of the head frame, so a frame is popped only once
//!   every byte of it was accepted.
//! - A client in `Closing` receives nothing further. If a send is in flight
//!   when the client enters `Closing`, the record is freed when that send
//!   completes; otherwise it is freed immediately.

use std::collections::HashMap;

use bytes::{Buf, Bytes};
use cancha_proto::{
    ErrorCode, HEADER_SIZE, MAX_PAYLOAD_SIZE, ParseResult, Payload, decode,
    payloads::{ErrorFrame, HandshakeAck, Message},
};
use tracing::{debug, info, warn};

use crate::channels::ChannelIndex;
use crate::client::{FrameOp, Role, TcpClient, TcpState};
use crate::queue::PushOutcome;

/// Opaque connection cookie assigned by the driver.
pub type ConnId = u64;

/// Actions the driver must execute after an event call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpAction {
    /// Start a send of `data` to connection `id`. The broker guarantees no
    /// other send is in flight for this connection.
    Send {
        /// Target connection
        id: ConnId,
        /// Bytes to hand to the transport in one write
        data: Bytes,
    },
    /// Close the connection and forget the cookie. The record is already
    /// gone; straggler events for `id` are ignored.
    Close {
        /// Connection to tear down
        id: ConnId,
    },
}

/// Tunables for the TCP broker. Defaults match the protocol limits.
#[derive(Debug, Clone)]
pub struct TcpBrokerConfig {
    /// Frames a client's send queue holds before dropping new ones
    pub send_queue_capacity: usize,
    /// Receive-buffer cap while a client is still in handshake
    pub handshake_buffer_limit: usize,
    /// Receive-buffer cap for ready clients (one max-size frame)
    pub recv_buffer_limit: usize,
}

impl Default for TcpBrokerConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            handshake_buffer_limit: 1024,
            recv_buffer_limit: MAX_PAYLOAD_SIZE as usize + HEADER_SIZE,
        }
    }
}

/// One drain-loop step, lifted out of the borrow of the receive buffer.
enum Step {
    /// Incomplete frame at the buffer head; check limits and wait.
    Incomplete,
    /// Bytes that can never become a valid frame.
    Poisoned,
    /// A complete frame, already classified.
    Frame(usize, FrameOp),
}

/// The connection-oriented broker.
pub struct TcpBroker {
    config: TcpBrokerConfig,
    clients: HashMap<ConnId, TcpClient>,
    channels: ChannelIndex<ConnId>,
    next_session_id: u64,
}

impl TcpBroker {
    /// Broker with the given tunables.
    #[must_use]
    pub fn new(config: TcpBrokerConfig) -> Self {
        Self {
            config,
            clients: HashMap::new(),
            channels: ChannelIndex::new(),
            next_session_id: 1,
        }
    }

    /// Number of live client records.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Lifecycle state of a connection, `None` once removed.
    #[must_use]
    pub fn state(&self, id: ConnId) -> Option<TcpState> {
        self.clients.get(&id).map(|c| c.state)
    }

    /// Role of a connection, `None` once removed.
    #[must_use]
    pub fn role(&self, id: ConnId) -> Option<Role> {
        self.clients.get(&id).map(|c| c.role)
    }

    /// Subscribers currently indexed for `channel`.
    #[must_use]
    pub fn subscribers(&self, channel: u8) -> &[ConnId] {
        self.channels.subscribers(channel)
    }

    /// A new connection was accepted.
    pub fn on_accept(&mut self, id: ConnId) {
        debug!(id, "client added, awaiting handshake");
        let prev = self.clients.insert(id, TcpClient::new(self.config.send_queue_capacity));
        debug_assert!(prev.is_none(), "connection cookie reused while live");
    }

    /// Bytes arrived for `id`. `now_ms` is the broker wall clock in
    /// milliseconds since the Unix epoch, used to stamp routed messages.
    pub fn on_recv(&mut self, id: ConnId, data: &[u8], now_ms: u64) -> Vec<TcpAction> {
        let mut actions = Vec::new();

        match self.clients.get_mut(&id) {
            Some(client) if client.state != TcpState::Closing => {
                client.recv_buffer.extend_from_slice(data);
            }
            _ => return actions,
        }

        self.drain_frames(id, now_ms, &mut actions);
        self.reap_if_closing(id, &mut actions);
        actions
    }

    /// Peer closed its end (recv returned 0).
    pub fn on_recv_closed(&mut self, id: ConnId) -> Vec<TcpAction> {
        debug!(id, "peer closed connection");
        let mut actions = Vec::new();
        self.remove_client(id, &mut actions);
        actions
    }

    /// A receive failed with a non-retriable error.
    pub fn on_recv_error(&mut self, id: ConnId) -> Vec<TcpAction> {
        debug!(id, "recv failed");
        let mut actions = Vec::new();
        self.remove_client(id, &mut actions);
        actions
    }

    /// A send completed, having transferred `sent` bytes.
    ///
    /// `sent` may be less than the submitted slice; the remainder is
    /// resubmitted so the head frame finishes before the next one starts.
    pub fn on_send_complete(&mut self, id: ConnId, sent: usize) -> Vec<TcpAction> {
        let mut actions = Vec::new();

        let closing = match self.clients.get(&id) {
            Some(client) => {
                debug_assert!(client.send_in_flight, "send completion without send in flight");
                client.state == TcpState::Closing
            }
            None => return actions,
        };

        if closing {
            // The in-flight send has drained; free the record.
            self.remove_client(id, &mut actions);
            return actions;
        }

        let Some(client) = self.clients.get_mut(&id) else {
            return actions;
        };
        let head_len = match client.send_queue.head() {
            Some(head) => head.len(),
            None => return actions,
        };

        client.send_offset += sent;
        if client.send_offset < head_len {
            // Short write; push the rest of the same frame.
            if let Some(head) = client.send_queue.head() {
                actions.push(TcpAction::Send { id, data: head.slice(client.send_offset..) });
            }
            return actions;
        }

        client.send_queue.pop_head();
        client.send_offset = 0;
        client.send_in_flight = false;

        if !client.send_queue.is_empty() {
            Self::start_send(id, client, &mut actions);
        }
        actions
    }

    /// A send failed; the subscriber is removed, the publisher unaffected.
    pub fn on_send_error(&mut self, id: ConnId) -> Vec<TcpAction> {
        debug!(id, "send failed");
        let mut actions = Vec::new();
        self.remove_client(id, &mut actions);
        actions
    }

    /// Parse and dispatch complete frames from the client's receive buffer.
    fn drain_frames(&mut self, id: ConnId, now_ms: u64, actions: &mut Vec<TcpAction>) {
        loop {
            // Decode against the buffer, then lift the frame into an owned
            // op so the buffer borrow ends before dispatch touches other
            // clients.
            let step = {
                let Some(client) = self.clients.get(&id) else { return };
                if client.state == TcpState::Closing {
                    return;
                }
                match decode(&client.recv_buffer) {
                    ParseResult::NeedMore => Step::Incomplete,
                    ParseResult::Invalid => Step::Poisoned,
                    ParseResult::Frame { consumed, frame } => {
                        Step::Frame(consumed, FrameOp::classify(&frame))
                    }
                }
            };

            match step {
                Step::Incomplete => {
                    self.enforce_buffer_limit(id);
                    return;
                }
                Step::Poisoned => {
                    warn!(id, "unparseable frame, closing");
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.state = TcpState::Closing;
                    }
                    return;
                }
                Step::Frame(consumed, op) => {
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.recv_buffer.advance(consumed);
                    }
                    self.dispatch(id, op, now_ms, actions);
                }
            }
        }
    }

    /// Close clients whose receive buffer grew past its cap without
    /// yielding a frame.
    fn enforce_buffer_limit(&mut self, id: ConnId) {
        let Some(client) = self.clients.get_mut(&id) else { return };

        let limit = match client.state {
            TcpState::Handshake => self.config.handshake_buffer_limit,
            TcpState::Ready => self.config.recv_buffer_limit,
            TcpState::Closing => return,
        };

        if client.recv_buffer.len() > limit {
            warn!(
                id,
                buffered = client.recv_buffer.len(),
                limit,
                "receive buffer over limit without a complete frame, closing"
            );
            client.state = TcpState::Closing;
        }
    }

    fn dispatch(&mut self, id: ConnId, op: FrameOp, now_ms: u64, actions: &mut Vec<TcpAction>) {
        let state = match self.clients.get(&id) {
            Some(client) => client.state,
            None => return,
        };

        match state {
            TcpState::Handshake => self.dispatch_handshake(id, op, actions),
            TcpState::Ready => self.dispatch_ready(id, op, now_ms, actions),
            TcpState::Closing => {}
        }
    }

    /// First frame: must be a well-formed handshake, anything else closes.
    fn dispatch_handshake(&mut self, id: ConnId, op: FrameOp, actions: &mut Vec<TcpAction>) {
        match op {
            FrameOp::HandshakePub { channel, client_id } => {
                {
                    let Some(client) = self.clients.get_mut(&id) else { return };
                    client.role = Role::Publisher;
                    client.state = TcpState::Ready;
                    client.channels.set(channel);
                    client.client_id = client_id;
                    info!(id, client_id = %client.client_id, channel, "publisher registered");
                }
                self.send_handshake_ack(id, actions);
            }
            FrameOp::HandshakeSub { channels, client_id } => {
                {
                    let Some(client) = self.clients.get_mut(&id) else { return };
                    client.role = Role::Subscriber;
                    client.state = TcpState::Ready;
                    client.client_id = client_id;
                    for &channel in &channels {
                        client.channels.set(channel);
                    }
                    info!(
                        id,
                        client_id = %client.client_id,
                        channels = ?channels,
                        "subscriber registered"
                    );
                }
                for channel in channels {
                    self.channels.subscribe(channel, id);
                }
                self.send_handshake_ack(id, actions);
            }
            other => {
                warn!(id, ?other, "invalid handshake, closing");
                if let Some(client) = self.clients.get_mut(&id) {
                    client.state = TcpState::Closing;
                }
            }
        }
    }

    fn dispatch_ready(
        &mut self,
        id: ConnId,
        op: FrameOp,
        now_ms: u64,
        actions: &mut Vec<TcpAction>,
    ) {
        match op {
            FrameOp::Publish { channel, message } => {
                let role = match self.clients.get(&id) {
                    Some(client) => client.role,
                    None => return,
                };
                if role != Role::Publisher {
                    // Tolerated: log it, keep the connection.
                    debug!(id, channel, "publish from non-publisher ignored");
                    return;
                }
                debug!(id, channel, len = message.len(), "publish");
                self.route(channel, &message, id, now_ms, actions);
            }
            FrameOp::Subscribe { channel } => {
                let Some(client) = self.clients.get_mut(&id) else { return };
                if client.role != Role::Subscriber {
                    self.send_error(id, ErrorCode::InvalidOpcode, actions);
                    return;
                }
                client.channels.set(channel);
                self.channels.subscribe(channel, id);
                debug!(id, channel, "subscribed");
            }
            FrameOp::Unsubscribe { channel } => {
                let Some(client) = self.clients.get_mut(&id) else { return };
                if client.role != Role::Subscriber {
                    self.send_error(id, ErrorCode::InvalidOpcode, actions);
                    return;
                }
                client.channels.clear(channel);
                self.channels.unsubscribe(channel, id);
                debug!(id, channel, "unsubscribed");
            }
            FrameOp::Disconnect => {
                info!(id, "client disconnecting");
                if let Some(client) = self.clients.get_mut(&id) {
                    client.state = TcpState::Closing;
                }
            }
            FrameOp::Ping => {
                self.enqueue(id, broker_frame(&Payload::Pong), actions);
            }
            FrameOp::HandshakePub { .. } | FrameOp::HandshakeSub { .. } => {
                warn!(id, "handshake repeated after ready");
                self.send_error(id, ErrorCode::InvalidOpcode, actions);
            }
            FrameOp::Unexpected { opcode } => {
                warn!(id, ?opcode, "unexpected opcode");
                self.send_error(id, ErrorCode::InvalidOpcode, actions);
            }
            FrameOp::Unknown { opcode } => {
                warn!(id, opcode, "unknown opcode");
                self.send_error(id, ErrorCode::InvalidOpcode, actions);
            }
            FrameOp::Malformed { opcode } => {
                warn!(id, ?opcode, "malformed payload");
                self.send_error(id, ErrorCode::MalformedMessage, actions);
            }
        }
    }

    /// Fan a publication out to every subscriber of `channel` except the
    /// sender. The MESSAGE frame is encoded once and cheaply cloned per
    /// subscriber.
    fn route(
        &mut self,
        channel: u8,
        message: &[u8],
        sender: ConnId,
        now_ms: u64,
        actions: &mut Vec<TcpAction>,
    ) {
        let frame = broker_frame(&Payload::Message(Message {
            channel,
            timestamp_ms: now_ms,
            message,
        }));

        let subscribers: Vec<ConnId> = self.channels.subscribers(channel).to_vec();
        debug!(channel, subscribers = subscribers.len(), "routing");

        for sub in subscribers {
            if sub == sender {
                continue;
            }
            self.enqueue(sub, frame.clone(), actions);
        }
    }

    fn send_handshake_ack(&mut self, id: ConnId, actions: &mut Vec<TcpAction>) {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let ack = broker_frame(&Payload::HandshakeAck(HandshakeAck { status: 0, session_id }));
        self.enqueue(id, ack, actions);
    }

    fn send_error(&mut self, id: ConnId, code: ErrorCode, actions: &mut Vec<TcpAction>) {
        let frame = broker_frame(&Payload::Error(ErrorFrame::from(code)));
        self.enqueue(id, frame, actions);
    }

    /// Queue a frame for `id` and kick off a send when none is in flight.
    /// Frames for clients that are not `Ready` are discarded.
    fn enqueue(&mut self, id: ConnId, data: Bytes, actions: &mut Vec<TcpAction>) {
        let Some(client) = self.clients.get_mut(&id) else { return };
        if client.state != TcpState::Ready {
            return;
        }

        if client.send_queue.push(data) == PushOutcome::Dropped {
            warn!(id, queued = client.send_queue.len(), "send queue full, dropping frame");
            return;
        }

        if !client.send_in_flight {
            Self::start_send(id, client, actions);
        }
    }

    fn start_send(id: ConnId, client: &mut TcpClient, actions: &mut Vec<TcpAction>) {
        let Some(head) = client.send_queue.head() else { return };
        client.send_in_flight = true;
        client.send_offset = 0;
        actions.push(TcpAction::Send { id, data: head.clone() });
    }

    fn reap_if_closing(&mut self, id: ConnId, actions: &mut Vec<TcpAction>) {
        // A client with a send in flight is freed from on_send_complete
        // once that send drains.
        let reap = matches!(
            self.clients.get(&id),
            Some(client) if client.state == TcpState::Closing && !client.send_in_flight
        );
        if reap {
            self.remove_client(id, actions);
        }
    }

    /// Prune the channel index, drop the record, tell the driver to close.
    fn remove_client(&mut self, id: ConnId, actions: &mut Vec<TcpAction>) {
        let Some(client) = self.clients.remove(&id) else { return };
        self.channels.remove_everywhere(id, &client.channels);

        debug!(id, client_id = %client.client_id, "client removed");
        actions.push(TcpAction::Close { id });
    }
}

impl Default for TcpBroker {
    fn default() -> Self {
        Self::new(TcpBrokerConfig::default())
    }
}

impl std::fmt::Debug for TcpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBroker")
            .field("clients", &self.clients.len())
            .field("next_session_id", &self.next_session_id)
            .finish_non_exhaustive()
    }
}

/// Encode a broker-originated frame.
///
/// Encoding only fails for u8-length-prefixed fields; no frame the broker
/// emits (ACK, MESSAGE, PONG, ERROR) carries one.
pub(crate) fn broker_frame(payload: &Payload<'_>) -> Bytes {
    match payload.to_bytes() {
        Ok(bytes) => bytes,
        Err(_) => unreachable!("broker frames have no length-prefixed fields"),
    }
}
