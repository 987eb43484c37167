//! Cancha broker core logic
//!
//! This crate contains the pure state machine logic for the cancha brokers.
//! It is completely decoupled from I/O, enabling deterministic testing of
//! every lifecycle and routing rule without a socket in sight.
//!
//! # Architecture
//!
//! Broker logic is strictly separated from transport concerns:
//!
//! ```text
//!      ┌───────────────────────────────┐
//!      │ cancha-core                   │
//!      │ - TCP client state machine    │
//!      │ - UDP peer table              │
//!      │ - channel index / routing     │
//!      │ - bounded send queues         │
//!      └───────────────────────────────┘
//!                    ↓
//!      ┌───────────────────────────────┐
//!      │ cancha-server (Tokio)         │
//!      │ - sockets, tasks, signals     │
//!      │ - feeds completion events in  │
//!      │ - executes returned actions   │
//!      └───────────────────────────────┘
//! ```
//!
//! The drivers call event methods (`on_accept`, `on_recv`,
//! `on_send_complete`, ...) as their I/O completes, and execute the actions
//! those methods return (start a send, close a connection). The state
//! machines never spawn tasks, never read clocks (timestamps are passed in),
//! and never touch sockets.
//!
//! # Key Guarantees
//!
//! - All mutations of a client's record happen inside one event call; a
//!   driver that serializes events onto one task needs no further
//!   synchronization.
//! - Per-subscriber frame order is the enqueue order: send queues are FIFO
//!   and at most one send per client is ever in flight.
//! - Every per-client resource is bounded: the send queue drops its newest
//!   frame when full, and receive buffers that exceed the protocol limits
//!   close the connection.
//!
//! # Modules
//!
//! - [`channels`]: 256-entry subscriber index and per-client channel masks
//! - [`queue`]: bounded FIFO send queue
//! - [`client`]: per-client records for both transports
//! - [`tcp`]: connection-oriented broker state machine
//! - [`udp`]: datagram broker state machine

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channels;
pub mod client;
pub mod queue;
pub mod tcp;
pub mod udp;

pub use channels::{ChannelIndex, ChannelMask};
pub use client::Role;
pub use queue::SendQueue;
pub use tcp::{ConnId, TcpAction, TcpBroker, TcpBrokerConfig};
pub use udp::{UdpAction, UdpBroker, UdpBrokerConfig};
