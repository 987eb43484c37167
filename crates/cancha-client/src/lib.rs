//! Client side of the cancha pub/sub protocol.
//!
//! Two synchronous-in-spirit drivers built on Tokio:
//!
//! - [`publisher::run`]: handshake as a publisher, then generate and send
//!   PUBLISH frames on a fixed cadence until ctrl-c.
//! - [`subscriber::run`]: handshake as a subscriber, then decode and
//!   display MESSAGE frames until the broker disconnects or ctrl-c.
//!
//! Both speak TCP or UDP against the same broker wire format; the transport
//! is chosen per invocation with [`Transport`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod msggen;
mod net;
pub mod publisher;
pub mod subscriber;

use clap::ValueEnum;

/// Transport used to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Stream transport; frames may arrive in arbitrary chunks
    Tcp,
    /// Datagram transport; one frame per datagram
    Udp,
}

impl Transport {
    /// Largest application payload a publisher should send on this
    /// transport. TCP is bounded by politeness, UDP by a typical MTU.
    #[must_use]
    pub const fn max_publish_payload(self) -> usize {
        match self {
            Self::Tcp => 1024,
            Self::Udp => 1400,
        }
    }
}
