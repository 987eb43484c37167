//! Subscriber client: handshake with a channel list, then display MESSAGE
//! frames until the broker disconnects or ctrl-c.

use std::net::SocketAddr;

use anyhow::{Context, Result, ensure};
use cancha_proto::payloads::{HandshakeSub, Message};
use cancha_proto::{ErrorCode, Opcode, Payload};
use tokio::select;
use tracing::{debug, info, warn};

use crate::Transport;
use crate::net::{BrokerConn, OwnedFrame};

/// Everything a subscriber run needs.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Broker address
    pub addr: SocketAddr,
    /// TCP or UDP
    pub transport: Transport,
    /// Channels to subscribe to (1..=255 entries)
    pub channels: Vec<u8>,
    /// Client identifier sent in the handshake (at most 255 bytes)
    pub client_id: String,
}

/// Run the subscriber until the broker disconnects or ctrl-c.
///
/// # Errors
///
/// Fails on connect/handshake problems and when the TCP stream turns
/// unparseable.
pub async fn run(config: SubscriberConfig) -> Result<()> {
    ensure!(!config.channels.is_empty(), "at least one channel must be specified");
    ensure!(config.channels.len() <= 255, "channel list exceeds 255 entries");
    ensure!(config.client_id.len() <= 255, "client id exceeds 255 bytes");

    let mut conn = BrokerConn::connect(config.transport, config.addr).await?;

    let handshake = Payload::HandshakeSub(HandshakeSub {
        channels: &config.channels,
        client_id: config.client_id.as_bytes(),
    })
    .to_bytes()?;
    conn.send_frame(&handshake).await.context("failed to send handshake")?;

    let session_id = conn.await_handshake_ack().await?;
    info!(session_id, channels = ?config.channels, "handshake acknowledged");
    info!("listening for messages");

    loop {
        let frame = select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = conn.recv_frame() => frame?,
        };

        let Some(frame) = frame else {
            info!("connection closed by broker");
            break;
        };
        if !handle_frame(&frame) {
            break;
        }
    }

    info!("sending disconnect");
    if let Err(error) = conn.send_frame(&Payload::Disconnect.to_bytes()?).await {
        debug!(%error, "failed to send disconnect");
    }
    Ok(())
}

/// Display or log one broker frame. Returns `false` when the loop should
/// end.
fn handle_frame(frame: &OwnedFrame) -> bool {
    match Opcode::from_u8(frame.opcode) {
        Some(Opcode::Message) => match Message::parse(&frame.payload) {
            Ok(message) => {
                let text = String::from_utf8_lossy(message.message);
                println!("[canal {}] [{}] {}", message.channel, message.timestamp_ms, text);
            }
            Err(error) => warn!(%error, "undisplayable message frame"),
        },
        Some(Opcode::Error) => {
            let code = frame.payload.first().copied().unwrap_or_default();
            match ErrorCode::from_u8(code) {
                Some(known) => warn!(code, ?known, "broker reported an error"),
                None => warn!(code, "broker reported an unknown error"),
            }
        }
        Some(Opcode::Disconnect) => {
            info!("broker requested disconnect");
            return false;
        }
        other => debug!(opcode = frame.opcode, ?other, "unexpected frame ignored"),
    }
    true
}
