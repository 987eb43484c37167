//! Publisher client: handshake, then publish generated commentary on a
//! fixed cadence until ctrl-c, closing with a DISCONNECT frame.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use cancha_proto::Payload;
use cancha_proto::payloads::{HandshakePub, Publish};
use tokio::select;
use tracing::{info, warn};

use crate::Transport;
use crate::msggen::MessageGenerator;
use crate::net::BrokerConn;

/// Everything a publisher run needs.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Broker address
    pub addr: SocketAddr,
    /// TCP or UDP
    pub transport: Transport,
    /// Channel to publish on
    pub channel: u8,
    /// Client identifier sent in the handshake (at most 255 bytes)
    pub client_id: String,
    /// Message generator seed; `None` falls back to `MsgGen_SEED`/entropy
    pub seed: Option<u32>,
    /// Pause between messages
    pub delay: Duration,
}

/// Run the publisher until ctrl-c.
///
/// # Errors
///
/// Fails on connect/handshake problems and on any send error; the caller
/// turns that into a non-zero exit.
pub async fn run(config: PublisherConfig) -> Result<()> {
    ensure!(config.client_id.len() <= 255, "client id exceeds 255 bytes");

    let mut conn = BrokerConn::connect(config.transport, config.addr).await?;

    let handshake = Payload::HandshakePub(HandshakePub {
        channel: config.channel,
        client_id: config.client_id.as_bytes(),
    })
    .to_bytes()?;
    conn.send_frame(&handshake).await.context("failed to send handshake")?;

    let session_id = conn.await_handshake_ack().await?;
    info!(session_id, channel = config.channel, "handshake acknowledged");

    let mut generator = MessageGenerator::new(config.seed);
    let max_len = config.transport.max_publish_payload();

    loop {
        let text = generator.next(max_len);
        info!(len = text.len(), message = %text, "publishing");

        let frame = Payload::Publish(Publish {
            channel: config.channel,
            message: text.as_bytes(),
        })
        .to_bytes()?;
        conn.send_frame(&frame).await.context("failed to send publish")?;

        select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(config.delay) => {}
        }
    }

    info!("sending disconnect");
    if let Err(error) = conn.send_frame(&Payload::Disconnect.to_bytes()?).await {
        warn!(%error, "failed to send disconnect");
    }
    Ok(())
}
