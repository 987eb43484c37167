//! UDP broker driver.
//!
//! One socket, one task. Receives land in a scratch buffer and go straight
//! into the state machine; send actions become `send_to` futures tracked in
//! a [`JoinSet`], whose completions feed back as send-complete events. The
//! state machine caps how many sends are outstanding at once, so the set
//! stays small.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use cancha_core::{UdpAction, UdpBroker, UdpBrokerConfig};
use tokio::net::UdpSocket;
use tokio::select;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::wall_clock_ms;

/// Receive scratch size, comfortably above the largest client datagram.
const RECV_BUFFER_SIZE: usize = 4096;

/// The UDP broker server.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    broker: UdpBroker,
}

impl UdpServer {
    /// Bind the datagram socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: UdpBrokerConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket: Arc::new(socket), broker: UdpBroker::new(config) })
    }

    /// Address the socket actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Propagates the underlying socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Never returns an error today; the signature leaves room for fatal
    /// socket failures.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self { socket, mut broker } = self;
        let mut in_flight: JoinSet<(SocketAddr, io::Result<usize>)> = JoinSet::new();
        let mut scratch = vec![0u8; RECV_BUFFER_SIZE];
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("broker shutting down");
                    break;
                }
                received = socket.recv_from(&mut scratch) => {
                    match received {
                        Ok((len, peer)) => {
                            let actions = broker.on_datagram(peer, &scratch[..len], wall_clock_ms());
                            submit_sends(&socket, actions, &mut in_flight);
                        }
                        Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                        Err(error) => warn!(%error, "recv_from failed"),
                    }
                }
                Some(joined) = in_flight.join_next() => {
                    match joined {
                        Ok((peer, result)) => {
                            if let Err(error) = &result {
                                debug!(%peer, %error, "send_to failed");
                            }
                            let actions = broker.on_send_complete(peer, result.is_ok());
                            submit_sends(&socket, actions, &mut in_flight);
                        }
                        Err(error) => warn!(%error, "send task panicked"),
                    }
                }
            }
        }

        in_flight.shutdown().await;
        Ok(())
    }

    /// Run until ctrl-c.
    ///
    /// # Errors
    ///
    /// Same as [`UdpServer::run_until`].
    pub async fn run_until_ctrl_c(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Turn send actions into tracked `send_to` futures.
fn submit_sends(
    socket: &Arc<UdpSocket>,
    actions: Vec<UdpAction>,
    in_flight: &mut JoinSet<(SocketAddr, io::Result<usize>)>,
) {
    for action in actions {
        let UdpAction::Send { peer, data } = action;
        let socket = Arc::clone(socket);
        in_flight.spawn(async move { (peer, socket.send_to(&data, peer).await) });
    }
}
