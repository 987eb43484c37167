//! TCP broker driver.
//!
//! One task per connection direction: a reader forwards received chunks to
//! the server task, a writer performs one `write` per send action and
//! reports the completion back. The server task owns the
//! [`TcpBroker`] state machine and is the only place that touches it.
//!
//! A completion event reporting fewer bytes than submitted is normal TCP
//! behavior under load; the state machine resubmits the remaining slice, so
//! the writer never loops on its own.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use cancha_core::{ConnId, TcpAction, TcpBroker, TcpBrokerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedWriteHalf};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::wall_clock_ms;

/// Bytes requested per read.
const RECV_CHUNK: usize = 4096;

/// Depth of the server task's completion channel.
const EVENT_QUEUE_DEPTH: usize = 256;

/// I/O completions funneled to the server task.
enum Event {
    Recv { id: ConnId, data: Bytes },
    RecvClosed { id: ConnId },
    RecvError { id: ConnId, error: io::Error },
    SendDone { id: ConnId, result: io::Result<usize> },
}

/// Per-connection handles owned by the server task.
struct Conn {
    send_tx: mpsc::Sender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Mutable broker-side state, kept separate from the listener so the
/// accept future and the event handlers borrow different locals.
struct Driver {
    broker: TcpBroker,
    conns: HashMap<ConnId, Conn>,
    next_conn_id: ConnId,
}

/// The TCP broker server.
pub struct TcpServer {
    listener: TcpListener,
    driver: Driver,
}

impl TcpServer {
    /// Bind the listen socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: TcpBrokerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            driver: Driver {
                broker: TcpBroker::new(config),
                conns: HashMap::new(),
                next_conn_id: 1,
            },
        })
    }

    /// Address the listener actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Propagates the underlying socket error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Never returns an error today; the signature leaves room for fatal
    /// listener failures.
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self { listener, mut driver } = self;
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_QUEUE_DEPTH);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("broker shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => driver.accept(stream, peer, &event_tx),
                        Err(error) => warn!(%error, "failed to accept connection"),
                    }
                }
                Some(event) = event_rx.recv() => {
                    driver.handle_event(event);
                }
            }
        }

        for (_, conn) in driver.conns.drain() {
            conn.reader.abort();
            conn.writer.abort();
        }
        Ok(())
    }

    /// Run until ctrl-c.
    ///
    /// # Errors
    ///
    /// Same as [`TcpServer::run_until`].
    pub async fn run_until_ctrl_c(self) -> io::Result<()> {
        self.run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

impl Driver {
    /// Register a fresh connection: assign a cookie, spawn its reader and
    /// writer tasks, start receiving.
    fn accept(&mut self, stream: TcpStream, peer: SocketAddr, event_tx: &mpsc::Sender<Event>) {
        let id = self.next_conn_id;
        self.next_conn_id += 1;

        if let Err(error) = stream.set_nodelay(true) {
            debug!(id, %error, "failed to set TCP_NODELAY");
        }

        let (mut read_half, write_half) = stream.into_split();

        let reader_tx = event_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                let mut chunk = vec![0u8; RECV_CHUNK];
                match read_half.read(&mut chunk).await {
                    Ok(0) => {
                        let _ = reader_tx.send(Event::RecvClosed { id }).await;
                        break;
                    }
                    Ok(n) => {
                        chunk.truncate(n);
                        if reader_tx.send(Event::Recv { id, data: chunk.into() }).await.is_err() {
                            break;
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(error) => {
                        let _ = reader_tx.send(Event::RecvError { id, error }).await;
                        break;
                    }
                }
            }
        });

        // Capacity 1 is enough: the state machine keeps a single send in
        // flight per connection.
        let (send_tx, send_rx) = mpsc::channel::<Bytes>(1);
        let writer = tokio::spawn(writer_task(id, write_half, send_rx, event_tx.clone()));

        debug!(id, %peer, "connection accepted");
        self.conns.insert(id, Conn { send_tx, reader, writer });
        self.broker.on_accept(id);
    }

    fn handle_event(&mut self, event: Event) {
        let actions = match event {
            Event::Recv { id, data } => self.broker.on_recv(id, &data, wall_clock_ms()),
            Event::RecvClosed { id } => self.broker.on_recv_closed(id),
            Event::RecvError { id, error } => {
                debug!(id, %error, "recv error");
                self.broker.on_recv_error(id)
            }
            Event::SendDone { id, result } => match result {
                Ok(sent) => self.broker.on_send_complete(id, sent),
                Err(error) => {
                    debug!(id, %error, "send error");
                    self.broker.on_send_error(id)
                }
            },
        };
        self.execute(actions);
    }

    /// Execute state machine actions. A failed send submission feeds back
    /// into the state machine, so the work list can grow while draining.
    fn execute(&mut self, actions: Vec<TcpAction>) {
        let mut pending: VecDeque<TcpAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            match action {
                TcpAction::Send { id, data } => {
                    let Some(conn) = self.conns.get(&id) else { continue };
                    if conn.send_tx.try_send(data).is_err() {
                        // Writer task is gone; treat as a failed send.
                        pending.extend(self.broker.on_send_error(id));
                    }
                }
                TcpAction::Close { id } => {
                    if let Some(conn) = self.conns.remove(&id) {
                        conn.reader.abort();
                        // Dropping the send channel lets the writer drain
                        // and close the stream, sending FIN.
                        drop(conn.send_tx);
                        debug!(id, "connection closed");
                    }
                }
            }
        }
    }
}

/// Perform one `write` per queued buffer and report each completion.
async fn writer_task(
    id: ConnId,
    mut write_half: OwnedWriteHalf,
    mut send_rx: mpsc::Receiver<Bytes>,
    event_tx: mpsc::Sender<Event>,
) {
    while let Some(data) = send_rx.recv().await {
        let result = write_half.write(&data).await;
        if event_tx.send(Event::SendDone { id, result }).await.is_err() {
            break;
        }
    }
}
