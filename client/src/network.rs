use log::{debug, error, info, warn};
use shared::codec::CodecError;
use shared::command::Command;
use shared::envelope::Envelope;
use shared::messages::{ClientMessage, JoinReply, ServerMessage};
use shared::SlotId;
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

/// How often the sender task drains the outgoing queue
pub const SEND_TICK: Duration = Duration::from_millis(5);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Gap between `PLAYER_JOIN` retransmissions while waiting for a reply
pub const JOIN_RETRY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("server is full")]
    Rejected,
    #[error("no reply from {0}")]
    Timeout(SocketAddr),
    #[error("network tasks have stopped")]
    Closed,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

type Outgoing = Arc<Mutex<VecDeque<Envelope>>>;

/// UDP link to one session server
///
/// Outgoing messages are queued and flushed by a sender task; a receiver task
/// decodes everything the server sends into an incoming channel.
pub struct NetworkClient {
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    outgoing: Outgoing,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
    connected: Arc<AtomicBool>,
    slot: Option<SlotId>,
    started: Instant,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkClient {
    pub async fn connect(local: SocketAddr, server: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(local).await?);
        info!("Client bound to {}, server at {}", socket.local_addr()?, server);

        let outgoing: Outgoing = Arc::new(Mutex::new(VecDeque::new()));
        let connected = Arc::new(AtomicBool::new(false));
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(run_sender(
                Arc::clone(&socket),
                server,
                Arc::clone(&outgoing),
                Arc::clone(&connected),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_receiver(
                Arc::clone(&socket),
                server,
                incoming_tx,
                shutdown_rx,
            )),
        ];

        Ok(Self {
            socket,
            server,
            outgoing,
            incoming,
            connected,
            slot: None,
            started: Instant::now(),
            shutdown_tx,
            tasks,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    /// Milliseconds since this client started, stamped into `SHIP_MOVE`
    pub fn time_diff(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Queues a message for the next sender tick
    pub fn send(&self, msg: &ClientMessage) -> Result<(), CodecError> {
        let envelope = msg.to_envelope()?;
        push(&self.outgoing, envelope);
        Ok(())
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.incoming.try_recv().ok()
    }

    /// Joins the session, resending `PLAYER_JOIN` until a reply arrives
    ///
    /// Anything the server sends before the reply is dropped.
    pub async fn join(&mut self, name: &str, wait: Duration) -> Result<JoinReply, NetworkError> {
        let request = ClientMessage::PlayerJoin {
            name: name.to_string(),
        };
        let deadline = Instant::now() + wait;

        while Instant::now() < deadline {
            self.send(&request)?;
            let attempt = JOIN_RETRY.min(deadline.saturating_duration_since(Instant::now()));
            let reply = timeout(attempt, async {
                loop {
                    match self.incoming.recv().await {
                        Some(ServerMessage::ReplyPlayerJoin(reply)) => return Some(reply),
                        Some(other) => debug!("Dropping {} received before join", other.command()),
                        None => return None,
                    }
                }
            })
            .await;

            match reply {
                Ok(Some(JoinReply::Rejected)) => return Err(NetworkError::Rejected),
                Ok(Some(reply)) => {
                    if let JoinReply::Accepted { slot, rejoined, .. } = &reply {
                        info!("Joined as slot {} (rejoined: {})", slot, rejoined);
                        self.slot = Some(*slot);
                    }
                    self.connected.store(true, Ordering::Release);
                    return Ok(reply);
                }
                Ok(None) => return Err(NetworkError::Closed),
                Err(_) => debug!("Join attempt timed out, retrying"),
            }
        }
        Err(NetworkError::Timeout(self.server))
    }

    /// Leaves the session if joined, then stops and joins both tasks
    pub async fn shutdown(mut self) {
        if let Some(slot) = self.slot.take() {
            match (ClientMessage::PlayerDc { slot }).to_envelope() {
                Ok(envelope) => push(&self.outgoing, envelope),
                Err(e) => error!("Failed to encode disconnect: {}", e),
            }
        }
        self.connected.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        for task in mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("Network task panicked: {}", e);
            }
        }
        info!("Client network stopped");
    }
}

fn push(outgoing: &Outgoing, envelope: Envelope) {
    match outgoing.lock() {
        Ok(mut queue) => queue.push_back(envelope),
        Err(poisoned) => poisoned.into_inner().push_back(envelope),
    }
}

fn swap_out(outgoing: &Outgoing) -> VecDeque<Envelope> {
    match outgoing.lock() {
        Ok(mut queue) => mem::take(&mut *queue),
        Err(poisoned) => mem::take(&mut *poisoned.into_inner()),
    }
}

async fn flush(socket: &UdpSocket, server: SocketAddr, batch: VecDeque<Envelope>) {
    for envelope in batch {
        if let Err(e) = socket.send_to(&envelope.encode(), server).await {
            error!("Failed to send {}: {}", envelope.command, e);
        }
    }
}

async fn run_sender(
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    outgoing: Outgoing,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(SEND_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_heartbeat = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connected.load(Ordering::Acquire) && last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                    push(&outgoing, Envelope::empty(Command::Heartbeat));
                    last_heartbeat = Instant::now();
                }
                flush(&socket, server, swap_out(&outgoing)).await;
            }
            _ = shutdown.changed() => break,
        }
    }
    flush(&socket, server, swap_out(&outgoing)).await;
}

async fn run_receiver(
    socket: Arc<UdpSocket>,
    server: SocketAddr,
    incoming: mpsc::UnboundedSender<ServerMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = [0u8; 2048];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buffer) => match result {
                Ok((len, from)) => {
                    if from != server {
                        debug!("Ignoring datagram from {}", from);
                        continue;
                    }
                    match ServerMessage::decode(&buffer[..len]) {
                        Ok(msg) => {
                            if incoming.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed datagram from server: {}", e),
                    }
                }
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}
