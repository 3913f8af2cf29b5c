//! Server network layer: sockets, task wiring and the dispatcher loop
//!
//! One receiver task per game socket forwards raw datagrams to the main loop,
//! which owns the [`Dispatcher`]. The broadcaster drains the outbound queue on
//! its own tick, and the optional file service runs on a second socket. All
//! of them watch the same shutdown flag and are joined before `run` returns.

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::file_service::{run_file_service, FileService};
use crate::highscores::HighScoreLedger;
use crate::outbound::{run_broadcaster, OutboundQueue};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::transfer::TransferConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// A datagram handed from the receiver task to the main loop
#[derive(Debug)]
pub struct Inbound {
    pub addr: SocketAddr,
    pub data: Vec<u8>,
}

/// Bound sockets plus everything the tasks need; consumed by [`Server::run`]
pub struct Server {
    socket: Arc<UdpSocket>,
    transfer_socket: Option<Arc<UdpSocket>>,
    config: ServerConfig,
    dispatcher: Dispatcher,
    queue: OutboundQueue,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(config.game_addr).await?);
        info!("Game socket listening on {}", socket.local_addr()?);

        let transfer_socket = match config.transfer_addr {
            Some(addr) => {
                let socket = UdpSocket::bind(addr).await?;
                info!("File service listening on {}", socket.local_addr()?);
                Some(Arc::new(socket))
            }
            None => None,
        };

        let ledger = match &config.highscores {
            Some(path) => HighScoreLedger::load(path)?,
            None => HighScoreLedger::in_memory(),
        };

        let queue = OutboundQueue::new();
        let dispatcher = Dispatcher::new(&config, ledger, queue.clone());

        Ok(Server {
            socket,
            transfer_socket,
            config,
            dispatcher,
            queue,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn transfer_addr(&self) -> Option<SocketAddr> {
        self.transfer_socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(
        &self,
        inbound_tx: mpsc::UnboundedSender<Inbound>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let loss_rate = self.config.loss_rate;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buffer) => match result {
                        Ok((len, addr)) => {
                            if loss_rate > 0.0 && rng.gen::<f64>() < loss_rate {
                                debug!("Simulated loss of {} bytes from {}", len, addr);
                                continue;
                            }
                            let data = buffer[..len].to_vec();
                            if inbound_tx.send(Inbound { addr, data }).is_err() {
                                break;
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
        })
    }

    /// Runs until `shutdown` flips to true, then joins every task
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let receiver = self.spawn_network_receiver(inbound_tx, shutdown.clone());

        let broadcaster = tokio::spawn(run_broadcaster(
            Arc::clone(&self.socket),
            self.queue.clone(),
            self.config.tick,
            shutdown.clone(),
        ));

        let file_service = self.transfer_socket.as_ref().map(|socket| {
            let service = FileService::new(self.config.files_dir.clone(), TransferConfig::default());
            tokio::spawn(run_file_service(
                Arc::clone(socket),
                service,
                shutdown.clone(),
            ))
        });

        let mut tick_interval = interval(self.config.tick);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                inbound = inbound_rx.recv() => match inbound {
                    Some(Inbound { addr, data }) => {
                        self.dispatcher.handle_datagram(addr, &data, Instant::now());
                    }
                    None => {
                        warn!("Receiver task ended");
                        break;
                    }
                },
                _ = tick_interval.tick() => self.dispatcher.tick(Instant::now()),
                _ = shutdown.changed() => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        self.dispatcher.persist_scores();

        if let Err(e) = receiver.await {
            error!("Receiver task panicked: {}", e);
        }
        if let Err(e) = broadcaster.await {
            error!("Broadcaster task panicked: {}", e);
        }
        if let Some(handle) = file_service {
            if let Err(e) = handle.await {
                error!("File service task panicked: {}", e);
            }
        }
        info!("Server stopped");
        Ok(())
    }
}
