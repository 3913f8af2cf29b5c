//! Outbound batching and the broadcaster task
//!
//! The dispatcher pushes [`OutboundMessage`]s onto a shared FIFO with their
//! recipients already resolved against the roster of the moment, so a slot
//! that changes hands before the next flush never receives mail meant for its
//! previous occupant. Every tick the broadcaster swaps the whole queue out
//! under the lock, releases it, and only then sends each message, so the lock
//! is never held across socket I/O.

use log::{debug, error, info};
use shared::envelope::Envelope;
use shared::{SlotId, MAX_CONNECTION};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Endpoint of every connected slot, indexed by slot id
pub type Roster = [Option<SocketAddr>; MAX_CONNECTION];

/// Where a message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every connected slot; relay commands skip the originating slot
    All,
    Slot(SlotId),
    /// An endpoint that holds no slot, e.g. a rejected join
    Endpoint(SocketAddr),
}

impl Destination {
    /// Endpoints addressed under `roster`
    pub fn resolve(self, roster: &Roster, skip: Option<SlotId>) -> Vec<SocketAddr> {
        match self {
            Destination::All => roster
                .iter()
                .enumerate()
                .filter(|(slot, _)| Some(*slot) != skip)
                .filter_map(|(_, addr)| *addr)
                .collect(),
            Destination::Slot(slot) => roster.get(slot).copied().flatten().into_iter().collect(),
            Destination::Endpoint(addr) => vec![addr],
        }
    }
}

/// A message and the endpoints it was addressed to when it was queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipients: Vec<SocketAddr>,
    pub envelope: Envelope,
}

impl OutboundMessage {
    /// Fixes the recipients of `envelope` under `roster`; `origin` is the slot
    /// whose datagram caused it and is skipped by relay commands
    pub fn route(
        destination: Destination,
        origin: Option<SlotId>,
        envelope: Envelope,
        roster: &Roster,
    ) -> Self {
        let skip = if envelope.command.is_relay() {
            origin
        } else {
            None
        };
        Self {
            recipients: destination.resolve(roster, skip),
            envelope,
        }
    }
}

/// Mutex-guarded FIFO shared by the dispatcher and the broadcaster
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    inner: Arc<Mutex<VecDeque<OutboundMessage>>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a VecDeque half-written,
    // so a poisoned queue is still usable
    fn lock(&self) -> MutexGuard<'_, VecDeque<OutboundMessage>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, message: OutboundMessage) {
        self.lock().push_back(message);
    }

    /// Takes everything queued so far, leaving an empty queue behind
    pub fn swap_out(&self) -> VecDeque<OutboundMessage> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Frames and sends one swapped-out batch; returns the number of datagrams sent
pub async fn flush_batch(socket: &UdpSocket, batch: VecDeque<OutboundMessage>) -> usize {
    let mut sent = 0;
    for message in batch {
        let frame = message.envelope.encode();
        for &addr in &message.recipients {
            match socket.send_to(&frame, addr).await {
                Ok(_) => sent += 1,
                Err(e) => error!(
                    "Failed to send {} to {}: {}",
                    message.envelope.command, addr, e
                ),
            }
        }
    }
    sent
}

/// Drains the queue every `tick` until shutdown, then sends what is left
pub async fn run_broadcaster(
    socket: Arc<UdpSocket>,
    queue: OutboundQueue,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let batch = queue.swap_out();
                if batch.is_empty() {
                    continue;
                }
                let sent = flush_batch(&socket, batch).await;
                debug!("Broadcaster sent {} datagrams", sent);
            }
            _ = shutdown.changed() => break,
        }
    }

    let sent = flush_batch(&socket, queue.swap_out()).await;
    info!("Broadcaster stopped after final flush of {} datagrams", sent);
}
