//! Fixed-slot session registry
//!
//! A session has exactly `MAX_CONNECTION` slots. A slot keeps its ship and
//! score after its player leaves, and the endpoint that last held it can
//! resume it as long as nobody else has claimed it in the meantime.

use crate::outbound::Roster;
use log::info;
use shared::{PlayerSnapshot, ShipState, SlotId, MAX_CONNECTION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("all {0} player slots are taken")]
    Full(usize),
}

/// One player slot
#[derive(Debug, Clone)]
pub struct ClientSlot {
    pub id: SlotId,
    pub addr: SocketAddr,
    pub name: String,
    pub connected: bool,
    pub ship: ShipState,
    /// Last time any valid datagram arrived from `addr`
    pub last_seen: Instant,
}

impl ClientSlot {
    fn new(id: SlotId, addr: SocketAddr, name: String, now: Instant) -> Self {
        Self {
            id,
            addr,
            name,
            connected: true,
            ship: ShipState::default(),
            last_seen: now,
        }
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            slot: self.id,
            ship: self.ship,
        }
    }
}

/// How a join request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A free slot was claimed with a fresh ship
    New(SlotId),
    /// The endpoint resumed the slot it held before, ship and score intact
    Rejoined(SlotId),
    /// The endpoint is already connected; its join was a retransmission
    AlreadyConnected(SlotId),
}

impl JoinOutcome {
    pub fn slot(self) -> SlotId {
        match self {
            JoinOutcome::New(slot)
            | JoinOutcome::Rejoined(slot)
            | JoinOutcome::AlreadyConnected(slot) => slot,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClientManager {
    slots: [Option<ClientSlot>; MAX_CONNECTION],
    /// Endpoint that last held each slot, for rejoins
    known: HashMap<SocketAddr, SlotId>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `addr` to a slot: the one it is already connected to, the one it
    /// held before if still free, or else the first free slot
    pub fn join(
        &mut self,
        addr: SocketAddr,
        name: &str,
        now: Instant,
    ) -> Result<JoinOutcome, RegistryError> {
        if let Some(&id) = self.known.get(&addr) {
            if let Some(slot) = self.slots[id].as_mut().filter(|s| s.addr == addr) {
                slot.last_seen = now;
                if slot.connected {
                    return Ok(JoinOutcome::AlreadyConnected(id));
                }
                slot.connected = true;
                slot.name = name.to_string();
                info!("Client {} resumed slot {} as {}", addr, id, name);
                return Ok(JoinOutcome::Rejoined(id));
            }
        }

        let id = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().map_or(true, |s| !s.connected))
            .ok_or(RegistryError::Full(MAX_CONNECTION))?;

        if let Some(previous) = self.slots[id].take() {
            self.known.remove(&previous.addr);
        }
        self.slots[id] = Some(ClientSlot::new(id, addr, name.to_string(), now));
        self.known.insert(addr, id);
        info!("Client {} joined as {} in slot {}", addr, name, id);
        Ok(JoinOutcome::New(id))
    }

    /// Marks a slot disconnected, keeping its state for a later rejoin
    pub fn leave(&mut self, id: SlotId) -> bool {
        match self.get_mut(id) {
            Some(slot) => {
                slot.connected = false;
                info!("Client {} left slot {}", slot.addr, id);
                true
            }
            None => false,
        }
    }

    /// A connected slot
    pub fn get(&self, id: SlotId) -> Option<&ClientSlot> {
        self.slots.get(id)?.as_ref().filter(|s| s.connected)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut ClientSlot> {
        self.slots.get_mut(id)?.as_mut().filter(|s| s.connected)
    }

    /// The connected slot bound to `addr`
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SlotId> {
        let id = *self.known.get(&addr)?;
        self.get(id).filter(|s| s.addr == addr).map(|s| s.id)
    }

    pub fn touch(&mut self, id: SlotId, now: Instant) {
        if let Some(slot) = self.get_mut(id) {
            slot.last_seen = now;
        }
    }

    /// Disconnects every slot silent for longer than `timeout`
    pub fn check_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<SlotId> {
        let timed_out: Vec<SlotId> = self
            .connected()
            .filter(|slot| slot.is_timed_out(now, timeout))
            .map(|slot| slot.id)
            .collect();

        for &id in &timed_out {
            info!("Client in slot {} timed out", id);
            self.leave(id);
        }
        timed_out
    }

    pub fn connected(&self) -> impl Iterator<Item = &ClientSlot> {
        self.slots.iter().flatten().filter(|s| s.connected)
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }

    pub fn roster(&self) -> Roster {
        let mut roster = [None; MAX_CONNECTION];
        for slot in self.connected() {
            roster[slot.id] = Some(slot.addr);
        }
        roster
    }

    /// Ship snapshots of every connected slot other than `except`
    pub fn snapshots(&self, except: Option<SlotId>) -> Vec<PlayerSnapshot> {
        self.connected()
            .filter(|s| Some(s.id) != except)
            .map(ClientSlot::snapshot)
            .collect()
    }

    /// Puts every connected ship back at the origin with no score
    pub fn reset_ships(&mut self) {
        for slot in self.slots.iter_mut().flatten().filter(|s| s.connected) {
            slot.ship = ShipState::default();
        }
    }

    /// Highest-scoring connected slot; ties go to the lower slot id
    pub fn leader(&self) -> Option<&ClientSlot> {
        self.connected()
            .fold(None, |best: Option<&ClientSlot>, slot| match best {
                Some(b) if b.ship.score >= slot.ship.score => Some(b),
                _ => Some(slot),
            })
    }
}
