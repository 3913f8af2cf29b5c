//! Client-side mirror of the shared session
//!
//! The game collaborator owns simulation and drawing; this module keeps the
//! last known state of the other ships and the live asteroids, and turns each
//! server message into the [`RemoteEvent`]s the collaborator should act on.
//! Applying the same message twice produces no second event.

use log::debug;
use shared::ids::BulletIdAllocator;
use shared::messages::{ClientMessage, JoinReply, ServerMessage, ShipMove};
use shared::{
    AsteroidState, HighScoreEntry, Motion, PlayerSnapshot, ShipState, SlotId, Vec2,
    MAX_CONNECTION,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Joined { slot: SlotId, rejoined: bool },
    Rejected,
    PlayerJoined(PlayerSnapshot),
    PlayerLeft(SlotId),
    ShipMoved { slot: SlotId, input: u32, motion: Motion },
    ShipDestroyed { slot: SlotId, asteroid_id: u32 },
    ShipRespawned { slot: SlotId, pos: Vec2 },
    ScoreChanged { slot: SlotId, score: u32 },
    BulletFired { owner: SlotId, bullet_id: u32, motion: Motion },
    BulletHit { owner: SlotId, bullet_id: u32, asteroid_id: u32 },
    AsteroidSpawned(AsteroidState),
    AsteroidMoved(AsteroidState),
    AsteroidDestroyed(u32),
    HighScores(Vec<HighScoreEntry>),
    HighscoreResult { added: bool },
    GameStarted,
    GameOver { winner: Option<SlotId>, name: String, score: u32 },
}

#[derive(Debug, Default)]
pub struct ClientSession {
    slot: Option<SlotId>,
    ships: [Option<ShipState>; MAX_CONNECTION],
    asteroids: HashMap<u32, AsteroidState>,
    bullets: BulletIdAllocator,
    high_scores: Vec<HighScoreEntry>,
    running: bool,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn ship(&self, slot: SlotId) -> Option<&ShipState> {
        self.ships.get(slot).and_then(Option::as_ref)
    }

    /// Every slot known to be connected, this client's own included
    pub fn players(&self) -> impl Iterator<Item = PlayerSnapshot> + '_ {
        self.ships
            .iter()
            .enumerate()
            .filter_map(|(slot, ship)| ship.map(|ship| PlayerSnapshot { slot, ship }))
    }

    pub fn asteroid(&self, id: u32) -> Option<&AsteroidState> {
        self.asteroids.get(&id)
    }

    pub fn asteroid_count(&self) -> usize {
        self.asteroids.len()
    }

    pub fn high_scores(&self) -> &[HighScoreEntry] {
        &self.high_scores
    }

    fn is_self(&self, slot: SlotId) -> bool {
        self.slot == Some(slot)
    }

    fn ship_mut(&mut self, slot: SlotId) -> Option<&mut ShipState> {
        self.ships.get_mut(slot).and_then(Option::as_mut)
    }

    /// Records a player, reporting it only the first time it appears
    fn add_player(&mut self, snapshot: PlayerSnapshot, events: &mut Vec<RemoteEvent>) {
        let Some(entry) = self.ships.get_mut(snapshot.slot) else {
            return;
        };
        let fresh = entry.is_none();
        *entry = Some(snapshot.ship);
        if fresh && !self.is_self(snapshot.slot) {
            events.push(RemoteEvent::PlayerJoined(snapshot));
        }
    }

    fn remove_asteroid(&mut self, id: u32, events: &mut Vec<RemoteEvent>) {
        if self.asteroids.remove(&id).is_some() {
            events.push(RemoteEvent::AsteroidDestroyed(id));
        }
    }

    pub fn apply(&mut self, msg: ServerMessage) -> Vec<RemoteEvent> {
        let mut events = Vec::new();
        match msg {
            ServerMessage::ReplyPlayerJoin(JoinReply::Accepted {
                slot,
                rejoined,
                ship,
                next_bullet_id,
                roster,
            }) => {
                if !self.is_self(slot) {
                    events.push(RemoteEvent::Joined { slot, rejoined });
                }
                self.slot = Some(slot);
                self.ships[slot] = Some(ship);
                if !self.bullets.sync_to(slot, next_bullet_id) {
                    debug!("Bullet id {} is outside slot {}'s ring", next_bullet_id, slot);
                }
                for snapshot in roster {
                    self.add_player(snapshot, &mut events);
                }
            }
            ServerMessage::ReplyPlayerJoin(JoinReply::Rejected) => events.push(RemoteEvent::Rejected),
            ServerMessage::NewPlayerJoin(snapshot) => self.add_player(snapshot, &mut events),
            ServerMessage::StateUpdate(snapshots) => {
                for snapshot in snapshots {
                    if self.is_self(snapshot.slot) {
                        // own motion is simulated locally; only the score is authoritative
                        if let Some(ship) = self.ship_mut(snapshot.slot) {
                            ship.score = snapshot.ship.score;
                        }
                    } else {
                        self.add_player(snapshot, &mut events);
                    }
                }
            }
            ServerMessage::ShipMove(mv) => {
                if self.is_self(mv.slot) {
                    return events;
                }
                if let Some(ship) = self.ship_mut(mv.slot) {
                    ship.motion = mv.motion;
                    events.push(RemoteEvent::ShipMoved {
                        slot: mv.slot,
                        input: mv.input,
                        motion: mv.motion,
                    });
                }
            }
            ServerMessage::ShipCollide { slot, asteroid_id } => {
                if self.asteroids.remove(&asteroid_id).is_some() {
                    events.push(RemoteEvent::ShipDestroyed { slot, asteroid_id });
                    events.push(RemoteEvent::AsteroidDestroyed(asteroid_id));
                }
            }
            ServerMessage::ShipRespawn { slot, pos } => {
                if let Some(ship) = self.ship_mut(slot) {
                    ship.motion.pos = pos;
                    ship.motion.vel = Vec2::ZERO;
                    events.push(RemoteEvent::ShipRespawned { slot, pos });
                }
            }
            ServerMessage::ShipScore { slot, score } => {
                if let Some(ship) = self.ship_mut(slot) {
                    if ship.score != score {
                        ship.score = score;
                        events.push(RemoteEvent::ScoreChanged { slot, score });
                    }
                }
            }
            ServerMessage::BulletCreated {
                owner,
                bullet_id,
                motion,
            } => {
                if !self.is_self(owner) {
                    events.push(RemoteEvent::BulletFired {
                        owner,
                        bullet_id,
                        motion,
                    });
                }
            }
            ServerMessage::BulletCollide {
                owner,
                bullet_id,
                asteroid_id,
            } => {
                if self.asteroids.remove(&asteroid_id).is_some() {
                    events.push(RemoteEvent::BulletHit {
                        owner,
                        bullet_id,
                        asteroid_id,
                    });
                    events.push(RemoteEvent::AsteroidDestroyed(asteroid_id));
                }
            }
            ServerMessage::AsteroidCreated(batch) => {
                for asteroid in batch {
                    if self.asteroids.insert(asteroid.id, asteroid).is_none() {
                        events.push(RemoteEvent::AsteroidSpawned(asteroid));
                    }
                }
            }
            ServerMessage::AsteroidUpdate(asteroid) => {
                // an update for an asteroid already gone must not bring it back
                if let Some(known) = self.asteroids.get_mut(&asteroid.id) {
                    *known = asteroid;
                    events.push(RemoteEvent::AsteroidMoved(asteroid));
                }
            }
            ServerMessage::AsteroidDestroyed { asteroid_id } => {
                self.remove_asteroid(asteroid_id, &mut events);
            }
            ServerMessage::PlayerDc { slot } => {
                if let Some(entry) = self.ships.get_mut(slot) {
                    if entry.take().is_some() {
                        events.push(RemoteEvent::PlayerLeft(slot));
                    }
                }
            }
            ServerMessage::HighScores(entries) => {
                self.high_scores = entries.clone();
                events.push(RemoteEvent::HighScores(entries));
            }
            ServerMessage::HighscoreResult { added } => {
                events.push(RemoteEvent::HighscoreResult { added })
            }
            ServerMessage::GameStart => {
                if !self.running {
                    self.running = true;
                    self.asteroids.clear();
                    self.bullets.reset();
                    for ship in self.ships.iter_mut().flatten() {
                        ship.score = 0;
                    }
                    events.push(RemoteEvent::GameStarted);
                }
            }
            ServerMessage::GameOver {
                winner,
                name,
                score,
            } => {
                if self.running {
                    self.running = false;
                    events.push(RemoteEvent::GameOver {
                        winner,
                        name,
                        score,
                    });
                }
            }
        }
        events
    }

    /// Records the local ship's motion and builds the report for the server
    pub fn ship_moved(&mut self, motion: Motion, input: u32, time_diff: u64) -> Option<ClientMessage> {
        let slot = self.slot?;
        if let Some(ship) = self.ship_mut(slot) {
            ship.motion = motion;
        }
        Some(ClientMessage::ShipMove(ShipMove {
            slot,
            time_diff,
            input,
            motion,
        }))
    }

    /// Takes the next id from this slot's ring for a bullet fired locally
    pub fn fire_bullet(&mut self, motion: Motion) -> Option<(u32, ClientMessage)> {
        let slot = self.slot?;
        let predicted_id = self.bullets.allocate(slot)?;
        Some((
            predicted_id,
            ClientMessage::BulletCreated {
                predicted_id,
                motion,
            },
        ))
    }

    pub fn bullet_hit(&self, bullet_id: u32, asteroid_id: u32) -> ClientMessage {
        ClientMessage::BulletCollide {
            bullet_id,
            asteroid_id,
        }
    }

    pub fn ship_hit(&self, asteroid_id: u32) -> ClientMessage {
        ClientMessage::ShipCollide { asteroid_id }
    }

    pub fn asteroid_moved(&mut self, asteroid: AsteroidState) -> ClientMessage {
        if let Some(known) = self.asteroids.get_mut(&asteroid.id) {
            *known = asteroid;
        }
        ClientMessage::AsteroidUpdate(asteroid)
    }

    pub fn asteroid_left_world(&mut self, asteroid_id: u32) -> ClientMessage {
        self.asteroids.remove(&asteroid_id);
        ClientMessage::AsteroidDestroyed { asteroid_id }
    }

    /// The `NEW_HIGHSCORE` to send after a game `winner` won; the server
    /// records the winner itself, so the winner has nothing to submit
    pub fn submit_score(&self, name: &str, winner: Option<SlotId>) -> Option<ClientMessage> {
        let slot = self.slot?;
        if winner == Some(slot) {
            return None;
        }
        let score = self.ship(slot)?.score;
        Some(ClientMessage::NewHighscore {
            name: name.to_string(),
            score,
        })
    }

    pub fn leave(&self) -> Option<ClientMessage> {
        self.slot.map(|slot| ClientMessage::PlayerDc { slot })
    }
}
