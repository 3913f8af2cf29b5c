//! Command dispatcher and game-state synchronizer
//!
//! Runs in a single task: every decoded datagram and every tick passes through
//! `&mut self`, so the registry and entity arenas need no locking. Results are
//! pushed onto the shared [`OutboundQueue`]. Each handler falls into one of
//! three shapes:
//!
//! - unicast reply to the requester (join reply, high-score list)
//! - relay of a client-simulated change to every other slot (ship movement,
//!   bullet creation, asteroid corrections)
//! - validated transition whose outcome goes to everyone (collisions, game
//!   start and end)
//!
//! Recipients are fixed when a message is queued, from the registry as it
//! stands after the handler's own membership change.

use crate::client_manager::{ClientManager, JoinOutcome};
use crate::config::ServerConfig;
use crate::game::GameState;
use crate::highscores::HighScoreLedger;
use crate::outbound::{Destination, OutboundMessage, OutboundQueue};
use log::{debug, error, info, warn};
use shared::messages::{ClientMessage, JoinReply, ServerMessage, ShipMove};
use shared::{AsteroidState, Motion, PlayerSnapshot, SlotId, Vec2, ASTEROID_SCORE, MAX_CONNECTION};
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Asteroids per catch-up datagram, well under the body limit
const CATCH_UP_BATCH: usize = 32;

pub struct Dispatcher {
    clients: ClientManager,
    game: GameState,
    ledger: HighScoreLedger,
    /// Slots with a high score already recorded since the last game start
    recorded: [bool; MAX_CONNECTION],
    queue: OutboundQueue,
    client_timeout: Duration,
    state_update_interval: Duration,
    last_state_update: Option<Instant>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Dispatcher {
    pub fn new(
        config: &ServerConfig,
        ledger: HighScoreLedger,
        queue: OutboundQueue,
    ) -> Self {
        Self {
            clients: ClientManager::new(),
            game: GameState::new(config.seed, config.asteroid_capacity, config.wave_interval),
            ledger,
            recorded: [false; MAX_CONNECTION],
            queue,
            client_timeout: config.client_timeout,
            state_update_interval: config.state_update_interval,
            last_state_update: None,
        }
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn ledger(&self) -> &HighScoreLedger {
        &self.ledger
    }

    fn enqueue(&self, destination: Destination, origin: Option<SlotId>, msg: ServerMessage) {
        match msg.to_envelope() {
            Ok(envelope) => self.queue.push(OutboundMessage::route(
                destination,
                origin,
                envelope,
                &self.clients.roster(),
            )),
            Err(e) => error!("Failed to encode {}: {}", msg.command(), e),
        }
    }

    fn broadcast(&self, msg: ServerMessage, origin: Option<SlotId>) {
        self.enqueue(Destination::All, origin, msg);
    }

    fn unicast(&self, slot: SlotId, msg: ServerMessage) {
        self.enqueue(Destination::Slot(slot), None, msg);
    }

    /// Decodes and handles one datagram; malformed input is logged and dropped
    pub fn handle_datagram(&mut self, addr: SocketAddr, datagram: &[u8], now: Instant) {
        match ClientMessage::decode(datagram) {
            Ok(msg) => self.handle_message(addr, msg, now),
            Err(e) => warn!("Dropping malformed datagram from {}: {}", addr, e),
        }
    }

    pub fn handle_message(&mut self, addr: SocketAddr, msg: ClientMessage, now: Instant) {
        if let ClientMessage::PlayerJoin { name } = &msg {
            self.on_join(addr, name, now);
            return;
        }

        let Some(slot) = self.clients.find_by_addr(addr) else {
            debug!("Ignoring {} from unknown endpoint {}", msg.command(), addr);
            return;
        };
        self.clients.touch(slot, now);

        match msg {
            ClientMessage::PlayerJoin { .. } | ClientMessage::Heartbeat => {}
            ClientMessage::PlayerDc { slot: claimed } => {
                if claimed == slot {
                    self.disconnect(slot);
                } else {
                    warn!("Slot {} tried to disconnect slot {}", slot, claimed);
                }
            }
            ClientMessage::ShipMove(mv) => self.on_ship_move(slot, mv),
            ClientMessage::BulletCreated {
                predicted_id,
                motion,
            } => self.on_bullet_created(slot, predicted_id, motion),
            ClientMessage::BulletCollide {
                bullet_id,
                asteroid_id,
            } => self.on_bullet_collide(slot, bullet_id, asteroid_id),
            ClientMessage::ShipCollide { asteroid_id } => self.on_ship_collide(slot, asteroid_id),
            ClientMessage::AsteroidUpdate(asteroid) => self.on_asteroid_update(slot, asteroid),
            ClientMessage::AsteroidDestroyed { asteroid_id } => {
                if self.game.asteroids.deactivate(asteroid_id) {
                    self.broadcast(ServerMessage::AsteroidDestroyed { asteroid_id }, None);
                    self.check_game_over();
                }
            }
            ClientMessage::ClientReqHighscore => {
                self.unicast(slot, ServerMessage::HighScores(self.ledger.entries().to_vec()));
            }
            ClientMessage::NewHighscore { name, score } => {
                let added = if self.recorded[slot] {
                    debug!("Slot {} already has a high score from this game", slot);
                    false
                } else {
                    self.ledger.try_insert(&name, score, unix_now())
                };
                self.recorded[slot] |= added;
                self.unicast(slot, ServerMessage::HighscoreResult { added });
                if added {
                    self.broadcast(ServerMessage::HighScores(self.ledger.entries().to_vec()), None);
                }
            }
            ClientMessage::GameStart => self.on_game_start(slot, now),
        }
    }

    fn on_join(&mut self, addr: SocketAddr, name: &str, now: Instant) {
        let outcome = match self.clients.join(addr, name, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                info!("Rejecting join from {}: {}", addr, e);
                self.enqueue(
                    Destination::Endpoint(addr),
                    None,
                    ServerMessage::ReplyPlayerJoin(JoinReply::Rejected),
                );
                return;
            }
        };

        let slot = outcome.slot();
        if matches!(outcome, JoinOutcome::New(_)) {
            self.recorded[slot] = false;
        }
        let Some(ship) = self.clients.get(slot).map(|s| s.ship) else {
            return;
        };

        let reply = JoinReply::Accepted {
            slot,
            rejoined: matches!(outcome, JoinOutcome::Rejoined(_)),
            ship,
            next_bullet_id: self.game.bullets.next_id(slot).unwrap_or_default(),
            roster: self.clients.snapshots(Some(slot)),
        };
        self.unicast(slot, ServerMessage::ReplyPlayerJoin(reply));

        if !matches!(outcome, JoinOutcome::AlreadyConnected(_)) {
            let snapshot = PlayerSnapshot { slot, ship };
            self.broadcast(ServerMessage::NewPlayerJoin(snapshot), Some(slot));
            if self.game.is_running() {
                self.catch_up(slot);
            }
        }
    }

    /// Brings a player who joined mid-game into the running session: the
    /// start notice, the scores it would otherwise reset, and every live asteroid
    fn catch_up(&self, slot: SlotId) {
        self.unicast(slot, ServerMessage::GameStart);
        self.unicast(slot, ServerMessage::StateUpdate(self.clients.snapshots(None)));
        let asteroids: Vec<AsteroidState> =
            self.game.asteroids.active().map(|a| a.state()).collect();
        for batch in asteroids.chunks(CATCH_UP_BATCH) {
            self.unicast(slot, ServerMessage::AsteroidCreated(batch.to_vec()));
        }
    }

    /// Frees a slot the same way whether the player left or went silent
    fn disconnect(&mut self, slot: SlotId) {
        if self.clients.leave(slot) {
            self.release(slot);
        }
    }

    /// Cleans up after a slot the registry has already marked disconnected
    fn release(&mut self, slot: SlotId) {
        let cleared = self.game.bullets.clear_owner(slot);
        debug!("Cleared {} bullets of slot {}", cleared, slot);
        self.broadcast(ServerMessage::PlayerDc { slot }, None);
    }

    fn on_ship_move(&mut self, slot: SlotId, mv: ShipMove) {
        if mv.slot != slot {
            warn!("Slot {} sent a move for slot {}", slot, mv.slot);
            return;
        }
        if let Some(client) = self.clients.get_mut(slot) {
            client.ship.motion = mv.motion;
        }
        self.broadcast(ServerMessage::ShipMove(mv), Some(slot));
    }

    fn on_bullet_created(&mut self, slot: SlotId, predicted_id: u32, motion: Motion) {
        let bullet_id = match self.game.bullets.spawn(slot, motion) {
            Ok(id) => id,
            Err(e) => {
                warn!("Bullet from slot {} refused: {}", slot, e);
                return;
            }
        };
        if bullet_id != predicted_id {
            debug!(
                "Slot {} predicted bullet {} but was assigned {}",
                slot, predicted_id, bullet_id
            );
        }
        self.broadcast(
            ServerMessage::BulletCreated {
                owner: slot,
                bullet_id,
                motion,
            },
            Some(slot),
        );
    }

    fn on_bullet_collide(&mut self, reporter: SlotId, bullet_id: u32, asteroid_id: u32) {
        if !self.game.is_running() {
            debug!("Ignoring bullet collision outside a running game");
            return;
        }
        let Some(owner) = self.game.bullets.get(bullet_id).map(|b| b.owner) else {
            debug!("Slot {} reported stale bullet {}", reporter, bullet_id);
            return;
        };
        if !self.game.asteroids.deactivate(asteroid_id) {
            debug!("Slot {} reported stale asteroid {}", reporter, asteroid_id);
            return;
        }
        self.game.bullets.deactivate(bullet_id);

        self.broadcast(
            ServerMessage::BulletCollide {
                owner,
                bullet_id,
                asteroid_id,
            },
            None,
        );
        if let Some(client) = self.clients.get_mut(owner) {
            client.ship.score += ASTEROID_SCORE;
            let score = client.ship.score;
            self.broadcast(ServerMessage::ShipScore { slot: owner, score }, None);
        }
        self.check_game_over();
    }

    fn on_ship_collide(&mut self, slot: SlotId, asteroid_id: u32) {
        if !self.game.is_running() || !self.game.asteroids.deactivate(asteroid_id) {
            return;
        }
        if let Some(client) = self.clients.get_mut(slot) {
            client.ship.respawn();
        }
        self.broadcast(ServerMessage::ShipCollide { slot, asteroid_id }, None);
        self.broadcast(
            ServerMessage::ShipRespawn {
                slot,
                pos: Vec2::ZERO,
            },
            None,
        );
        self.check_game_over();
    }

    fn on_asteroid_update(&mut self, slot: SlotId, asteroid: AsteroidState) {
        if self.game.asteroids.update(asteroid.id, asteroid.motion) {
            self.broadcast(ServerMessage::AsteroidUpdate(asteroid), Some(slot));
        }
    }

    fn on_game_start(&mut self, slot: SlotId, now: Instant) {
        if self.game.is_running() {
            debug!("Slot {} asked to start a game already running", slot);
            return;
        }
        self.game.start(now);
        self.clients.reset_ships();
        self.recorded = [false; MAX_CONNECTION];
        self.broadcast(ServerMessage::GameStart, None);
        self.spawn_due_wave(now);
    }

    fn spawn_due_wave(&mut self, now: Instant) {
        let batch = self.game.due_wave(now);
        if !batch.is_empty() {
            self.broadcast(ServerMessage::AsteroidCreated(batch), None);
        }
    }

    fn check_game_over(&mut self) {
        if !self.game.check_game_over() {
            return;
        }
        let (winner, name, score) = match self.clients.leader() {
            Some(leader) => (Some(leader.id), leader.name.clone(), leader.ship.score),
            None => (None, String::new(), 0),
        };
        if let Some(slot) = winner.filter(|_| score > 0) {
            self.recorded[slot] = self.ledger.try_insert(&name, score, unix_now());
        }
        info!("Winner: {:?} {} with {}", winner, name, score);
        self.broadcast(
            ServerMessage::GameOver {
                winner,
                name,
                score,
            },
            None,
        );
        self.broadcast(ServerMessage::HighScores(self.ledger.entries().to_vec()), None);
    }

    /// Disconnects every slot that has gone quiet for too long
    pub fn expire_idle(&mut self, now: Instant) {
        for slot in self.clients.check_timeouts(now, self.client_timeout) {
            warn!("Slot {} timed out", slot);
            self.release(slot);
        }
    }

    /// Queues the periodic ship snapshot when at least two players can use it
    pub fn broadcast_state(&mut self, now: Instant) {
        let due = self
            .last_state_update
            .map_or(true, |last| now.duration_since(last) >= self.state_update_interval);
        if !due || self.clients.connected_count() < 2 {
            return;
        }
        self.last_state_update = Some(now);
        self.broadcast(ServerMessage::StateUpdate(self.clients.snapshots(None)), None);
    }

    /// Periodic work: liveness, waves, state snapshots
    pub fn tick(&mut self, now: Instant) {
        self.expire_idle(now);
        self.spawn_due_wave(now);
        self.check_game_over();
        self.broadcast_state(now);
    }

    pub fn persist_scores(&self) {
        if let Err(e) = self.ledger.persist() {
            error!("Failed to save high scores: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Phase;
    use shared::command::Command;
    use shared::ids::bullet_range;
    use shared::ShipState;

    struct Harness {
        dispatcher: Dispatcher,
        queue: OutboundQueue,
        now: Instant,
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    const A: u16 = 4001;
    const B: u16 = 4002;

    impl Harness {
        fn with_config(config: ServerConfig) -> Self {
            let queue = OutboundQueue::new();
            let dispatcher = Dispatcher::new(&config, HighScoreLedger::in_memory(), queue.clone());
            Self {
                dispatcher,
                queue,
                now: Instant::now(),
            }
        }

        fn new() -> Self {
            Self::with_config(ServerConfig::default())
        }

        fn send(&mut self, port: u16, msg: ClientMessage) {
            let frame = msg.to_envelope().unwrap().encode();
            self.dispatcher.handle_datagram(addr(port), &frame, self.now);
        }

        fn join(&mut self, port: u16) {
            self.send(
                port,
                ClientMessage::PlayerJoin {
                    name: format!("p{}", port),
                },
            );
        }

        /// Everything queued so far, resolved to the endpoints it reaches
        fn drain(&mut self) -> Vec<(SocketAddr, ServerMessage)> {
            let mut out = Vec::new();
            for msg in self.queue.swap_out() {
                let decoded = ServerMessage::from_envelope(&msg.envelope).unwrap();
                for &to in &msg.recipients {
                    out.push((to, decoded.clone()));
                }
            }
            out
        }

        fn start_game_with_waves(&mut self, port: u16, waves: u32) {
            self.send(port, ClientMessage::GameStart);
            for _ in 1..waves {
                self.now += Duration::from_secs(4);
                self.dispatcher.tick(self.now);
            }
            self.drain();
        }
    }

    fn to(out: &[(SocketAddr, ServerMessage)], port: u16) -> Vec<ServerMessage> {
        out.iter()
            .filter(|(a, _)| *a == addr(port))
            .map(|(_, m)| m.clone())
            .collect()
    }

    #[test]
    fn test_first_join_gets_slot_zero_and_empty_roster() {
        let mut h = Harness::new();
        h.join(A);
        let out = h.drain();

        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0],
            (
                addr(A),
                ServerMessage::ReplyPlayerJoin(JoinReply::Accepted {
                    slot: 0,
                    rejoined: false,
                    ship: ShipState::default(),
                    next_bullet_id: 100,
                    roster: vec![],
                })
            )
        );
    }

    #[test]
    fn test_second_join_sees_first_and_is_announced() {
        let mut h = Harness::new();
        h.join(A);
        h.drain();
        h.join(B);
        let out = h.drain();

        match to(&out, B).as_slice() {
            [ServerMessage::ReplyPlayerJoin(JoinReply::Accepted { slot, roster, .. })] => {
                assert_eq!(*slot, 1);
                assert_eq!(
                    roster,
                    &vec![PlayerSnapshot {
                        slot: 0,
                        ship: ShipState::default()
                    }]
                );
            }
            other => panic!("unexpected messages for B: {:?}", other),
        }
        assert_eq!(
            to(&out, A),
            vec![ServerMessage::NewPlayerJoin(PlayerSnapshot {
                slot: 1,
                ship: ShipState::default()
            })]
        );
    }

    #[test]
    fn test_full_registry_replies_with_rejection() {
        let mut h = Harness::new();
        for port in 0..MAX_CONNECTION as u16 {
            h.join(5000 + port);
        }
        h.drain();
        h.join(6000);
        let out = h.drain();
        assert_eq!(
            out,
            vec![(
                addr(6000),
                ServerMessage::ReplyPlayerJoin(JoinReply::Rejected)
            )]
        );
    }

    #[test]
    fn test_retransmitted_join_is_not_reannounced() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.drain();
        h.join(B);
        let out = h.drain();
        assert!(to(&out, A).is_empty());
        assert_eq!(to(&out, B).len(), 1);
    }

    #[test]
    fn test_bullet_relayed_to_others_only() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.drain();

        h.send(
            A,
            ClientMessage::BulletCreated {
                predicted_id: 100,
                motion: Motion::default(),
            },
        );
        let out = h.drain();
        assert!(to(&out, A).is_empty());
        match to(&out, B).as_slice() {
            [ServerMessage::BulletCreated {
                owner, bullet_id, ..
            }] => {
                assert_eq!(*owner, 0);
                assert!(bullet_range(0).unwrap().contains(bullet_id));
            }
            other => panic!("unexpected messages for B: {:?}", other),
        }
    }

    #[test]
    fn test_bullet_hit_scores_and_broadcasts_to_all() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.start_game_with_waves(A, 2);
        assert!(h.dispatcher.game().asteroids.is_active(7));

        h.send(
            A,
            ClientMessage::BulletCreated {
                predicted_id: 100,
                motion: Motion::default(),
            },
        );
        h.drain();
        h.send(
            A,
            ClientMessage::BulletCollide {
                bullet_id: 100,
                asteroid_id: 7,
            },
        );
        let out = h.drain();

        let hit = ServerMessage::BulletCollide {
            owner: 0,
            bullet_id: 100,
            asteroid_id: 7,
        };
        let score = ServerMessage::ShipScore { slot: 0, score: 100 };
        assert_eq!(to(&out, A), vec![hit.clone(), score.clone()]);
        assert_eq!(to(&out, B), vec![hit, score]);
        assert!(!h.dispatcher.game().asteroids.is_active(7));
        assert_eq!(h.dispatcher.clients().get(0).unwrap().ship.score, 100);

        // The other client reporting the same hit changes nothing
        h.send(
            B,
            ClientMessage::BulletCollide {
                bullet_id: 100,
                asteroid_id: 7,
            },
        );
        assert!(h.drain().is_empty());
        assert_eq!(h.dispatcher.clients().get(0).unwrap().ship.score, 100);
    }

    #[test]
    fn test_ship_collision_respawns() {
        let mut h = Harness::new();
        h.join(A);
        h.start_game_with_waves(A, 1);
        let mut mv = ShipMove {
            slot: 0,
            time_diff: 10,
            input: 0,
            motion: Motion::default(),
        };
        mv.motion.pos = Vec2::new(50.0, 60.0);
        h.send(A, ClientMessage::ShipMove(mv));
        h.send(A, ClientMessage::ShipCollide { asteroid_id: 2 });
        let out = h.drain();

        assert_eq!(
            to(&out, A),
            vec![
                ServerMessage::ShipCollide {
                    slot: 0,
                    asteroid_id: 2
                },
                ServerMessage::ShipRespawn {
                    slot: 0,
                    pos: Vec2::ZERO
                },
            ]
        );
        assert_eq!(h.dispatcher.clients().get(0).unwrap().ship.motion.pos, Vec2::ZERO);
    }

    #[test]
    fn test_destroying_inactive_asteroid_is_noop() {
        let mut h = Harness::new();
        h.join(A);
        h.start_game_with_waves(A, 1);
        h.send(A, ClientMessage::AsteroidDestroyed { asteroid_id: 1 });
        assert_eq!(h.drain().len(), 1);
        h.send(A, ClientMessage::AsteroidDestroyed { asteroid_id: 1 });
        h.send(A, ClientMessage::AsteroidDestroyed { asteroid_id: 49 });
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_game_over_once_with_leader_and_scores() {
        let config = ServerConfig {
            asteroid_capacity: 4,
            ..ServerConfig::default()
        };
        let mut h = Harness::with_config(config);
        h.join(A);
        h.join(B);
        h.start_game_with_waves(B, 1);
        assert!(h.dispatcher.game().asteroids.is_saturated());

        // B scores twice, A once
        for (port, asteroid_id) in [(B, 0), (B, 1), (A, 2)] {
            h.send(
                port,
                ClientMessage::BulletCreated {
                    predicted_id: 0,
                    motion: Motion::default(),
                },
            );
            let bullet_id = match port {
                A => 100,
                _ => 200 + asteroid_id,
            };
            h.send(
                port,
                ClientMessage::BulletCollide {
                    bullet_id,
                    asteroid_id,
                },
            );
        }
        let out = to(&h.drain(), A);

        let overs: Vec<&ServerMessage> = out
            .iter()
            .filter(|m| m.command() == Command::GameOver)
            .collect();
        assert_eq!(
            overs,
            vec![&ServerMessage::GameOver {
                winner: Some(1),
                name: format!("p{}", B),
                score: 200,
            }]
        );
        match out.last() {
            Some(ServerMessage::HighScores(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].score, 200);
            }
            other => panic!("expected high scores last, got {:?}", other),
        }
        assert_eq!(h.dispatcher.game().phase, Phase::Over);

        // The last asteroid going away does not end the game twice
        h.send(A, ClientMessage::AsteroidDestroyed { asteroid_id: 3 });
        let out = h.drain();
        assert!(out.iter().all(|(_, m)| m.command() != Command::GameOver));
    }

    #[test]
    fn test_late_joiner_catches_up_with_running_game() {
        const C: u16 = 4003;
        let mut h = Harness::new();
        h.join(A);
        h.start_game_with_waves(A, 1);
        h.send(
            A,
            ClientMessage::BulletCreated {
                predicted_id: 0,
                motion: Motion::default(),
            },
        );
        h.send(
            A,
            ClientMessage::BulletCollide {
                bullet_id: 100,
                asteroid_id: 0,
            },
        );
        h.drain();

        h.join(C);
        let out = to(&h.drain(), C);
        assert_eq!(out.len(), 4);
        assert!(matches!(out[0], ServerMessage::ReplyPlayerJoin(JoinReply::Accepted { slot: 1, .. })));
        assert_eq!(out[1], ServerMessage::GameStart);
        match &out[2] {
            ServerMessage::StateUpdate(players) => {
                let scores: Vec<(SlotId, u32)> =
                    players.iter().map(|p| (p.slot, p.ship.score)).collect();
                assert_eq!(scores, vec![(0, ASTEROID_SCORE), (1, 0)]);
            }
            other => panic!("expected state update, got {:?}", other),
        }
        match &out[3] {
            ServerMessage::AsteroidCreated(batch) => {
                let ids: Vec<u32> = batch.iter().map(|a| a.id).collect();
                assert_eq!(ids, vec![1, 2, 3]);
            }
            other => panic!("expected asteroid batch, got {:?}", other),
        }

        // A lobby join gets no catch-up
        let mut h = Harness::new();
        h.join(A);
        assert_eq!(to(&h.drain(), A).len(), 1);
    }

    #[test]
    fn test_winner_resubmission_is_not_recorded_twice() {
        let config = ServerConfig {
            asteroid_capacity: 4,
            ..ServerConfig::default()
        };
        let mut h = Harness::with_config(config);
        h.join(A);
        h.join(B);
        h.start_game_with_waves(A, 1);

        for asteroid_id in 0..3 {
            h.send(
                A,
                ClientMessage::BulletCreated {
                    predicted_id: 0,
                    motion: Motion::default(),
                },
            );
            h.send(
                A,
                ClientMessage::BulletCollide {
                    bullet_id: 100 + asteroid_id,
                    asteroid_id,
                },
            );
        }
        assert_eq!(h.dispatcher.game().phase, Phase::Over);
        assert_eq!(h.dispatcher.ledger().entries().len(), 1);
        h.drain();

        let submit = ClientMessage::NewHighscore {
            name: format!("p{}", A),
            score: 300,
        };
        h.send(A, submit.clone());
        assert_eq!(
            to(&h.drain(), A),
            vec![ServerMessage::HighscoreResult { added: false }]
        );
        assert_eq!(h.dispatcher.ledger().entries().len(), 1);

        // The loser still gets one entry of their own
        h.send(
            B,
            ClientMessage::NewHighscore {
                name: format!("p{}", B),
                score: 50,
            },
        );
        h.send(
            B,
            ClientMessage::NewHighscore {
                name: format!("p{}", B),
                score: 50,
            },
        );
        let results: Vec<ServerMessage> = to(&h.drain(), B)
            .into_iter()
            .filter(|m| m.command() == Command::NewHighscore)
            .collect();
        assert_eq!(
            results,
            vec![
                ServerMessage::HighscoreResult { added: true },
                ServerMessage::HighscoreResult { added: false },
            ]
        );
        assert_eq!(h.dispatcher.ledger().entries().len(), 2);

        // A new game opens the ledger again
        h.send(A, ClientMessage::GameStart);
        h.send(A, submit);
        assert!(to(&h.drain(), A).contains(&ServerMessage::HighscoreResult { added: true }));
    }

    #[test]
    fn test_disconnect_only_from_owner() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.drain();

        h.send(B, ClientMessage::PlayerDc { slot: 0 });
        assert!(h.drain().is_empty());
        assert!(h.dispatcher.clients().get(0).is_some());

        h.send(A, ClientMessage::PlayerDc { slot: 0 });
        let out = h.drain();
        assert_eq!(out, vec![(addr(B), ServerMessage::PlayerDc { slot: 0 })]);
        assert!(h.dispatcher.clients().get(0).is_none());
    }

    #[test]
    fn test_slot_taken_over_before_flush_keeps_old_mail() {
        const C: u16 = 4003;
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.drain();

        h.send(A, ClientMessage::ClientReqHighscore);
        h.send(A, ClientMessage::PlayerDc { slot: 0 });
        h.join(C);
        assert_eq!(h.dispatcher.clients().find_by_addr(addr(C)), Some(0));

        let out = h.drain();
        assert_eq!(to(&out, A), vec![ServerMessage::HighScores(vec![])]);
        assert_eq!(
            to(&out, B),
            vec![
                ServerMessage::PlayerDc { slot: 0 },
                ServerMessage::NewPlayerJoin(PlayerSnapshot {
                    slot: 0,
                    ship: ShipState::default(),
                }),
            ]
        );
        let for_c = to(&out, C);
        assert_eq!(for_c.len(), 1);
        assert!(matches!(
            for_c[0],
            ServerMessage::ReplyPlayerJoin(JoinReply::Accepted { slot: 0, .. })
        ));
    }

    #[test]
    fn test_rejoin_resumes_slot() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.start_game_with_waves(A, 1);
        h.send(
            A,
            ClientMessage::BulletCreated {
                predicted_id: 100,
                motion: Motion::default(),
            },
        );
        h.send(
            A,
            ClientMessage::BulletCollide {
                bullet_id: 100,
                asteroid_id: 0,
            },
        );
        h.send(A, ClientMessage::PlayerDc { slot: 0 });
        h.drain();

        h.join(A);
        let out = h.drain();
        match to(&out, A).as_slice() {
            [ServerMessage::ReplyPlayerJoin(JoinReply::Accepted {
                slot,
                rejoined,
                ship,
                next_bullet_id,
                ..
            })] => {
                assert_eq!(*slot, 0);
                assert!(*rejoined);
                assert_eq!(ship.score, 100);
                assert_eq!(*next_bullet_id, 101);
            }
            other => panic!("unexpected messages for A: {:?}", other),
        }
        assert_eq!(to(&out, B).len(), 1);
    }

    #[test]
    fn test_unknown_endpoint_and_garbage_are_dropped() {
        let mut h = Harness::new();
        h.send(A, ClientMessage::GameStart);
        h.dispatcher.handle_datagram(addr(A), &[0xEE, 0, 0], h.now);
        h.dispatcher.handle_datagram(addr(A), &[], h.now);
        assert!(h.drain().is_empty());
        assert_eq!(h.dispatcher.game().phase, Phase::Lobby);
    }

    #[test]
    fn test_idle_slot_times_out() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.drain();

        h.now += Duration::from_secs(6);
        h.send(B, ClientMessage::Heartbeat);
        h.now += Duration::from_secs(5);
        h.dispatcher.tick(h.now);

        let out = h.drain();
        assert_eq!(to(&out, B), vec![ServerMessage::PlayerDc { slot: 0 }]);
        assert_eq!(h.dispatcher.clients().connected_count(), 1);
    }

    #[test]
    fn test_state_update_needs_two_players() {
        let mut h = Harness::new();
        h.join(A);
        h.drain();
        h.dispatcher.tick(h.now);
        assert!(h.drain().is_empty());

        h.join(B);
        h.drain();
        h.dispatcher.tick(h.now);
        let out = h.drain();
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0].1, ServerMessage::StateUpdate(players) if players.len() == 2));

        // Not again until the interval has passed
        h.dispatcher.tick(h.now + Duration::from_millis(50));
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_highscore_submission() {
        let mut h = Harness::new();
        h.join(A);
        h.join(B);
        h.drain();
        h.send(
            A,
            ClientMessage::NewHighscore {
                name: "ace".into(),
                score: 1200,
            },
        );
        let out = h.drain();
        let for_a = to(&out, A);
        assert_eq!(for_a[0], ServerMessage::HighscoreResult { added: true });
        assert!(matches!(&for_a[1], ServerMessage::HighScores(e) if e[0].score == 1200));
        assert_eq!(to(&out, B).len(), 1);

        h.send(B, ClientMessage::ClientReqHighscore);
        let out = h.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, addr(B));
    }
}
