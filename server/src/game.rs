//! Game session rules: phases, asteroid waves and the end-of-game condition
//!
//! Ships and scores live in the registry; this module owns the entity arenas
//! and decides when waves spawn and when the game is over.

use crate::entities::{AsteroidPool, BulletTable};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{AsteroidState, Motion, Vec2, ASTEROID_SPEED, WORLD_HEIGHT, WORLD_WIDTH};
use std::time::{Duration, Instant};

/// Asteroids per wave, one per screen edge
pub const WAVE_SIZE: usize = 4;
/// Radius around the centre that wave asteroids aim at
const AIM_SPREAD: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Running,
    Over,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

const EDGES: [Edge; WAVE_SIZE] = [Edge::Top, Edge::Bottom, Edge::Left, Edge::Right];

pub struct GameState {
    pub phase: Phase,
    pub asteroids: AsteroidPool,
    pub bullets: BulletTable,
    rng: StdRng,
    wave_interval: Duration,
    next_wave: Option<Instant>,
}

impl GameState {
    pub fn new(seed: u64, asteroid_capacity: usize, wave_interval: Duration) -> Self {
        Self {
            phase: Phase::Lobby,
            asteroids: AsteroidPool::with_capacity(asteroid_capacity),
            bullets: BulletTable::new(),
            rng: StdRng::seed_from_u64(seed),
            wave_interval,
            next_wave: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Clears every entity and starts a game whose first wave is due at `now`
    pub fn start(&mut self, now: Instant) {
        self.asteroids.reset();
        self.bullets.reset();
        self.phase = Phase::Running;
        self.next_wave = Some(now);
        info!("Game started");
    }

    /// Spawns a wave if one is due; an empty result means nothing spawned
    pub fn due_wave(&mut self, now: Instant) -> Vec<AsteroidState> {
        match self.next_wave {
            Some(due) if self.is_running() && now >= due => {
                self.next_wave = Some(now + self.wave_interval);
                self.spawn_wave(now)
            }
            _ => Vec::new(),
        }
    }

    /// One asteroid per edge while the pool has headroom
    pub fn spawn_wave(&mut self, now: Instant) -> Vec<AsteroidState> {
        let mut batch = Vec::with_capacity(WAVE_SIZE);
        for edge in EDGES {
            let motion = self.edge_motion(edge);
            match self.asteroids.allocate(motion, now) {
                Ok(id) => batch.push(AsteroidState { id, motion }),
                Err(e) => {
                    debug!("Wave cut short: {}", e);
                    break;
                }
            }
        }
        if !batch.is_empty() {
            debug!(
                "Spawned wave of {} asteroids, {} ids left",
                batch.len(),
                self.asteroids.headroom()
            );
        }
        batch
    }

    fn edge_motion(&mut self, edge: Edge) -> Motion {
        let half_w = WORLD_WIDTH / 2.0;
        let half_h = WORLD_HEIGHT / 2.0;
        let pos = match edge {
            Edge::Top => Vec2::new(self.rng.gen_range(-half_w..half_w), half_h),
            Edge::Bottom => Vec2::new(self.rng.gen_range(-half_w..half_w), -half_h),
            Edge::Left => Vec2::new(-half_w, self.rng.gen_range(-half_h..half_h)),
            Edge::Right => Vec2::new(half_w, self.rng.gen_range(-half_h..half_h)),
        };
        let target = Vec2::new(
            self.rng.gen_range(-AIM_SPREAD..AIM_SPREAD),
            self.rng.gen_range(-AIM_SPREAD..AIM_SPREAD),
        );
        let vel = Vec2::new(target.x - pos.x, target.y - pos.y)
            .normalized()
            .scaled(ASTEROID_SPEED);
        Motion {
            pos,
            vel,
            dir: vel.y.atan2(vel.x),
        }
    }

    /// Moves to `Over` exactly once, when every asteroid has been issued and
    /// at most one is still alive
    pub fn check_game_over(&mut self) -> bool {
        if self.is_running() && self.asteroids.is_saturated() && self.asteroids.active_count() <= 1
        {
            self.phase = Phase::Over;
            self.next_wave = None;
            info!("Game over");
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::MAX_ASTEROIDS;

    fn game() -> GameState {
        GameState::new(7, MAX_ASTEROIDS, Duration::from_secs(4))
    }

    #[test]
    fn test_no_waves_in_lobby() {
        let mut game = game();
        assert!(game.due_wave(Instant::now()).is_empty());
        assert_eq!(game.phase, Phase::Lobby);
    }

    #[test]
    fn test_first_wave_immediately_then_on_interval() {
        let start = Instant::now();
        let mut game = game();
        game.start(start);

        let wave = game.due_wave(start);
        assert_eq!(wave.len(), WAVE_SIZE);
        assert!(game.due_wave(start + Duration::from_secs(3)).is_empty());
        assert_eq!(game.due_wave(start + Duration::from_secs(4)).len(), WAVE_SIZE);
        assert_eq!(game.asteroids.active_count(), 2 * WAVE_SIZE);
    }

    #[test]
    fn test_wave_starts_on_edges_and_moves_inward() {
        let mut game = game();
        game.start(Instant::now());
        for asteroid in game.spawn_wave(Instant::now()) {
            let m = asteroid.motion;
            let on_edge = m.pos.x.abs() == WORLD_WIDTH / 2.0 || m.pos.y.abs() == WORLD_HEIGHT / 2.0;
            assert!(on_edge, "{:?} not on an edge", m.pos);
            assert_approx_eq!(m.vel.length(), ASTEROID_SPEED, 1e-3);
            // Heading towards the centre
            assert!(m.pos.x * m.vel.x + m.pos.y * m.vel.y < 0.0);
        }
    }

    #[test]
    fn test_same_seed_same_waves() {
        let now = Instant::now();
        let mut a = game();
        let mut b = game();
        a.start(now);
        b.start(now);
        assert_eq!(a.spawn_wave(now), b.spawn_wave(now));
    }

    #[test]
    fn test_wave_truncated_by_pool() {
        let now = Instant::now();
        let mut game = GameState::new(1, 6, Duration::from_secs(4));
        game.start(now);
        assert_eq!(game.spawn_wave(now).len(), 4);
        assert_eq!(game.spawn_wave(now).len(), 2);
        assert!(game.spawn_wave(now).is_empty());
    }

    #[test]
    fn test_game_over_fires_once() {
        let now = Instant::now();
        let mut game = GameState::new(1, 4, Duration::from_secs(4));
        game.start(now);
        game.spawn_wave(now);
        assert!(!game.check_game_over());

        for id in 0..3 {
            game.asteroids.deactivate(id);
        }
        assert!(game.check_game_over());
        assert_eq!(game.phase, Phase::Over);
        assert!(!game.check_game_over());
    }

    #[test]
    fn test_restart_resets_pool() {
        let now = Instant::now();
        let mut game = GameState::new(1, 4, Duration::from_secs(4));
        game.start(now);
        game.spawn_wave(now);
        game.bullets.spawn(0, Motion::default()).unwrap();
        game.start(now);
        assert_eq!(game.asteroids.active_count(), 0);
        assert_eq!(game.bullets.active_count(), 0);
        assert_eq!(game.asteroids.headroom(), 4);
    }
}
