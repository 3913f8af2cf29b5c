//! Protocol types shared by the asteroids session server and its clients
//!
//! Everything that crosses the wire lives here: the network byte order
//! [`codec`], the [`command`] table, the length-prefixed [`envelope`], typed
//! [`messages`] for both directions, the per-owner bullet id partitioning in
//! [`ids`], and the windowed reliable-delivery state machines in [`transfer`].
//! Nothing in this crate touches a socket, so every rule can be exercised in
//! plain unit tests.

pub mod codec;
pub mod command;
pub mod envelope;
pub mod ids;
pub mod messages;
pub mod transfer;

use codec::{CodecError, Reader, WireDecode, WireEncode, Writer};

/// Number of player slots in a session
pub const MAX_CONNECTION: usize = 4;
/// Asteroid pool capacity per game session
pub const MAX_ASTEROIDS: usize = 50;
/// Size of each owner's private bullet id ring
pub const BULLET_ID_MAX: u32 = 100;
/// First bullet id; everything below belongs to the asteroid id space
pub const BULLET_ID_BASE: u32 = 100;
/// Points awarded for destroying an asteroid
pub const ASTEROID_SCORE: u32 = 100;
/// Entries kept in the high-score ledger
pub const MAX_HIGH_SCORES: usize = 5;

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const ASTEROID_SPEED: f32 = 100.0;

/// Stable index of a player for the lifetime of a session
pub type SlotId = usize;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            Self::new(self.x / len, self.y / len)
        } else {
            Self::ZERO
        }
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

/// Kinematic state a client reports for an entity it simulates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motion {
    pub pos: Vec2,
    pub vel: Vec2,
    pub dir: f32,
}

/// Last ship state reported by the owning client, plus its score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShipState {
    pub motion: Motion,
    pub score: u32,
}

impl ShipState {
    /// Puts the ship back at the origin at rest, keeping its score
    pub fn respawn(&mut self) {
        self.motion.pos = Vec2::ZERO;
        self.motion.vel = Vec2::ZERO;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    pub slot: SlotId,
    pub ship: ShipState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AsteroidState {
    pub id: u32,
    pub motion: Motion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighScoreEntry {
    pub name: String,
    pub score: u32,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

/// Writes a slot id as the wire's signed 32-bit player id
pub fn write_slot(w: &mut Writer, slot: SlotId) -> Result<(), CodecError> {
    w.put_i32(slot as i32)
}

/// Reads a player id and checks it addresses a real slot
pub fn read_slot(r: &mut Reader<'_>) -> Result<SlotId, CodecError> {
    let raw = r.get_i32()?;
    if raw < 0 || raw as usize >= MAX_CONNECTION {
        return Err(CodecError::InvalidValue {
            field: "slot",
            value: i64::from(raw),
        });
    }
    Ok(raw as SlotId)
}

/// Optional slot, with `-1` standing for "none"
pub fn write_opt_slot(w: &mut Writer, slot: Option<SlotId>) -> Result<(), CodecError> {
    match slot {
        Some(slot) => write_slot(w, slot),
        None => w.put_i32(-1),
    }
}

pub fn read_opt_slot(r: &mut Reader<'_>) -> Result<Option<SlotId>, CodecError> {
    let raw = r.get_i32()?;
    if raw == -1 {
        Ok(None)
    } else if raw >= 0 && (raw as usize) < MAX_CONNECTION {
        Ok(Some(raw as SlotId))
    } else {
        Err(CodecError::InvalidValue {
            field: "slot",
            value: i64::from(raw),
        })
    }
}

impl WireEncode for Vec2 {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_f32(self.x)?;
        w.put_f32(self.y)
    }
}

impl WireDecode for Vec2 {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Vec2::new(r.get_f32()?, r.get_f32()?))
    }
}

impl WireEncode for Motion {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put(&self.pos)?;
        w.put(&self.vel)?;
        w.put_f32(self.dir)
    }
}

impl WireDecode for Motion {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Motion {
            pos: r.get()?,
            vel: r.get()?,
            dir: r.get_f32()?,
        })
    }
}

impl WireEncode for ShipState {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put(&self.motion)?;
        w.put_u32(self.score)
    }
}

impl WireDecode for ShipState {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(ShipState {
            motion: r.get()?,
            score: r.get_u32()?,
        })
    }
}

impl WireEncode for PlayerSnapshot {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        write_slot(w, self.slot)?;
        w.put(&self.ship)
    }
}

impl WireDecode for PlayerSnapshot {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(PlayerSnapshot {
            slot: read_slot(r)?,
            ship: r.get()?,
        })
    }
}

impl WireEncode for AsteroidState {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_u32(self.id)?;
        w.put(&self.motion)
    }
}

impl WireDecode for AsteroidState {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(AsteroidState {
            id: r.get_u32()?,
            motion: r.get()?,
        })
    }
}

impl WireEncode for HighScoreEntry {
    fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        w.put_str(&self.name)?;
        w.put_u32(self.score)?;
        w.put_u64(self.timestamp)
    }
}

impl WireDecode for HighScoreEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(HighScoreEntry {
            name: r.get_str()?,
            score: r.get_u32()?,
            timestamp: r.get_u64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vec2_normalize() {
        let v = Vec2::new(3.0, 4.0).normalized();
        assert_approx_eq!(v.x, 0.6, 1e-6);
        assert_approx_eq!(v.y, 0.8, 1e-6);
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
    }

    #[test]
    fn test_ship_respawn_keeps_score() {
        let mut ship = ShipState {
            motion: Motion {
                pos: Vec2::new(10.0, -4.0),
                vel: Vec2::new(1.0, 1.0),
                dir: 1.2,
            },
            score: 300,
        };
        ship.respawn();
        assert_eq!(ship.motion.pos, Vec2::ZERO);
        assert_eq!(ship.motion.vel, Vec2::ZERO);
        assert_eq!(ship.score, 300);
    }

    #[test]
    fn test_player_snapshot_wire_layout() {
        let snapshot = PlayerSnapshot {
            slot: 2,
            ship: ShipState {
                motion: Motion {
                    pos: Vec2::new(1.0, 2.0),
                    vel: Vec2::new(-3.0, 4.5),
                    dir: 0.25,
                },
                score: 700,
            },
        };
        let mut w = Writer::new();
        w.put(&snapshot).unwrap();
        // slot + 5 floats + score
        assert_eq!(w.len(), 4 + 5 * 4 + 4);

        let decoded: PlayerSnapshot = Reader::new(w.as_slice()).get().unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_slot_out_of_range_rejected() {
        let mut w = Writer::new();
        w.put_i32(MAX_CONNECTION as i32).unwrap();
        w.put_i32(-1).unwrap();
        let mut r = Reader::new(w.as_slice());
        assert!(matches!(
            read_slot(&mut r),
            Err(CodecError::InvalidValue { field: "slot", .. })
        ));
        assert!(read_slot(&mut r).is_err());
    }

    #[test]
    fn test_optional_slot() {
        let mut w = Writer::new();
        write_opt_slot(&mut w, None).unwrap();
        write_opt_slot(&mut w, Some(3)).unwrap();
        let mut r = Reader::new(w.as_slice());
        assert_eq!(read_opt_slot(&mut r).unwrap(), None);
        assert_eq!(read_opt_slot(&mut r).unwrap(), Some(3));
    }

    #[test]
    fn test_composite_decode_failure_restores_cursor() {
        let mut w = Writer::new();
        w.put_f32(1.0).unwrap();
        w.put_f32(2.0).unwrap();
        w.put_f32(3.0).unwrap();
        let mut r = Reader::new(w.as_slice());
        assert!(r.get::<Motion>().is_err());
        assert_eq!(r.position(), 0);
        assert_eq!(r.get::<Vec2>().unwrap(), Vec2::new(1.0, 2.0));
    }
}
