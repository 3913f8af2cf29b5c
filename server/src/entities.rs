//! Fixed-capacity arenas for asteroids and bullets, addressed by id

use shared::ids::{bullet_owner, bullet_range, BulletIdAllocator};
use shared::{AsteroidState, Motion, SlotId, BULLET_ID_BASE, BULLET_ID_MAX, MAX_CONNECTION};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("all {0} asteroid ids have been issued this game")]
    PoolExhausted(usize),
    #[error("slot {0} cannot own bullets")]
    InvalidOwner(SlotId),
}

#[derive(Debug, Clone, Copy)]
pub struct Asteroid {
    pub id: u32,
    pub motion: Motion,
    pub active: bool,
    pub created_at: Instant,
}

impl Asteroid {
    pub fn state(&self) -> AsteroidState {
        AsteroidState {
            id: self.id,
            motion: self.motion,
        }
    }
}

/// Asteroid arena; ids are indices into it
///
/// Each index is issued at most once between resets, so "saturated" means the
/// game has spawned every asteroid it ever will.
#[derive(Debug)]
pub struct AsteroidPool {
    slots: Vec<Option<Asteroid>>,
    issued: usize,
}

impl AsteroidPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            issued: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the first never-issued index
    pub fn allocate(&mut self, motion: Motion, now: Instant) -> Result<u32, EntityError> {
        let index = self.issued;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(EntityError::PoolExhausted(index))?;
        let id = index as u32;
        *slot = Some(Asteroid {
            id,
            motion,
            active: true,
            created_at: now,
        });
        self.issued += 1;
        Ok(id)
    }

    pub fn get(&self, id: u32) -> Option<&Asteroid> {
        self.slots.get(id as usize)?.as_ref().filter(|a| a.active)
    }

    pub fn is_active(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Returns true only if the asteroid was active, so repeats are no-ops
    pub fn deactivate(&mut self, id: u32) -> bool {
        match self.slots.get_mut(id as usize).and_then(Option::as_mut) {
            Some(asteroid) if asteroid.active => {
                asteroid.active = false;
                true
            }
            _ => false,
        }
    }

    pub fn update(&mut self, id: u32, motion: Motion) -> bool {
        match self.slots.get_mut(id as usize).and_then(Option::as_mut) {
            Some(asteroid) if asteroid.active => {
                asteroid.motion = motion;
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = &Asteroid> {
        self.slots.iter().flatten().filter(|a| a.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn headroom(&self) -> usize {
        self.capacity() - self.issued
    }

    pub fn is_saturated(&self) -> bool {
        self.issued == self.capacity()
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.issued = 0;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Bullet {
    pub owner: SlotId,
    pub id: u32,
    pub motion: Motion,
    pub active: bool,
}

/// Bullet arena spanning every owner's id range
#[derive(Debug)]
pub struct BulletTable {
    slots: Vec<Option<Bullet>>,
    ids: BulletIdAllocator,
}

impl Default for BulletTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BulletTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; MAX_CONNECTION * BULLET_ID_MAX as usize],
            ids: BulletIdAllocator::new(),
        }
    }

    fn index(id: u32) -> Option<usize> {
        bullet_owner(id).map(|_| (id - BULLET_ID_BASE) as usize)
    }

    /// Allocates the owner's next ring id, replacing whatever bullet held it
    pub fn spawn(&mut self, owner: SlotId, motion: Motion) -> Result<u32, EntityError> {
        let id = self
            .ids
            .allocate(owner)
            .ok_or(EntityError::InvalidOwner(owner))?;
        let index = Self::index(id).ok_or(EntityError::InvalidOwner(owner))?;
        self.slots[index] = Some(Bullet {
            owner,
            id,
            motion,
            active: true,
        });
        Ok(id)
    }

    pub fn next_id(&self, owner: SlotId) -> Option<u32> {
        self.ids.peek(owner)
    }

    pub fn get(&self, id: u32) -> Option<&Bullet> {
        self.slots.get(Self::index(id)?)?.as_ref().filter(|b| b.active)
    }

    /// Deactivates a live bullet and returns its owner
    pub fn deactivate(&mut self, id: u32) -> Option<SlotId> {
        let bullet = self.slots.get_mut(Self::index(id)?)?.as_mut()?;
        if !bullet.active {
            return None;
        }
        bullet.active = false;
        Some(bullet.owner)
    }

    /// Drops every live bullet of `owner`; returns how many there were
    pub fn clear_owner(&mut self, owner: SlotId) -> usize {
        let Some(range) = bullet_range(owner) else {
            return 0;
        };
        let mut cleared = 0;
        for id in range {
            if self.deactivate(id).is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().filter(|b| b.active).count()
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.ids.reset();
    }
}
