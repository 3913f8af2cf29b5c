//! Bullet id partitioning
//!
//! Each slot owns the contiguous range
//! `BULLET_ID_BASE + slot * BULLET_ID_MAX .. BULLET_ID_BASE + (slot + 1) * BULLET_ID_MAX`
//! and hands ids out of it as a ring. Two clients can therefore never produce
//! the same bullet id, and asteroid ids (below `BULLET_ID_BASE`) never collide
//! with bullets either.

use crate::{SlotId, BULLET_ID_BASE, BULLET_ID_MAX, MAX_CONNECTION};
use std::ops::Range;

/// The id range reserved for `owner`, or `None` for a slot that does not exist
pub fn bullet_range(owner: SlotId) -> Option<Range<u32>> {
    if owner >= MAX_CONNECTION {
        return None;
    }
    let start = BULLET_ID_BASE + owner as u32 * BULLET_ID_MAX;
    Some(start..start + BULLET_ID_MAX)
}

/// Which slot a bullet id belongs to
pub fn bullet_owner(id: u32) -> Option<SlotId> {
    if id < BULLET_ID_BASE {
        return None;
    }
    let owner = ((id - BULLET_ID_BASE) / BULLET_ID_MAX) as SlotId;
    (owner < MAX_CONNECTION).then_some(owner)
}

/// Per-owner ring cursors; the oldest id is silently reused after
/// `BULLET_ID_MAX` allocations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulletIdAllocator {
    cursors: [u32; MAX_CONNECTION],
}

impl BulletIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id in `owner`'s ring and advances it
    pub fn allocate(&mut self, owner: SlotId) -> Option<u32> {
        let id = self.peek(owner)?;
        self.cursors[owner] = (self.cursors[owner] + 1) % BULLET_ID_MAX;
        Some(id)
    }

    /// The id the next `allocate(owner)` will return
    pub fn peek(&self, owner: SlotId) -> Option<u32> {
        let range = bullet_range(owner)?;
        Some(range.start + self.cursors[owner])
    }

    /// Moves `owner`'s cursor so the next allocation returns `next_id`
    ///
    /// Used by a client to pick up where the server's ring for its slot is.
    pub fn sync_to(&mut self, owner: SlotId, next_id: u32) -> bool {
        match bullet_range(owner) {
            Some(range) if range.contains(&next_id) => {
                self.cursors[owner] = next_id - range.start;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.cursors = [0; MAX_CONNECTION];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ranges_are_disjoint_and_above_asteroids() {
        let mut seen = HashSet::new();
        for owner in 0..MAX_CONNECTION {
            let range = bullet_range(owner).unwrap();
            assert!(range.start >= BULLET_ID_BASE);
            for id in range {
                assert!(seen.insert(id), "id {} shared between owners", id);
                assert_eq!(bullet_owner(id), Some(owner));
            }
        }
        assert!(bullet_range(MAX_CONNECTION).is_none());
        assert_eq!(bullet_owner(7), None);
        assert_eq!(
            bullet_owner(BULLET_ID_BASE + MAX_CONNECTION as u32 * BULLET_ID_MAX),
            None
        );
    }

    #[test]
    fn test_first_slot_uses_hundreds() {
        let mut ids = BulletIdAllocator::new();
        assert_eq!(ids.allocate(0), Some(100));
        assert_eq!(ids.allocate(0), Some(101));
        assert_eq!(ids.allocate(1), Some(200));
    }

    #[test]
    fn test_allocation_wraps_within_owner_range() {
        let mut ids = BulletIdAllocator::new();
        for owner in 0..MAX_CONNECTION {
            let range = bullet_range(owner).unwrap();
            let mut issued = Vec::new();
            for _ in 0..=BULLET_ID_MAX {
                let id = ids.allocate(owner).unwrap();
                assert!(range.contains(&id), "owner {} got {}", owner, id);
                issued.push(id);
            }
            // The 101st allocation reuses the oldest id
            assert_eq!(issued[BULLET_ID_MAX as usize], issued[0]);
        }
    }

    #[test]
    fn test_invalid_owner() {
        let mut ids = BulletIdAllocator::new();
        assert_eq!(ids.allocate(MAX_CONNECTION), None);
        assert_eq!(ids.peek(99), None);
    }

    #[test]
    fn test_sync_to() {
        let mut ids = BulletIdAllocator::new();
        assert!(ids.sync_to(2, 342));
        assert_eq!(ids.allocate(2), Some(342));
        assert!(!ids.sync_to(2, 100));
        assert_eq!(ids.peek(2), Some(343));

        ids.reset();
        assert_eq!(ids.peek(2), Some(300));
    }
}
