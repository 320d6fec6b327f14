use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::locks::KeyedLocks;
use crate::models::Room;
use crate::store::{get_required, Repository};

/// Result of freeing a bed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { remaining: u32 },
    /// The room had no occupied bed; nothing changed.
    AlreadyEmpty,
}

/// Bed counts per room, never below zero or above capacity
#[derive(Clone)]
pub struct RoomOccupancyTracker {
    rooms: Arc<dyn Repository<Room>>,
    locks: KeyedLocks,
}

impl RoomOccupancyTracker {
    pub fn new(rooms: Arc<dyn Repository<Room>>) -> Self {
        Self::with_locks(rooms, KeyedLocks::new())
    }

    /// A tracker that serializes through an existing lock set, so trackers
    /// over the same rooms never interleave their updates.
    pub fn with_locks(rooms: Arc<dyn Repository<Room>>, locks: KeyedLocks) -> Self {
        Self { rooms, locks }
    }

    pub async fn release(&self, room_id: Uuid) -> BillingResult<ReleaseOutcome> {
        let _guard = self.locks.acquire(room_id).await;

        let mut room = get_required(self.rooms.as_ref(), room_id).await?;
        if room.occupied_beds == 0 {
            warn!(%room_id, room = %room.room_number, "bed release on a room with no occupied beds");
            return Ok(ReleaseOutcome::AlreadyEmpty);
        }

        room.occupied_beds -= 1;
        let remaining = room.occupied_beds;
        self.rooms.update(room).await?;

        info!(%room_id, remaining, "bed released");
        Ok(ReleaseOutcome::Released { remaining })
    }

    /// Take a bed. Returns the new occupied count.
    pub async fn occupy(&self, room_id: Uuid) -> BillingResult<u32> {
        let _guard = self.locks.acquire(room_id).await;

        let mut room = get_required(self.rooms.as_ref(), room_id).await?;
        if room.occupied_beds >= room.total_beds {
            return Err(BillingError::Conflict(format!(
                "room {} is full ({}/{} beds)",
                room.room_number, room.occupied_beds, room.total_beds
            )));
        }

        room.occupied_beds += 1;
        let occupied = room.occupied_beds;
        self.rooms.update(room).await?;

        info!(%room_id, occupied, "bed occupied");
        Ok(occupied)
    }
}
