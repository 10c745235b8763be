//! Detection sets keyed by camera
//!
//! Each camera's set is replaced wholesale; readers get an `Arc`
//! snapshot and never see a partially written set. Every poll tick takes
//! a ticket before it starts fetching, and its result is committed only
//! if no newer tick has started for that camera since.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shelfwatch_core::{CameraId, Detection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Why a camera's detections were emptied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// The camera itself is offline; polling is suspended
    CameraOffline,
    /// Primary failed and the connectivity check says the camera is disconnected
    CameraDisconnected,
    /// Primary failed while the camera still reports as connected
    PrimaryUnavailable,
    /// Primary and fallback both failed
    FallbackUnreachable,
    /// The tick itself failed unexpectedly
    TickFailed,
}

/// Where the current set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOrigin {
    /// Nothing has been committed yet
    Initial,
    Primary,
    Cleared(ClearReason),
}

/// Detections currently associated with one camera
#[derive(Debug, Clone)]
pub struct DetectionSet {
    pub camera_id: CameraId,
    pub detections: Vec<Detection>,
    pub origin: DetectionOrigin,
    pub updated_at: DateTime<Utc>,
}

impl DetectionSet {
    pub fn empty(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            detections: Vec::new(),
            origin: DetectionOrigin::Initial,
            updated_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Proof that a poll tick started; required to commit its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TickTicket(u64);

struct Slot {
    latest: Option<TickTicket>,
    current: Arc<DetectionSet>,
}

pub struct DetectionStore {
    slots: DashMap<CameraId, Slot>,
    next_ticket: AtomicU64,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Open a slot for a camera; no-op if one exists
    pub fn open(&self, camera_id: &CameraId) {
        self.slots.entry(camera_id.clone()).or_insert_with(|| Slot {
            latest: None,
            current: Arc::new(DetectionSet::empty(camera_id.clone())),
        });
    }

    /// Start a tick. Returns `None` once the camera's slot is gone.
    pub fn begin_tick(&self, camera_id: &CameraId) -> Option<TickTicket> {
        let mut slot = self.slots.get_mut(camera_id)?;
        let ticket = TickTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        slot.latest = Some(ticket);
        Some(ticket)
    }

    /// Replace the camera's set if `ticket` belongs to the most recently
    /// started tick. Returns whether the set was replaced.
    pub fn commit(
        &self,
        camera_id: &CameraId,
        ticket: TickTicket,
        detections: Vec<Detection>,
        origin: DetectionOrigin,
    ) -> bool {
        let Some(mut slot) = self.slots.get_mut(camera_id) else {
            return false;
        };
        if slot.latest != Some(ticket) {
            return false;
        }
        slot.current = Arc::new(DetectionSet {
            camera_id: camera_id.clone(),
            detections,
            origin,
            updated_at: Utc::now(),
        });
        true
    }

    /// Empty the camera's set outside a tick. Any tick still in flight is
    /// superseded and its result will be discarded.
    pub fn clear(&self, camera_id: &CameraId, reason: ClearReason) -> bool {
        match self.begin_tick(camera_id) {
            Some(ticket) => self.commit(camera_id, ticket, Vec::new(), DetectionOrigin::Cleared(reason)),
            None => false,
        }
    }

    /// Current set for a camera; empty if the camera has no slot
    pub fn get(&self, camera_id: &CameraId) -> Arc<DetectionSet> {
        self.slots
            .get(camera_id)
            .map(|slot| slot.current.clone())
            .unwrap_or_else(|| Arc::new(DetectionSet::empty(camera_id.clone())))
    }

    pub fn contains(&self, camera_id: &CameraId) -> bool {
        self.slots.contains_key(camera_id)
    }

    /// Drop a camera's slot; later commits for it are rejected
    pub fn remove(&self, camera_id: &CameraId) {
        self.slots.remove(camera_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new()
    }
}
