use crate::global_variables::LAST_SEEN_TIMEOUT;
use crate::simulation_engine::ids::VehicleId;
use std::cmp::Ordering;

/// One vehicle waiting for permission to cross.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueEntry {
    pub vehicle: VehicleId,
    /// Position at the time of the first announcement, used for ordering.
    pub x: i32,
    pub y: i32,
    pub enqueued_at: u64,
    pub last_seen: u64,
}

impl QueueEntry {
    /// Orders by `(enqueue time, x, y, vehicle id)`.
    fn order_key(&self, other: &Self) -> Ordering {
        self.enqueued_at
            .cmp(&other.enqueued_at)
            .then(self.x.cmp(&other.x))
            .then(self.y.cmp(&other.y))
            .then(self.vehicle.cmp(&other.vehicle))
    }
}

/// Waiting list for one priority class at one junction.
///
/// Invariant: entries are always sorted by `(enqueue time, x, y, vehicle id)`,
/// so the head does not depend on the order in which threads announced vehicles
/// within the same tick.
#[derive(Debug, Default, Clone)]
pub struct JunctionQueue {
    entries: Vec<QueueEntry>,
}

impl JunctionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a vehicle, or refreshes its last-seen time if it is already queued.
    pub fn add_vehicle(&mut self, vehicle: VehicleId, x: i32, y: i32, time: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.vehicle == vehicle) {
            entry.last_seen = entry.last_seen.max(time);
            return;
        }
        let entry = QueueEntry {
            vehicle,
            x,
            y,
            enqueued_at: time,
            last_seen: time,
        };
        let index = self
            .entries
            .partition_point(|e| e.order_key(&entry) == Ordering::Less);
        self.entries.insert(index, entry);
    }

    pub fn first_vehicle(&self) -> Option<VehicleId> {
        self.entries.first().map(|e| e.vehicle)
    }

    /// Drops the head of the queue. Does nothing on an empty queue.
    pub fn del_first_vehicle(&mut self) {
        if !self.entries.is_empty() {
            self.entries.remove(0);
        }
    }

    pub fn del_vehicle(&mut self, vehicle: VehicleId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.vehicle != vehicle);
        self.entries.len() != before
    }

    pub fn contains(&self, vehicle: VehicleId) -> bool {
        self.entries.iter().any(|e| e.vehicle == vehicle)
    }

    /// Evicts entries not refreshed within `LAST_SEEN_TIMEOUT`. Returns how many were dropped.
    pub fn clean_up(&mut self, time: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| time.saturating_sub(e.last_seen) <= LAST_SEEN_TIMEOUT);
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
