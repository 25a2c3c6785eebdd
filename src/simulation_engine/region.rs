use crate::shared_data::lock;
use crate::simulation_engine::ids::{NodeId, RegionCoord, StreetId, VehicleId};
use crate::simulation_engine::vehicles::{Rsu, Vehicle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

const NO_OWNER: usize = usize::MAX;

/// The part of a region only its owning worker mutates while the simulation runs.
///
/// `vehicles` is the authoritative list in insertion order. `active` is a
/// cached list of indices into it, rebuilt by `refresh_active` after the list
/// changed or a vehicle changed its active flag.
#[derive(Default)]
pub struct RegionState {
    vehicles: Vec<Box<dyn Vehicle>>,
    active: Vec<usize>,
    dirty: bool,
    rsus: Vec<Box<dyn Rsu>>,
}

impl RegionState {
    pub fn add_vehicle(&mut self, vehicle: Box<dyn Vehicle>) {
        self.vehicles.push(vehicle);
        self.dirty = true;
    }

    pub fn remove_vehicle(&mut self, id: VehicleId) -> Option<Box<dyn Vehicle>> {
        let index = self.vehicles.iter().position(|v| v.id() == id)?;
        self.dirty = true;
        Some(self.vehicles.remove(index))
    }

    /// Removes and returns every vehicle for which `stays` is false.
    pub fn take_departed<F>(&mut self, stays: F) -> Vec<Box<dyn Vehicle>>
    where
        F: Fn(&dyn Vehicle) -> bool,
    {
        if self.vehicles.iter().all(|v| stays(v.as_ref())) {
            return Vec::new();
        }
        let mut departed = Vec::new();
        let mut kept = Vec::with_capacity(self.vehicles.len());
        for vehicle in self.vehicles.drain(..) {
            if stays(vehicle.as_ref()) {
                kept.push(vehicle);
            } else {
                departed.push(vehicle);
            }
        }
        self.vehicles = kept;
        self.dirty = true;
        departed
    }

    pub fn take_all(&mut self) -> Vec<Box<dyn Vehicle>> {
        self.dirty = true;
        std::mem::take(&mut self.vehicles)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuilds the cached active-vehicle array if it is stale.
    pub fn refresh_active(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.active = self
            .vehicles
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_active())
            .map(|(i, _)| i)
            .collect();
        self.dirty = false;
        true
    }

    /// Runs `f` on every vehicle in the cached active array.
    pub fn for_each_active<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut dyn Vehicle),
    {
        for &index in &self.active {
            if let Some(vehicle) = self.vehicles.get_mut(index) {
                f(vehicle.as_mut());
            }
        }
    }

    pub fn vehicles(&self) -> &[Box<dyn Vehicle>] {
        &self.vehicles
    }

    pub fn vehicles_mut(&mut self) -> &mut [Box<dyn Vehicle>] {
        &mut self.vehicles
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn add_rsu(&mut self, rsu: Box<dyn Rsu>) {
        self.rsus.push(rsu);
    }

    pub fn rsus_mut(&mut self) -> &mut [Box<dyn Rsu>] {
        &mut self.rsus
    }

    pub fn rsu_count(&self) -> usize {
        self.rsus.len()
    }
}

/// A rectangular partition of the map and the unit of work handed to a worker.
pub struct Region {
    pub coord: RegionCoord,
    /// Inclusive bounds in cm.
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
    nodes: Vec<NodeId>,
    streets: Vec<StreetId>,
    mix_zone_nodes: Vec<NodeId>,
    state: Mutex<RegionState>,
    /// Vehicles handed over by other workers or by scheduled events.
    inbox: Mutex<Vec<Box<dyn Vehicle>>>,
    owner: AtomicUsize,
}

impl Region {
    pub fn new(coord: RegionCoord, left: i32, right: i32, top: i32, bottom: i32) -> Self {
        Self {
            coord,
            left,
            right,
            top,
            bottom,
            nodes: Vec::new(),
            streets: Vec::new(),
            mix_zone_nodes: Vec::new(),
            state: Mutex::new(RegionState::default()),
            inbox: Mutex::new(Vec::new()),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn streets(&self) -> &[StreetId] {
        &self.streets
    }

    pub fn mix_zone_nodes(&self) -> &[NodeId] {
        &self.mix_zone_nodes
    }

    pub(crate) fn add_node(&mut self, node: NodeId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    pub(crate) fn del_node(&mut self, node: NodeId) {
        self.nodes.retain(|n| *n != node);
        self.mix_zone_nodes.retain(|n| *n != node);
    }

    pub(crate) fn add_street(&mut self, street: StreetId) {
        if !self.streets.contains(&street) {
            self.streets.push(street);
        }
    }

    pub(crate) fn del_street(&mut self, street: StreetId) {
        self.streets.retain(|s| *s != street);
    }

    pub(crate) fn add_mix_zone_node(&mut self, node: NodeId) {
        if !self.mix_zone_nodes.contains(&node) {
            self.mix_zone_nodes.push(node);
        }
    }

    pub fn state(&self) -> MutexGuard<'_, RegionState> {
        lock(&self.state)
    }

    /// Queues a vehicle for this region. The owner picks it up at the start of its next tick.
    pub fn deliver(&self, vehicle: Box<dyn Vehicle>) {
        lock(&self.inbox).push(vehicle);
    }

    /// Moves delivered vehicles into the authoritative list. Returns true if any arrived.
    pub fn drain_inbox(&self) -> bool {
        let arrived: Vec<Box<dyn Vehicle>> = std::mem::take(&mut *lock(&self.inbox));
        if arrived.is_empty() {
            return false;
        }
        let mut state = self.state();
        for vehicle in arrived {
            state.add_vehicle(vehicle);
        }
        true
    }

    pub fn pending_deliveries(&self) -> usize {
        lock(&self.inbox).len()
    }

    pub fn set_owner(&self, worker: Option<usize>) {
        self.owner
            .store(worker.unwrap_or(NO_OWNER), Ordering::Release);
    }

    pub fn owner(&self) -> Option<usize> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            worker => Some(worker),
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("coord", &self.coord)
            .field("left", &self.left)
            .field("right", &self.right)
            .field("top", &self.top)
            .field("bottom", &self.bottom)
            .field("nodes", &self.nodes.len())
            .field("streets", &self.streets.len())
            .finish()
    }
}
