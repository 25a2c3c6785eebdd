use crate::error::SimResult;
use crate::simulation_engine::ids::{NodeId, VehicleId};
use crate::simulation_engine::map::Map;
use crate::simulation_engine::route_vehicle::RouteVehicle;
use crate::simulation_engine::vehicles::Vehicle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Something scheduled to happen at a given simulation time.
#[derive(Debug)]
pub enum SimulationEvent {
    /// Puts a vehicle on the map. It is picked up by the owning worker on the next tick.
    AddVehicle(Box<dyn Vehicle>),
}

/// Called by the master once per tick, before the workers are released.
pub trait EventSource: Send {
    fn process_events(&mut self, time: u64, map: &Map);

    /// Events not yet due.
    fn pending(&self) -> usize {
        0
    }
}

/// Time-ordered list of scheduled events. Events due at the same time run in insertion order.
#[derive(Debug, Default)]
pub struct EventList {
    events: BTreeMap<u64, Vec<SimulationEvent>>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, time: u64, event: SimulationEvent) {
        self.events.entry(time).or_default().push(event);
    }

    pub fn add_vehicle(&mut self, time: u64, vehicle: Box<dyn Vehicle>) {
        self.add_event(time, SimulationEvent::AddVehicle(vehicle));
    }

    pub fn next_time(&self) -> Option<u64> {
        self.events.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A planned vehicle journey: when it starts, which nodes it passes and how fast it wants to go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub start_ms: u64,
    pub path: Vec<NodeId>,
    /// cm/s
    pub desired_speed: f64,
}

/// Schedules one `RouteVehicle` per trip. Vehicle ids are assigned in trip order starting at 1.
pub fn events_from_trips(map: &Map, trips: &[Trip]) -> SimResult<EventList> {
    let mut events = EventList::new();
    for (index, trip) in trips.iter().enumerate() {
        let id = VehicleId(index as u64 + 1);
        let vehicle = RouteVehicle::from_nodes(id, map, &trip.path, trip.desired_speed)?;
        events.add_vehicle(trip.start_ms, Box::new(vehicle));
    }
    Ok(events)
}

impl EventSource for EventList {
    fn process_events(&mut self, time: u64, map: &Map) {
        let later = match time.checked_add(1) {
            Some(next) => self.events.split_off(&next),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.events, later);
        let mut added = 0;
        for event in due.into_values().flatten() {
            match event {
                SimulationEvent::AddVehicle(vehicle) => {
                    map.add_vehicle(vehicle);
                    added += 1;
                }
            }
        }
        if added > 0 {
            log::debug!("{} vehicles scheduled for {} ms entered the map", added, time);
        }
    }

    fn pending(&self) -> usize {
        self.len()
    }
}
