use crate::global_variables::{
    JUNCTION_QUEUES_CLEANUP_INTERVAL, MAXIMUM_TIME_ON_JUNCTION, MAX_PRIORITY_CHAIN_STREETS,
    NEEDED_FREE_TIME_MS,
};
use crate::shared_data::lock;
use crate::simulation_engine::ids::{NodeId, StreetId, VehicleId};
use crate::simulation_engine::junction_queue::JunctionQueue;
use crate::simulation_engine::map::Map;
use crate::simulation_engine::street::Street;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::sync::Mutex;

/// Right-of-way class of one (source node, target node) movement through a junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityClass {
    /// Staying on the priority road.
    Continue = 1,
    /// Turning right off the priority road.
    PriorityRight = 2,
    /// Turning left off the priority road. Queues.
    PriorityLeft = 3,
    /// Turning right from a secondary street into the priority road.
    MergeRight = 4,
    /// Everything else. Queues and yields to all priority traffic.
    Yield = 5,
}

impl PriorityClass {
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Classes 3 and 5 must wait for an arbitration decision.
    pub fn needs_queue(self) -> bool {
        matches!(self, PriorityClass::PriorityLeft | PriorityClass::Yield)
    }
}

/// What a vehicle tells a junction when it announces itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingVehicle {
    pub id: VehicleId,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy)]
struct Announcement {
    vehicle: WaitingVehicle,
    class: PriorityClass,
    time: u64,
}

/// Mutable per-step state, guarded by the junction's mutex.
#[derive(Debug, Default)]
struct Arbitration {
    /// Class 3 vehicles.
    priority_queue: JunctionQueue,
    /// Class 5 vehicles.
    non_priority_queue: JunctionQueue,
    /// Announcements are merged into the queues only in a later step.
    announcements: Vec<Announcement>,
    allowed_this_step: Option<VehicleId>,
    last_decision_time: Option<u64>,
    vehicle_on_junction: bool,
    vehicle_on_junction_since: u64,
    last_cleanup: u64,
    passes: u64,
    last_granted: Option<(u64, VehicleId)>,
}

/// Right-of-way arbitration for one node with at least three crossing streets.
#[derive(Debug)]
pub struct Junction {
    node: NodeId,
    priority_streets: Vec<StreetId>,
    priorities: HashMap<(NodeId, NodeId), PriorityClass>,
    arbitration: Mutex<Arbitration>,
}

impl Junction {
    /// Builds the junction for `node_id`, or `None` if the node is not a real
    /// junction (fewer than three crossing or two incoming streets).
    pub fn calculate(map: &Map, node_id: NodeId) -> Option<Self> {
        let node = map.node(node_id)?;
        let crossing: Vec<&Street> = node
            .crossing_streets
            .iter()
            .filter_map(|id| map.street(*id))
            .collect();
        let incoming = crossing.iter().filter(|s| s.feeds(node_id)).count();
        if crossing.len() < 3 || incoming < 2 {
            return None;
        }

        let selected = select_priority_streets(node_id, &crossing);
        let priority_streets = validate_priority_streets(node_id, &crossing, selected);

        let mut junction = Self {
            node: node_id,
            priority_streets,
            priorities: HashMap::new(),
            arbitration: Mutex::new(Arbitration::default()),
        };
        junction.build_priority_table(map, &crossing);
        Some(junction)
    }

    fn build_priority_table(&mut self, map: &Map, crossing: &[&Street]) {
        let Some(centre) = map.node(self.node).map(|n| n.position()) else {
            return;
        };
        for incoming in crossing.iter().filter(|s| s.feeds(self.node)) {
            let Some(source) = incoming.other_end(self.node) else {
                continue;
            };
            let Some(source_point) = map.node(source).map(|n| n.position()) else {
                continue;
            };
            for outgoing in crossing
                .iter()
                .filter(|s| s.direction_from(self.node).is_some())
            {
                let Some(target) = outgoing.other_end(self.node) else {
                    continue;
                };
                let Some(target_point) = map.node(target).map(|n| n.position()) else {
                    continue;
                };
                let from_priority = self.priority_streets.contains(&incoming.id);
                let to_priority = self.priority_streets.contains(&outgoing.id);
                let right = is_line_right(source_point, centre, target_point);
                let class = if incoming.id == outgoing.id {
                    PriorityClass::Yield
                } else {
                    match (from_priority, to_priority) {
                        (true, true) => PriorityClass::Continue,
                        (true, false) if right => PriorityClass::PriorityRight,
                        (true, false) => PriorityClass::PriorityLeft,
                        (false, true) if right => PriorityClass::MergeRight,
                        _ => PriorityClass::Yield,
                    }
                };
                self.priorities.entry((source, target)).or_insert(class);
            }
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn priority_streets(&self) -> &[StreetId] {
        &self.priority_streets
    }

    pub fn is_priority_street(&self, street: StreetId) -> bool {
        self.priority_streets.contains(&street)
    }

    /// Class for travelling from `source` through this junction to `target`.
    /// Unknown movements resolve to the most cautious class.
    pub fn get_junction_priority(&self, source: NodeId, target: NodeId) -> PriorityClass {
        self.priorities
            .get(&(source, target))
            .copied()
            .unwrap_or(PriorityClass::Yield)
    }

    pub fn priorities(&self) -> &HashMap<(NodeId, NodeId), PriorityClass> {
        &self.priorities
    }

    /// Announces a vehicle approaching with `class`. Classes that do not queue are ignored.
    pub fn add_waiting_vehicle(&self, vehicle: WaitingVehicle, class: PriorityClass, time: u64) {
        if !class.needs_queue() {
            return;
        }
        let mut state = lock(&self.arbitration);
        self.begin_step(&mut state, time);
        state.announcements.push(Announcement {
            vehicle,
            class,
            time,
        });
    }

    /// Asks whether `vehicle`, currently on `current_street`, may enter the junction now.
    ///
    /// At most one queued vehicle per junction is granted per step. The granted
    /// vehicle must still find every other priority street clear; if not, it
    /// keeps its place and may retry next step.
    pub fn can_pass_junction(
        &self,
        map: &Map,
        vehicle: VehicleId,
        current_street: StreetId,
        class: PriorityClass,
        time: u64,
    ) -> bool {
        if !class.needs_queue() {
            return true;
        }
        let mut state = lock(&self.arbitration);
        self.begin_step(&mut state, time);
        if state.allowed_this_step != Some(vehicle) {
            return false;
        }
        if !self.priority_streets_clear(map, current_street) {
            log::trace!(
                "{} at {} waits for priority traffic",
                vehicle,
                self.node
            );
            return false;
        }

        state.allowed_this_step = None;
        state.vehicle_on_junction = true;
        state.vehicle_on_junction_since = time;
        if !state.priority_queue.del_vehicle(vehicle) {
            state.non_priority_queue.del_vehicle(vehicle);
        }
        state.announcements.retain(|a| a.vehicle.id != vehicle);
        state.passes += 1;
        state.last_granted = Some((time, vehicle));
        true
    }

    /// Called by a vehicle once it has left the junction.
    pub fn allow_other_vehicle(&self) {
        lock(&self.arbitration).vehicle_on_junction = false;
    }

    /// First call of a new step: merge earlier announcements, run the
    /// liveness guards and snapshot the vehicle allowed in this step.
    fn begin_step(&self, state: &mut Arbitration, time: u64) {
        if state.last_decision_time == Some(time) {
            return;
        }
        state.last_decision_time = Some(time);

        let (mut ready, pending): (Vec<Announcement>, Vec<Announcement>) =
            std::mem::take(&mut state.announcements)
                .into_iter()
                .partition(|a| a.time < time);
        state.announcements = pending;
        ready.sort_by(|a, b| {
            a.time
                .cmp(&b.time)
                .then(a.vehicle.x.cmp(&b.vehicle.x))
                .then(a.vehicle.y.cmp(&b.vehicle.y))
                .then(a.vehicle.id.cmp(&b.vehicle.id))
        });
        for a in ready {
            let queue = match a.class {
                PriorityClass::PriorityLeft => &mut state.priority_queue,
                _ => &mut state.non_priority_queue,
            };
            queue.add_vehicle(a.vehicle.id, a.vehicle.x, a.vehicle.y, a.time);
        }

        if state.vehicle_on_junction
            && time.saturating_sub(state.vehicle_on_junction_since) >= MAXIMUM_TIME_ON_JUNCTION
        {
            log::debug!(
                "Releasing {} after {} ms without completion",
                self.node,
                MAXIMUM_TIME_ON_JUNCTION
            );
            state.vehicle_on_junction = false;
        }

        if time.saturating_sub(state.last_cleanup) >= JUNCTION_QUEUES_CLEANUP_INTERVAL {
            let evicted = state.priority_queue.clean_up(time) + state.non_priority_queue.clean_up(time);
            if evicted > 0 {
                log::debug!("Evicted {} stale waiting vehicles at {}", evicted, self.node);
            }
            state.last_cleanup = time;
        }

        state.allowed_this_step = if state.vehicle_on_junction {
            None
        } else {
            state
                .priority_queue
                .first_vehicle()
                .or_else(|| state.non_priority_queue.first_vehicle())
        };
    }

    /// True if no priority street other than `current_street` has traffic
    /// approaching within its needed free distance.
    fn priority_streets_clear(&self, map: &Map, current_street: StreetId) -> bool {
        self.priority_streets
            .iter()
            .filter(|id| **id != current_street)
            .filter_map(|id| map.street(*id))
            .filter(|street| street.feeds(self.node))
            .all(|street| {
                let needed = f64::from(street.max_speed) * NEEDED_FREE_TIME_MS as f64 / 1000.0;
                self.approach_clear(map, street, needed)
            })
    }

    /// Looks for the nearest vehicle heading for this junction on `first`,
    /// continuing over connector nodes (exactly two crossing streets) until
    /// `needed` cm have been covered or the hop limit is hit.
    fn approach_clear(&self, map: &Map, first: &Street, needed: f64) -> bool {
        let mut street = first;
        let mut towards = self.node;
        let mut covered = 0.0;
        for _ in 0..MAX_PRIORITY_CHAIN_STREETS {
            let Some(direction) = street.direction_towards(towards) else {
                return true;
            };
            let nearest = street.lanes().nearest_to_destination(direction).copied();
            if let Some(occupant) = nearest {
                let distance = covered + street.distance_to_destination(direction, occupant.position);
                return distance >= needed;
            }
            covered += street.length();
            if covered >= needed {
                return true;
            }
            let Some(far) = street.other_end(towards) else {
                return true;
            };
            if far == self.node {
                return true;
            }
            let Some(far_node) = map.node(far) else {
                return true;
            };
            if far_node.crossing_streets.len() != 2 {
                return true;
            }
            let next = far_node
                .crossing_streets
                .iter()
                .copied()
                .find(|id| *id != street.id)
                .and_then(|id| map.street(id));
            match next {
                Some(next) => {
                    street = next;
                    towards = far;
                }
                None => return true,
            }
        }
        true
    }

    pub fn waiting_count(&self) -> usize {
        let state = lock(&self.arbitration);
        state.priority_queue.len() + state.non_priority_queue.len()
    }

    pub fn is_vehicle_on_junction(&self) -> bool {
        lock(&self.arbitration).vehicle_on_junction
    }

    pub fn passes(&self) -> u64 {
        lock(&self.arbitration).passes
    }

    /// `(time, vehicle)` of the most recent grant.
    pub fn last_granted(&self) -> Option<(u64, VehicleId)> {
        lock(&self.arbitration).last_granted
    }
}

/// Picks priority streets: a continuing street name first, otherwise the fastest streets.
fn select_priority_streets(node: NodeId, crossing: &[&Street]) -> Vec<StreetId> {
    let mut by_name: BTreeMap<&str, Vec<&Street>> = BTreeMap::new();
    for street in crossing.iter().filter(|s| !s.name.is_empty()) {
        by_name.entry(street.name.as_str()).or_default().push(street);
    }

    let continuing = by_name
        .into_values()
        .filter(|group| group.len() >= 2 && continues_through(node, group))
        .max_by(|a, b| {
            let speed = |g: &Vec<&Street>| g.iter().map(|s| s.max_speed).max().unwrap_or(0);
            speed(a)
                .cmp(&speed(b))
                // Prefer the lower street id on ties.
                .then_with(|| min_id(b).cmp(&min_id(a)))
        });

    let mut candidates: Vec<&Street> = match continuing {
        Some(group) => group,
        None => crossing.to_vec(),
    };
    candidates.sort_by(|a, b| b.max_speed.cmp(&a.max_speed).then(a.id.cmp(&b.id)));

    if candidates.len() >= 3 && is_valid_triple(node, &candidates[..3]) {
        candidates[..3].iter().map(|s| s.id).collect()
    } else {
        candidates.iter().take(2).map(|s| s.id).collect()
    }
}

fn min_id(group: &[&Street]) -> StreetId {
    group.iter().map(|s| s.id).min().unwrap_or(StreetId(u32::MAX))
}

/// A name continues if some street of the group can be driven into another one through the node.
fn continues_through(node: NodeId, group: &[&Street]) -> bool {
    group.iter().any(|a| {
        a.feeds(node)
            && group
                .iter()
                .any(|b| b.id != a.id && b.direction_from(node).is_some())
    })
}

/// Three priority streets are only valid as {incoming one-way, outgoing one-way, two-way}.
fn is_valid_triple(node: NodeId, streets: &[&Street]) -> bool {
    if streets.len() != 3 {
        return false;
    }
    let incoming_oneway = streets
        .iter()
        .filter(|s| s.oneway && s.end == node)
        .count();
    let outgoing_oneway = streets
        .iter()
        .filter(|s| s.oneway && s.start == node)
        .count();
    let two_way = streets.iter().filter(|s| !s.oneway).count();
    incoming_oneway == 1 && outgoing_oneway == 1 && two_way == 1
}

/// Collapses an invalid set of three priority streets to its first two.
fn validate_priority_streets(node: NodeId, crossing: &[&Street], mut selected: Vec<StreetId>) -> Vec<StreetId> {
    if selected.len() == 3 {
        let streets: Vec<&Street> = selected
            .iter()
            .filter_map(|id| crossing.iter().find(|s| s.id == *id).copied())
            .collect();
        if !is_valid_triple(node, &streets) {
            selected.truncate(2);
        }
    }
    selected
}

/// True if going `from -> via -> to` turns right, in screen coordinates (y grows downwards).
pub fn is_line_right(from: (i32, i32), via: (i32, i32), to: (i32, i32)) -> bool {
    let heading_in = f64::from(via.1 - from.1).atan2(f64::from(via.0 - from.0));
    let heading_out = f64::from(to.1 - via.1).atan2(f64::from(to.0 - via.0));
    let mut turn = heading_out - heading_in;
    while turn <= -PI {
        turn += 2.0 * PI;
    }
    while turn > PI {
        turn -= 2.0 * PI;
    }
    turn > 1e-9
}
