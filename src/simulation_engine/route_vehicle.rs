use crate::error::{SimError, SimResult};
use crate::global_variables::{
    DEFAULT_BEACON_INTERVAL, DEFAULT_COMMUNICATION_INTERVAL, JUNCTION_ANNOUNCE_MARGIN,
    MIN_VEHICLE_GAP,
};
use crate::simulation_engine::ids::{NodeId, VehicleId};
use crate::simulation_engine::junction::{Junction, PriorityClass, WaitingVehicle};
use crate::simulation_engine::map::{Map, RouteLeg};
use crate::simulation_engine::street::{Direction, LaneOccupant, Street};
use crate::simulation_engine::vehicles::{StepContext, Vehicle};

const ARRIVAL_EPSILON: f64 = 1e-6;

/// Vehicle following a fixed list of street legs.
///
/// It keeps its own lane entry up to date, keeps `MIN_VEHICLE_GAP` to the
/// vehicle ahead, stops at red lights, and asks junction arbitration for
/// permission before crossing a node where its movement has to queue.
#[derive(Debug, Clone)]
pub struct RouteVehicle {
    id: VehicleId,
    route: Vec<RouteLeg>,
    /// cm/s, further capped by each street's limit.
    desired_speed: f64,
    leg: usize,
    /// cm from the current street's start node.
    position: f64,
    speed: f64,
    planned_distance: f64,
    may_cross: bool,
    point: (i32, i32),
    active: bool,
    holding_junction: Option<NodeId>,
    start_position: f64,
    start_point: (i32, i32),
    communication_countdown: i64,
    beacon_countdown: i64,
    messages_sent: u64,
    beacons_sent: u64,
    encrypted_beacons_sent: u64,
    ids_runs: u64,
    junction_waits: u64,
    /// `(time, node)` of every node crossed.
    crossings: Vec<(u64, NodeId)>,
}

impl RouteVehicle {
    pub fn new(id: VehicleId, map: &Map, route: Vec<RouteLeg>, desired_speed: f64) -> SimResult<Self> {
        let first = *route.first().ok_or(SimError::RouteTooShort)?;
        for leg in &route {
            map.street(leg.street).ok_or(SimError::UnknownStreet(leg.street))?;
        }
        let street = map
            .street(first.street)
            .ok_or(SimError::UnknownStreet(first.street))?;
        let position = street.entry_position(first.direction);
        let point = street.point_at(position);
        Ok(Self {
            id,
            route,
            desired_speed: desired_speed.max(0.0),
            leg: 0,
            position,
            speed: 0.0,
            planned_distance: 0.0,
            may_cross: false,
            point,
            active: true,
            holding_junction: None,
            start_position: position,
            start_point: point,
            communication_countdown: 0,
            beacon_countdown: 0,
            messages_sent: 0,
            beacons_sent: 0,
            encrypted_beacons_sent: 0,
            ids_runs: 0,
            junction_waits: 0,
            crossings: Vec::new(),
        })
    }

    /// Builds the route from a path of directly connected nodes.
    pub fn from_nodes(id: VehicleId, map: &Map, path: &[NodeId], desired_speed: f64) -> SimResult<Self> {
        let route = map.route_from_nodes(path)?;
        Self::new(id, map, route, desired_speed)
    }

    pub fn leg_index(&self) -> usize {
        self.leg
    }

    pub fn route(&self) -> &[RouteLeg] {
        &self.route
    }

    pub fn position_on_street(&self) -> f64 {
        self.position
    }

    /// Current speed in cm/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn beacons_sent(&self) -> u64 {
        self.beacons_sent
    }

    pub fn encrypted_beacons_sent(&self) -> u64 {
        self.encrypted_beacons_sent
    }

    pub fn ids_runs(&self) -> u64 {
        self.ids_runs
    }

    /// Ticks spent at a stop line denied by junction arbitration.
    pub fn junction_waits(&self) -> u64 {
        self.junction_waits
    }

    pub fn crossings(&self) -> &[(u64, NodeId)] {
        &self.crossings
    }

    fn waiting(&self) -> WaitingVehicle {
        WaitingVehicle {
            id: self.id,
            x: self.point.0,
            y: self.point.1,
        }
    }

    fn class_at(&self, junction: &Junction, street: &Street, leg: RouteLeg, next: &Street, next_leg: RouteLeg) -> PriorityClass {
        junction.get_junction_priority(
            street.origin(leg.direction),
            next.destination(next_leg.direction),
        )
    }

    /// Announces this vehicle at the upcoming junction if its movement has to queue.
    fn announce(&self, ctx: &StepContext<'_>, street: &Street, leg: RouteLeg) {
        let Some(next_leg) = self.route.get(self.leg + 1).copied() else {
            return;
        };
        let Some(next) = ctx.map.street(next_leg.street) else {
            return;
        };
        let Some(node) = ctx.map.node(street.destination(leg.direction)) else {
            return;
        };
        if node.traffic_light.is_some() {
            return;
        }
        if let Some(junction) = node.junction.as_ref() {
            let class = self.class_at(junction, street, leg, next, next_leg);
            junction.add_waiting_vehicle(self.waiting(), class, ctx.time);
        }
    }

    /// Decides whether the vehicle may cross the node it reaches this tick.
    fn may_enter_node(&mut self, ctx: &StepContext<'_>, street: &Street, leg: RouteLeg, remaining: f64) -> bool {
        let node_id = street.destination(leg.direction);
        let Some(next_leg) = self.route.get(self.leg + 1).copied() else {
            return false;
        };
        let Some(next) = ctx.map.street(next_leg.street) else {
            return false;
        };
        let entry = next.entry_position(next_leg.direction);
        let blocked = next
            .lanes()
            .occupants(next_leg.direction)
            .iter()
            .any(|o| o.vehicle != self.id && (o.position - entry).abs() < MIN_VEHICLE_GAP);
        if blocked {
            return false;
        }

        let Some(node) = ctx.map.node(node_id) else {
            return true;
        };
        if node.traffic_light.is_some() {
            return street.can_pass_traffic_light(leg.direction);
        }
        let Some(junction) = node.junction.as_ref() else {
            return true;
        };
        let class = self.class_at(junction, street, leg, next, next_leg);
        if !class.needs_queue() {
            return true;
        }
        junction.add_waiting_vehicle(self.waiting(), class, ctx.time);
        if remaining > ARRIVAL_EPSILON {
            // Pull up to the stop line first.
            return false;
        }
        if junction.can_pass_junction(ctx.map, self.id, street.id, class, ctx.time) {
            self.holding_junction = Some(node_id);
            true
        } else {
            self.junction_waits += 1;
            false
        }
    }

    fn place(&mut self, street: &Street, direction: Direction, position: f64) {
        self.position = position;
        self.point = street.point_at(position);
        street.lanes().upsert(
            direction,
            LaneOccupant {
                vehicle: self.id,
                position,
                speed: self.speed,
            },
        );
    }

    /// Lets the junction go once the vehicle is clear of it.
    fn release_junction(&mut self, ctx: &StepContext<'_>) {
        let Some(node_id) = self.holding_junction else {
            return;
        };
        let clear = match self.route.get(self.leg).filter(|_| self.active) {
            Some(leg) => match ctx.map.street(leg.street) {
                Some(street) if street.origin(leg.direction) == node_id => {
                    let travelled = match leg.direction {
                        Direction::Forward => self.position,
                        Direction::Backward => street.length() - self.position,
                    };
                    travelled >= MIN_VEHICLE_GAP
                        || street.distance_to_destination(leg.direction, self.position)
                            <= ARRIVAL_EPSILON
                }
                _ => true,
            },
            None => true,
        };
        if clear {
            if let Some(junction) = ctx.map.node(node_id).and_then(|n| n.junction.as_ref()) {
                junction.allow_other_vehicle();
            }
            self.holding_junction = None;
        }
    }
}

fn advance(direction: Direction, position: f64, distance: f64) -> f64 {
    match direction {
        Direction::Forward => position + distance,
        Direction::Backward => position - distance,
    }
}

impl Vehicle for RouteVehicle {
    fn id(&self) -> VehicleId {
        self.id
    }

    fn position(&self) -> (i32, i32) {
        self.point
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn adjust_speed(&mut self, ctx: &StepContext<'_>) {
        if !self.active {
            return;
        }
        self.communication_countdown -= ctx.step_ms as i64;
        self.beacon_countdown -= ctx.step_ms as i64;

        let leg = self.route[self.leg];
        let Some(street) = ctx.map.street(leg.street) else {
            self.active = false;
            return;
        };
        let cruise = self.desired_speed.min(f64::from(street.max_speed));
        let reach = cruise * ctx.step_ms as f64 / 1000.0;
        let remaining = street.distance_to_destination(leg.direction, self.position);

        let mut allowed = reach;
        let leader = street.lanes().next_ahead(leg.direction, self.position).copied();
        if let Some(leader) = leader {
            let gap = (leader.position - self.position).abs() - MIN_VEHICLE_GAP;
            allowed = allowed.min(gap.max(0.0));
        }

        self.may_cross = false;
        if self.leg + 1 == self.route.len() {
            allowed = allowed.min(remaining);
        } else if remaining <= allowed {
            if self.may_enter_node(ctx, street, leg, remaining) {
                self.may_cross = true;
            } else {
                allowed = remaining;
            }
        } else if remaining <= reach + JUNCTION_ANNOUNCE_MARGIN {
            self.announce(ctx, street, leg);
        }

        self.planned_distance = allowed;
        self.speed = if ctx.step_ms > 0 {
            allowed * 1000.0 / ctx.step_ms as f64
        } else {
            0.0
        };
    }

    fn send_messages(&mut self, _ctx: &StepContext<'_>) {
        self.messages_sent += 1;
        self.communication_countdown += DEFAULT_COMMUNICATION_INTERVAL;
    }

    fn evaluate_ids(&mut self, _ctx: &StepContext<'_>) {
        self.ids_runs += 1;
    }

    fn send_beacons(&mut self, _ctx: &StepContext<'_>) {
        self.beacons_sent += 1;
        self.beacon_countdown += DEFAULT_BEACON_INTERVAL;
    }

    fn send_encrypted_beacons(&mut self, ctx: &StepContext<'_>) {
        self.encrypted_beacons_sent += 1;
        self.send_beacons(ctx);
    }

    fn move_vehicle(&mut self, ctx: &StepContext<'_>) {
        if !self.active {
            return;
        }
        let leg = self.route[self.leg];
        let Some(street) = ctx.map.street(leg.street) else {
            self.active = false;
            return;
        };
        let remaining = street.distance_to_destination(leg.direction, self.position);
        let last_leg = self.leg + 1 == self.route.len();
        let reaches_node = self.planned_distance >= remaining - ARRIVAL_EPSILON;

        if !reaches_node || (!last_leg && !self.may_cross) {
            let travel = self.planned_distance.min(remaining);
            let position = advance(leg.direction, self.position, travel);
            self.place(street, leg.direction, position);
        } else if last_leg {
            street.lanes().remove(leg.direction, self.id);
            self.position = advance(leg.direction, self.position, remaining);
            self.point = street.point_at(self.position);
            self.speed = 0.0;
            self.active = false;
            log::debug!("{} reached its destination at {} ms", self.id, ctx.time);
        } else {
            street.lanes().remove(leg.direction, self.id);
            let node = street.destination(leg.direction);
            self.crossings.push((ctx.time, node));
            self.leg += 1;
            let next_leg = self.route[self.leg];
            let Some(next) = ctx.map.street(next_leg.street) else {
                self.active = false;
                return;
            };
            let leftover = (self.planned_distance - remaining).max(0.0).min(next.length());
            let entry = next.entry_position(next_leg.direction);
            self.place(next, next_leg.direction, advance(next_leg.direction, entry, leftover));
        }
        self.may_cross = false;
        self.release_junction(ctx);
    }

    /// Returns to the start of the route. Lane entries on the map are left
    /// alone; replays start from a freshly built map.
    fn reset(&mut self) {
        self.leg = 0;
        self.position = self.start_position;
        self.point = self.start_point;
        self.speed = 0.0;
        self.planned_distance = 0.0;
        self.may_cross = false;
        self.active = true;
        self.holding_junction = None;
        self.communication_countdown = 0;
        self.beacon_countdown = 0;
        self.messages_sent = 0;
        self.beacons_sent = 0;
        self.encrypted_beacons_sent = 0;
        self.ids_runs = 0;
        self.junction_waits = 0;
        self.crossings.clear();
    }

    fn communication_countdown(&self) -> i64 {
        self.communication_countdown
    }

    fn beacon_countdown(&self) -> i64 {
        self.beacon_countdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::ids::RegionCoord;
    use crate::simulation_engine::street::{OneWay, StreetDisplay};

    fn ctx(map: &Map, time: u64) -> StepContext<'_> {
        StepContext {
            map,
            time,
            step_ms: 40,
            region: RegionCoord(0, 0),
        }
    }

    fn tick(map: &Map, vehicle: &mut RouteVehicle, time: u64) {
        let ctx = ctx(map, time);
        vehicle.adjust_speed(&ctx);
        vehicle.move_vehicle(&ctx);
    }

    #[test]
    fn drives_to_the_end_of_its_route() {
        let mut map = Map::new(10_000, 10_000, 10_000, 10_000).unwrap();
        let a = map.add_node(0, 0, false);
        let b = map.add_node(400, 0, false);
        let c = map.add_node(400, 400, false);
        map.add_street("", a, b, OneWay::TwoWay, 1, 1_000, StreetDisplay::default()).unwrap();
        let bc = map.add_street("", b, c, OneWay::TwoWay, 1, 1_000, StreetDisplay::default()).unwrap();
        map.finish_loading();

        let mut vehicle = RouteVehicle::from_nodes(VehicleId(1), &map, &[a, b, c], 2_000.0).unwrap();
        let mut time = 0;
        while vehicle.is_active() && time < 10_000 {
            time += 40;
            tick(&map, &mut vehicle, time);
            // Never faster than the street allows.
            assert!(vehicle.speed() <= 1_000.0 + 1e-9);
        }
        assert!(!vehicle.is_active());
        assert_eq!(vehicle.position(), (400, 400));
        assert_eq!(vehicle.crossings(), &[(400, b)]);
        assert_eq!(time, 800);
        assert!(map.street(bc).unwrap().lanes().is_empty());
    }

    #[test]
    fn keeps_distance_to_the_vehicle_ahead() {
        let mut map = Map::new(10_000, 10_000, 10_000, 10_000).unwrap();
        let a = map.add_node(0, 0, false);
        let b = map.add_node(5_000, 0, false);
        let ab = map.add_street("", a, b, OneWay::TwoWay, 1, 1_000, StreetDisplay::default()).unwrap();
        map.finish_loading();
        map.street(ab).unwrap().lanes().upsert(
            Direction::Forward,
            LaneOccupant { vehicle: VehicleId(99), position: 1_000.0, speed: 0.0 },
        );
        let mut vehicle = RouteVehicle::from_nodes(VehicleId(1), &map, &[a, b], 1_000.0).unwrap();
        for step in 1..=100 {
            tick(&map, &mut vehicle, step * 40);
        }
        assert!((vehicle.position_on_street() - (1_000.0 - MIN_VEHICLE_GAP)).abs() < 1e-6);
        assert!(vehicle.is_active());
        assert_eq!(vehicle.speed(), 0.0);
    }

    #[test]
    fn waits_for_green_at_a_signalled_junction() {
        let mut map = Map::new(20_000, 20_000, 10_000, 10_000).unwrap();
        let centre = map.add_node(5_000, 5_000, true);
        let west = map.add_node(0, 5_000, false);
        let east = map.add_node(10_000, 5_000, false);
        let north = map.add_node(5_000, 4_000, false);
        let south = map.add_node(5_000, 10_000, false);
        let d = StreetDisplay::default;
        map.add_street("Main", west, centre, OneWay::TwoWay, 1, 1_400, d()).unwrap();
        map.add_street("Main", centre, east, OneWay::TwoWay, 1, 1_400, d()).unwrap();
        map.add_street("Side", north, centre, OneWay::TwoWay, 1, 800, d()).unwrap();
        map.add_street("Side", centre, south, OneWay::TwoWay, 1, 800, d()).unwrap();
        map.finish_loading();

        let mut vehicle = RouteVehicle::from_nodes(VehicleId(1), &map, &[north, centre, south], 800.0).unwrap();
        let light = map.node(centre).unwrap().traffic_light.as_ref().unwrap();
        let mut time = 0;
        while time < 10_000 {
            time += 40;
            tick(&map, &mut vehicle, time);
            light.lock().unwrap().change_phases(40, &map);
            if time <= 9_000 {
                assert_eq!(vehicle.leg_index(), 0, "crossed on red at {time}");
            }
        }
        assert_eq!(vehicle.leg_index(), 1);
        assert_eq!(vehicle.crossings()[0], (9_040, centre));
        // Signalled junctions never queue anybody.
        assert_eq!(map.node(centre).unwrap().junction.as_ref().unwrap().waiting_count(), 0);
    }

    #[test]
    fn countdowns_gate_messages_and_reset_restores_the_start() {
        let mut map = Map::new(10_000, 10_000, 10_000, 10_000).unwrap();
        let a = map.add_node(0, 0, false);
        let b = map.add_node(5_000, 0, false);
        map.add_street("", a, b, OneWay::TwoWay, 1, 1_000, StreetDisplay::default()).unwrap();
        map.finish_loading();
        let mut vehicle = RouteVehicle::from_nodes(VehicleId(4), &map, &[a, b], 1_000.0).unwrap();
        let ctx = ctx(&map, 40);
        vehicle.adjust_speed(&ctx);
        assert!(vehicle.communication_countdown() < 1);
        vehicle.send_messages(&ctx);
        vehicle.send_encrypted_beacons(&ctx);
        assert_eq!(vehicle.communication_countdown(), DEFAULT_COMMUNICATION_INTERVAL - 40);
        assert_eq!(vehicle.beacon_countdown(), DEFAULT_BEACON_INTERVAL - 40);
        assert_eq!((vehicle.messages_sent(), vehicle.beacons_sent()), (1, 1));
        assert_eq!(vehicle.encrypted_beacons_sent(), 1);
        vehicle.move_vehicle(&ctx);
        assert_eq!(vehicle.position(), (40, 0));

        vehicle.reset();
        assert_eq!(vehicle.position(), (0, 0));
        assert_eq!(vehicle.messages_sent(), 0);
        assert!(vehicle.is_active());
    }

    #[test]
    fn empty_routes_are_rejected() {
        let mut map = Map::new(10_000, 10_000, 10_000, 10_000).unwrap();
        map.finish_loading();
        assert!(matches!(
            RouteVehicle::new(VehicleId(1), &map, Vec::new(), 1_000.0),
            Err(SimError::RouteTooShort)
        ));
    }
}
