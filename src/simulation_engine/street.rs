use crate::error::{SimError, SimResult};
use crate::global_variables::LANE_WIDTH;
use crate::shared_data::lock;
use crate::simulation_engine::ids::{NodeId, RegionCoord, StreetId, VehicleId};
use crate::simulation_engine::node::Node;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Signal code stored for a street end without a traffic light.
pub const NO_SIGNAL: u8 = u8::MAX;

/// How a street may be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneWay {
    /// Standard bidirectional street.
    #[default]
    TwoWay,
    /// One-way from start to end.
    Forward,
    /// One-way from end to start; normalised to `Forward` on construction.
    Backward,
}

/// Travel direction along a street.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Start node towards end node.
    Forward,
    /// End node towards start node.
    Backward,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Whatever currently occupies a lane, at `position` cm from the street's start node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneOccupant {
    pub vehicle: VehicleId,
    pub position: f64,
    pub speed: f64,
}

/// Both lane containers of a street. Each is kept sorted by `(position, vehicle)`.
#[derive(Debug, Default)]
pub struct StreetLanes {
    forward: Vec<LaneOccupant>,
    backward: Vec<LaneOccupant>,
}

impl StreetLanes {
    pub fn occupants(&self, direction: Direction) -> &[LaneOccupant] {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn lane_mut(&mut self, direction: Direction) -> &mut Vec<LaneOccupant> {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        }
    }

    /// Inserts the occupant or moves its existing entry.
    pub fn upsert(&mut self, direction: Direction, occupant: LaneOccupant) {
        let lane = self.lane_mut(direction);
        lane.retain(|o| o.vehicle != occupant.vehicle);
        let index = lane.partition_point(|o| {
            o.position < occupant.position
                || (o.position == occupant.position && o.vehicle < occupant.vehicle)
        });
        lane.insert(index, occupant);
    }

    pub fn remove(&mut self, direction: Direction, vehicle: VehicleId) -> bool {
        let lane = self.lane_mut(direction);
        let before = lane.len();
        lane.retain(|o| o.vehicle != vehicle);
        lane.len() != before
    }

    /// The occupant closest to the node this lane leads to.
    pub fn nearest_to_destination(&self, direction: Direction) -> Option<&LaneOccupant> {
        match direction {
            Direction::Forward => self.forward.last(),
            Direction::Backward => self.backward.first(),
        }
    }

    /// The closest occupant strictly ahead of `position` in travel direction.
    pub fn next_ahead(&self, direction: Direction, position: f64) -> Option<&LaneOccupant> {
        match direction {
            Direction::Forward => self.forward.iter().find(|o| o.position > position),
            Direction::Backward => self.backward.iter().rev().find(|o| o.position < position),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len() + self.backward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.backward.is_empty()
    }
}

/// Purely visual attributes, carried along for renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetDisplay {
    pub color: [u8; 3],
    pub street_type: String,
}

impl Default for StreetDisplay {
    fn default() -> Self {
        Self {
            color: [255, 255, 255],
            street_type: "residential".to_string(),
        }
    }
}

/// A graph edge between two nodes.
#[derive(Debug)]
pub struct Street {
    pub id: StreetId,
    pub name: String,
    pub start: NodeId,
    pub end: NodeId,
    pub start_point: (i32, i32),
    pub end_point: (i32, i32),
    /// One-way streets are always drivable from `start` to `end` only.
    pub oneway: bool,
    pub lanes_per_direction: u32,
    /// Speed limit in cm/s.
    pub max_speed: i32,
    pub display: StreetDisplay,
    length: f64,
    lane_offset: (f64, f64),
    pub(crate) main_region: RegionCoord,
    lanes: Mutex<StreetLanes>,
    start_signal: AtomicU8,
    end_signal: AtomicU8,
}

impl Street {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: StreetId,
        name: impl Into<String>,
        start: &Node,
        end: &Node,
        oneway: OneWay,
        lanes_per_direction: u32,
        max_speed: i32,
        display: StreetDisplay,
    ) -> SimResult<Self> {
        if start.id == end.id {
            return Err(SimError::DegenerateStreet(start.id));
        }
        let (start, end) = match oneway {
            OneWay::Backward => (end, start),
            _ => (start, end),
        };
        let dx = f64::from(end.x - start.x);
        let dy = f64::from(end.y - start.y);
        let length = dx.hypot(dy);
        let lanes = lanes_per_direction.max(1);
        // Unit normal to the right of start->end (screen coordinates, y down).
        let lane_offset = if length > 0.0 {
            (-dy / length * LANE_WIDTH, dx / length * LANE_WIDTH)
        } else {
            (0.0, 0.0)
        };

        Ok(Self {
            id,
            name: name.into(),
            start: start.id,
            end: end.id,
            start_point: start.position(),
            end_point: end.position(),
            oneway: oneway != OneWay::TwoWay,
            lanes_per_direction: lanes,
            max_speed: max_speed.max(1),
            display,
            length,
            lane_offset,
            main_region: start.region.unwrap_or(RegionCoord(0, 0)),
            lanes: Mutex::new(StreetLanes::default()),
            start_signal: AtomicU8::new(NO_SIGNAL),
            end_signal: AtomicU8::new(NO_SIGNAL),
        })
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn lane_offset(&self) -> (f64, f64) {
        self.lane_offset
    }

    pub fn main_region(&self) -> RegionCoord {
        self.main_region
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.start == node || self.end == node
    }

    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if node == self.start {
            Some(self.end)
        } else if node == self.end {
            Some(self.start)
        } else {
            None
        }
    }

    /// Direction of travel when departing from `node`, if allowed.
    pub fn direction_from(&self, node: NodeId) -> Option<Direction> {
        if node == self.start {
            Some(Direction::Forward)
        } else if node == self.end && !self.oneway {
            Some(Direction::Backward)
        } else {
            None
        }
    }

    /// Direction of travel when arriving at `node`, if allowed.
    pub fn direction_towards(&self, node: NodeId) -> Option<Direction> {
        if node == self.end {
            Some(Direction::Forward)
        } else if node == self.start && !self.oneway {
            Some(Direction::Backward)
        } else {
            None
        }
    }

    /// True if traffic can arrive at `node` over this street.
    pub fn feeds(&self, node: NodeId) -> bool {
        self.direction_towards(node).is_some()
    }

    pub fn destination(&self, direction: Direction) -> NodeId {
        match direction {
            Direction::Forward => self.end,
            Direction::Backward => self.start,
        }
    }

    pub fn origin(&self, direction: Direction) -> NodeId {
        self.destination(direction.opposite())
    }

    /// Remaining distance to the destination node for something at `position`.
    pub fn distance_to_destination(&self, direction: Direction, position: f64) -> f64 {
        match direction {
            Direction::Forward => (self.length - position).max(0.0),
            Direction::Backward => position.max(0.0),
        }
    }

    /// Position along the street at which travel in `direction` begins.
    pub fn entry_position(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Forward => 0.0,
            Direction::Backward => self.length,
        }
    }

    /// Point at `position` cm from the start node.
    pub fn point_at(&self, position: f64) -> (i32, i32) {
        if self.length <= 0.0 {
            return self.start_point;
        }
        let t = (position / self.length).clamp(0.0, 1.0);
        let x = f64::from(self.start_point.0)
            + f64::from(self.end_point.0 - self.start_point.0) * t;
        let y = f64::from(self.start_point.1)
            + f64::from(self.end_point.1 - self.start_point.1) * t;
        (x.round() as i32, y.round() as i32)
    }

    pub fn lanes(&self) -> MutexGuard<'_, StreetLanes> {
        lock(&self.lanes)
    }

    pub fn update_start_node_traffic_light_state(&self, code: u8) {
        self.start_signal.store(code % 8, Ordering::Release);
    }

    pub fn update_end_node_traffic_light_state(&self, code: u8) {
        self.end_signal.store(code % 8, Ordering::Release);
    }

    pub(crate) fn clear_traffic_light_state(&self, node: NodeId) {
        if node == self.start {
            self.start_signal.store(NO_SIGNAL, Ordering::Release);
        }
        if node == self.end {
            self.end_signal.store(NO_SIGNAL, Ordering::Release);
        }
    }

    /// The signal code shown to traffic arriving at `node`, if that end is signalled.
    pub fn signal_code(&self, node: NodeId) -> Option<u8> {
        let code = if node == self.start {
            self.start_signal.load(Ordering::Acquire)
        } else if node == self.end {
            self.end_signal.load(Ordering::Acquire)
        } else {
            NO_SIGNAL
        };
        (code != NO_SIGNAL).then_some(code)
    }

    /// True unless the light at the destination end currently forbids passing.
    pub fn can_pass_traffic_light(&self, direction: Direction) -> bool {
        match self.signal_code(self.destination(direction)) {
            Some(code) => code & 1 == 1,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, x: i32, y: i32) -> Node {
        Node::new(NodeId(id), x, y, false)
    }

    #[test]
    fn backward_oneway_is_normalised() {
        let a = node(0, 0, 0);
        let b = node(1, 1000, 0);
        let street = Street::new(
            StreetId(0),
            "Main",
            &a,
            &b,
            OneWay::Backward,
            1,
            1000,
            StreetDisplay::default(),
        )
        .unwrap();
        assert_eq!(street.start, NodeId(1));
        assert_eq!(street.end, NodeId(0));
        assert!(street.oneway);
        assert_eq!(street.direction_from(NodeId(1)), Some(Direction::Forward));
        assert_eq!(street.direction_from(NodeId(0)), None);
        assert!(street.feeds(NodeId(0)));
        assert!(!street.feeds(NodeId(1)));
    }

    #[test]
    fn degenerate_street_is_rejected() {
        let a = node(3, 0, 0);
        let result = Street::new(
            StreetId(0),
            "",
            &a,
            &a,
            OneWay::TwoWay,
            1,
            1000,
            StreetDisplay::default(),
        );
        assert!(matches!(result, Err(SimError::DegenerateStreet(NodeId(3)))));
    }

    #[test]
    fn lanes_stay_sorted_and_find_leaders() {
        let mut lanes = StreetLanes::default();
        let occ = |v: u64, p: f64| LaneOccupant {
            vehicle: VehicleId(v),
            position: p,
            speed: 0.0,
        };
        lanes.upsert(Direction::Forward, occ(1, 500.0));
        lanes.upsert(Direction::Forward, occ(2, 100.0));
        lanes.upsert(Direction::Forward, occ(3, 900.0));
        lanes.upsert(Direction::Forward, occ(2, 700.0));
        let order: Vec<u64> = lanes
            .occupants(Direction::Forward)
            .iter()
            .map(|o| o.vehicle.0)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(
            lanes.nearest_to_destination(Direction::Forward).unwrap().vehicle,
            VehicleId(3)
        );
        assert_eq!(
            lanes.next_ahead(Direction::Forward, 500.0).unwrap().vehicle,
            VehicleId(2)
        );

        lanes.upsert(Direction::Backward, occ(4, 300.0));
        lanes.upsert(Direction::Backward, occ(5, 800.0));
        assert_eq!(
            lanes.nearest_to_destination(Direction::Backward).unwrap().vehicle,
            VehicleId(4)
        );
        assert_eq!(
            lanes.next_ahead(Direction::Backward, 800.0).unwrap().vehicle,
            VehicleId(4)
        );
        assert!(lanes.remove(Direction::Backward, VehicleId(4)));
        assert!(!lanes.remove(Direction::Backward, VehicleId(4)));
        assert_eq!(lanes.len(), 4);
    }

    #[test]
    fn signal_low_bit_gates_passing() {
        let a = node(0, 0, 0);
        let b = node(1, 0, 1000);
        let street = Street::new(
            StreetId(0),
            "",
            &a,
            &b,
            OneWay::TwoWay,
            1,
            1000,
            StreetDisplay::default(),
        )
        .unwrap();
        assert!(street.can_pass_traffic_light(Direction::Forward));
        street.update_end_node_traffic_light_state(2);
        assert!(!street.can_pass_traffic_light(Direction::Forward));
        street.update_end_node_traffic_light_state(9);
        assert_eq!(street.signal_code(NodeId(1)), Some(1));
        assert!(street.can_pass_traffic_light(Direction::Forward));
        assert!(street.can_pass_traffic_light(Direction::Backward));
        street.clear_traffic_light_state(NodeId(1));
        assert_eq!(street.signal_code(NodeId(1)), None);
    }
}
