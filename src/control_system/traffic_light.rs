// src/control_system/traffic_light.rs
use crate::error::{SimError, SimResult};
use crate::global_variables::{
    DEFAULT_PRIORITY_GREEN_TIME, DEFAULT_SECONDARY_GREEN_TIME, DEFAULT_YELLOW_TIME,
    JUNCTION_FREE_TIME, TRAFFIC_LIGHT_RADIUS,
};
use crate::simulation_engine::ids::{NodeId, StreetId};
use crate::simulation_engine::junction::Junction;
use crate::simulation_engine::map::Map;
use serde::{Deserialize, Serialize};

/// Phase lengths of every traffic light on a map, in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTimings {
    pub priority_green_ms: u64,
    pub yellow_ms: u64,
    /// All-red time between the two sides.
    pub clearance_ms: u64,
    pub secondary_green_ms: u64,
}

impl Default for SignalTimings {
    fn default() -> Self {
        Self {
            priority_green_ms: DEFAULT_PRIORITY_GREEN_TIME,
            yellow_ms: DEFAULT_YELLOW_TIME,
            clearance_ms: JUNCTION_FREE_TIME,
            secondary_green_ms: DEFAULT_SECONDARY_GREEN_TIME,
        }
    }
}

impl SignalTimings {
    pub fn validate(&self) -> SimResult<()> {
        let all = [
            self.priority_green_ms,
            self.yellow_ms,
            self.clearance_ms,
            self.secondary_green_ms,
        ];
        if all.iter().any(|ms| *ms == 0) {
            return Err(SimError::InvalidConfig(format!(
                "signal phases must be longer than 0 ms: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Duration of one full cycle serving both sides once.
    pub fn cycle_ms(&self) -> u64 {
        self.priority_green_ms
            + self.secondary_green_ms
            + 2 * (self.yellow_ms + self.clearance_ms + self.yellow_ms)
    }
}

/// What one arm of a junction currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightColor {
    Red,
    RedYellow,
    Yellow,
    Green,
}

impl LightColor {
    pub fn may_pass(self) -> bool {
        self == LightColor::Green
    }
}

/// One street touching a signalled junction.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalArm {
    pub street: StreetId,
    /// True if the junction is the street's start node.
    pub at_start: bool,
    pub is_priority: bool,
    /// Where a renderer draws this arm's light.
    pub anchor: (i32, i32),
}

/// Four-phase light alternating between the priority and the secondary streets of a junction.
///
/// State 0 shows green to the favoured side, state 1 yellow, state 2 is an
/// all-red clearance and state 3 shows red-yellow to the side about to get
/// green. Entering state 0 again flips the favoured side.
#[derive(Debug, Clone)]
pub struct TrafficLight {
    node: NodeId,
    arms: Vec<SignalArm>,
    state: u8,
    favor_priority: bool,
    /// Time left in the current state. Negative values carry into the next one.
    timer: i64,
    timings: SignalTimings,
}

impl TrafficLight {
    pub fn new(map: &Map, junction: &Junction, timings: &SignalTimings) -> Self {
        let node = junction.node();
        let centre = map.node(node).map(|n| n.position()).unwrap_or_default();
        let arms = map
            .node(node)
            .map(|n| n.crossing_streets.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| map.street(*id))
            .map(|street| {
                let at_start = street.start == node;
                let neighbour = if at_start {
                    street.end_point
                } else {
                    street.start_point
                };
                SignalArm {
                    street: street.id,
                    at_start,
                    is_priority: junction.is_priority_street(street.id),
                    anchor: calculate_traffic_light_position(centre, neighbour),
                }
            })
            .collect();

        Self {
            node,
            arms,
            state: 0,
            favor_priority: true,
            timer: timings.priority_green_ms as i64,
            timings: *timings,
        }
    }

    fn phase_duration(&self, state: u8) -> u64 {
        let ms = match state {
            0 if self.favor_priority => self.timings.priority_green_ms,
            0 => self.timings.secondary_green_ms,
            1 | 3 => self.timings.yellow_ms,
            _ => self.timings.clearance_ms,
        };
        ms.max(1)
    }

    /// Advances the light by `dt` ms. Returns true if the state changed, in
    /// which case the new codes have already been pushed to the streets.
    pub fn change_phases(&mut self, dt: u64, map: &Map) -> bool {
        self.timer -= dt as i64;
        let mut changed = false;
        while self.timer <= 0 {
            self.state = (self.state + 1) % 4;
            if self.state == 0 {
                self.favor_priority = !self.favor_priority;
            }
            self.timer += self.phase_duration(self.state) as i64;
            changed = true;
        }
        if changed {
            log::trace!(
                "Light at {} now in state {} (priority favoured: {})",
                self.node,
                self.state,
                self.favor_priority
            );
            self.push_states(map);
        }
        changed
    }

    pub fn color_of(&self, arm: &SignalArm) -> LightColor {
        let favoured = arm.is_priority == self.favor_priority;
        match (self.state, favoured) {
            (0, true) => LightColor::Green,
            (1, true) => LightColor::Yellow,
            (3, false) => LightColor::RedYellow,
            _ => LightColor::Red,
        }
    }

    /// The code stored at a street end: `state << 1 | may_pass`.
    pub fn code_of(&self, arm: &SignalArm) -> u8 {
        (self.state << 1) | u8::from(self.color_of(arm).may_pass())
    }

    /// Writes the current code of every arm into its street.
    pub fn push_states(&self, map: &Map) {
        for arm in &self.arms {
            let Some(street) = map.street(arm.street) else {
                continue;
            };
            let code = self.code_of(arm);
            if arm.at_start {
                street.update_start_node_traffic_light_state(code);
            } else {
                street.update_end_node_traffic_light_state(code);
            }
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn arms(&self) -> &[SignalArm] {
        &self.arms
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn favors_priority(&self) -> bool {
        self.favor_priority
    }

    pub fn remaining_ms(&self) -> i64 {
        self.timer
    }

    pub fn color_for_street(&self, street: StreetId) -> Option<LightColor> {
        self.arms
            .iter()
            .find(|a| a.street == street)
            .map(|a| self.color_of(a))
    }
}

/// Where the line from `node` towards `neighbour` meets the circle of
/// `TRAFFIC_LIGHT_RADIUS` around `node`.
pub fn calculate_traffic_light_position(node: (i32, i32), neighbour: (i32, i32)) -> (i32, i32) {
    let dx = f64::from(neighbour.0 - node.0);
    let dy = f64::from(neighbour.1 - node.1);
    let length = dx.hypot(dy);
    if length == 0.0 {
        return node;
    }
    (
        (f64::from(node.0) + dx / length * TRAFFIC_LIGHT_RADIUS).round() as i32,
        (f64::from(node.1) + dy / length * TRAFFIC_LIGHT_RADIUS).round() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::street::{Direction, OneWay, StreetDisplay};

    /// Signalled plus crossing. Returns `(map, centre, main streets, side streets)`.
    fn signalled_map() -> (Map, NodeId, [StreetId; 2], [StreetId; 2]) {
        let mut map = Map::new(20_000, 20_000, 10_000, 10_000).unwrap();
        let centre = map.add_node(5_000, 5_000, true);
        let west = map.add_node(0, 5_000, false);
        let east = map.add_node(10_000, 5_000, false);
        let north = map.add_node(5_000, 0, false);
        let south = map.add_node(5_000, 10_000, false);
        let d = StreetDisplay::default;
        let w = map.add_street("Main", west, centre, OneWay::TwoWay, 1, 1_400, d()).unwrap();
        let e = map.add_street("Main", centre, east, OneWay::TwoWay, 1, 1_400, d()).unwrap();
        let n = map.add_street("Side", north, centre, OneWay::TwoWay, 1, 800, d()).unwrap();
        let s = map.add_street("Side", south, centre, OneWay::TwoWay, 1, 800, d()).unwrap();
        map.finish_loading();
        (map, centre, [w, e], [n, s])
    }

    fn may_pass(map: &Map, street: StreetId, centre: NodeId) -> bool {
        let street = map.street(street).unwrap();
        let direction = street.direction_towards(centre).unwrap();
        street.can_pass_traffic_light(direction)
    }

    #[test]
    fn initial_codes_favour_priority_streets() {
        let (map, centre, [w, e], [n, s]) = signalled_map();
        assert_eq!(map.traffic_light_count(), 1);
        let junction = map.node(centre).unwrap().junction.as_ref().unwrap();
        let mut priority = junction.priority_streets().to_vec();
        priority.sort();
        // "Side" also continues, but "Main" is faster.
        assert_eq!(priority, vec![w, e]);
        assert!(may_pass(&map, w, centre));
        assert!(may_pass(&map, e, centre));
        assert!(!may_pass(&map, n, centre));
        assert!(!may_pass(&map, s, centre));
        assert_eq!(map.street(w).unwrap().signal_code(centre), Some(1));
        assert_eq!(map.street(n).unwrap().signal_code(centre), Some(0));
    }

    #[test]
    fn cycle_runs_through_all_states_and_alternates() {
        let (map, centre, [w, _], [n, _]) = signalled_map();
        let timings = SignalTimings::default();
        let mut light = map.node(centre).unwrap().traffic_light.as_ref().unwrap().lock().unwrap();

        let mut seen = vec![(light.state(), light.favors_priority())];
        let mut elapsed = 0;
        while elapsed < timings.cycle_ms() {
            if light.change_phases(40, &map) {
                seen.push((light.state(), light.favors_priority()));
            }
            elapsed += 40;
        }
        assert_eq!(
            seen,
            vec![
                (0, true),
                (1, true),
                (2, true),
                (3, true),
                (0, false),
                (1, false),
                (2, false),
                (3, false),
                (0, true),
            ]
        );
        assert_eq!(timings.cycle_ms(), 18_000);
        assert_eq!(light.color_for_street(w), Some(LightColor::Green));
        assert_eq!(light.color_for_street(n), Some(LightColor::Red));
    }

    #[test]
    fn both_sides_are_never_green_together() {
        let (map, centre, main, side) = signalled_map();
        let mut light = map.node(centre).unwrap().traffic_light.as_ref().unwrap().lock().unwrap();
        let mut side_green = false;
        for _ in 0..(2 * 18_000 / 40) {
            light.change_phases(40, &map);
            let main_open = main.iter().any(|s| may_pass(&map, *s, centre));
            let side_open = side.iter().any(|s| may_pass(&map, *s, centre));
            assert!(!(main_open && side_open));
            side_green |= side_open;
        }
        assert!(side_green);
    }

    #[test]
    fn phase_colours_and_codes() {
        let (map, centre, [w, _], [n, _]) = signalled_map();
        let mut light = map.node(centre).unwrap().traffic_light.as_ref().unwrap().lock().unwrap();

        // Overshoot carries into the next state.
        assert!(light.change_phases(5_040, &map));
        assert_eq!(light.state(), 1);
        assert_eq!(light.remaining_ms(), 960);
        assert_eq!(light.color_for_street(w), Some(LightColor::Yellow));
        assert_eq!(map.street(w).unwrap().signal_code(centre), Some(2));

        light.change_phases(960, &map);
        assert_eq!(light.state(), 2);
        assert_eq!(light.color_for_street(w), Some(LightColor::Red));
        assert_eq!(light.color_for_street(n), Some(LightColor::Red));

        light.change_phases(JUNCTION_FREE_TIME, &map);
        assert_eq!(light.state(), 3);
        assert_eq!(light.color_for_street(n), Some(LightColor::RedYellow));
        assert_eq!(map.street(n).unwrap().signal_code(centre), Some(6));
        assert!(!map
            .street(n)
            .unwrap()
            .can_pass_traffic_light(Direction::Forward));
    }

    #[test]
    fn removing_the_junction_clears_the_codes() {
        let (mut map, centre, [w, _], [n, s]) = signalled_map();
        map.del_street(n).unwrap();
        map.del_street(s).unwrap();
        assert!(map.node(centre).unwrap().traffic_light.is_none());
        assert_eq!(map.street(w).unwrap().signal_code(centre), None);
    }

    #[test]
    fn light_anchors_sit_on_the_radius() {
        assert_eq!(
            calculate_traffic_light_position((5_000, 5_000), (10_000, 5_000)),
            (6_000, 5_000)
        );
        assert_eq!(
            calculate_traffic_light_position((5_000, 5_000), (5_000, 0)),
            (5_000, 4_000)
        );
        assert_eq!(
            calculate_traffic_light_position((0, 0), (3_000, 4_000)),
            (600, 800)
        );
        assert_eq!(calculate_traffic_light_position((7, 7), (7, 7)), (7, 7));
    }

    #[test]
    fn zero_length_phases_are_rejected() {
        let timings = SignalTimings {
            yellow_ms: 0,
            ..SignalTimings::default()
        };
        assert!(matches!(timings.validate(), Err(SimError::InvalidConfig(_))));
        assert!(SignalTimings::default().validate().is_ok());
    }
}
