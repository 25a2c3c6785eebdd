#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use vanet_simulation::monitoring::renderer::Renderer;
use vanet_simulation::simulation_engine::ids::{NodeId, RegionCoord, VehicleId};
use vanet_simulation::simulation_engine::street::{OneWay, StreetDisplay};
use vanet_simulation::Map;

/// A T-junction: "Main" runs west-east through `centre`, "Side" comes up from `south`.
pub struct TJunction {
    pub map: Map,
    pub west: NodeId,
    pub centre: NodeId,
    pub east: NodeId,
    pub south: NodeId,
}

pub fn t_junction(signalled: bool) -> TJunction {
    let mut map = Map::new(20_000, 20_000, 10_000, 10_000).unwrap();
    let west = map.add_node(1_000, 5_000, false);
    let centre = map.add_node(9_000, 5_000, signalled);
    let east = map.add_node(17_000, 5_000, false);
    let south = map.add_node(9_000, 15_000, false);
    let display = StreetDisplay::default;
    map.add_street("Main", west, centre, OneWay::TwoWay, 1, 1_400, display())
        .unwrap();
    map.add_street("Main", centre, east, OneWay::TwoWay, 1, 1_400, display())
        .unwrap();
    map.add_street("Side", south, centre, OneWay::TwoWay, 1, 1_000, display())
        .unwrap();
    map.finish_loading();
    TJunction {
        map,
        west,
        centre,
        east,
        south,
    }
}

/// One junction grant observed between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Grant {
    pub time: u64,
    pub node: NodeId,
    pub vehicle: VehicleId,
}

/// A junction seen occupied after one frame and free after the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Release {
    pub time: u64,
    pub node: NodeId,
}

#[derive(Debug, Default)]
pub struct GrantLog {
    pub grants: Vec<Grant>,
    pub releases: Vec<Release>,
    /// Largest number of grants any junction gave within one tick.
    pub max_grants_per_tick: u64,
    pub frames: u64,
    passes: Vec<(NodeId, u64)>,
    occupied: BTreeSet<NodeId>,
    time: u64,
}

/// Renderer that records every junction grant. Use it with `SimulationMaster::step`.
pub struct GrantRecorder {
    pub log: Arc<Mutex<GrantLog>>,
}

impl GrantRecorder {
    pub fn new() -> (Self, Arc<Mutex<GrantLog>>) {
        let log = Arc::new(Mutex::new(GrantLog::default()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl Renderer for GrantRecorder {
    fn set_time_passed(&mut self, time: u64) {
        self.log.lock().unwrap().time = time;
    }

    fn set_running(&mut self, _running: bool) {}

    fn render_frame(&mut self, map: &Map, _changed: &BTreeSet<RegionCoord>) {
        let mut log = self.log.lock().unwrap();
        log.frames += 1;
        let time = log.time;
        let current: Vec<(NodeId, u64)> = map.junctions().map(|j| (j.node(), j.passes())).collect();
        for junction in map.junctions() {
            let before = log
                .passes
                .iter()
                .find(|(node, _)| *node == junction.node())
                .map_or(0, |(_, passes)| *passes);
            let delta = junction.passes() - before;
            log.max_grants_per_tick = log.max_grants_per_tick.max(delta);
            if delta > 0 {
                if let Some((granted_at, vehicle)) = junction.last_granted() {
                    assert_eq!(granted_at, time);
                    log.grants.push(Grant {
                        time,
                        node: junction.node(),
                        vehicle,
                    });
                }
            }
        }
        log.passes = current;

        let occupied: BTreeSet<NodeId> = map
            .junctions()
            .filter(|j| j.is_vehicle_on_junction())
            .map(|j| j.node())
            .collect();
        let released: Vec<Release> = log
            .occupied
            .difference(&occupied)
            .map(|node| Release { time, node: *node })
            .collect();
        log.releases.extend(released);
        log.occupied = occupied;
    }
}
