use crate::control_system::traffic_light::SignalTimings;
use crate::error::{SimError, SimResult};
use crate::simulation_engine::events::Trip;
use crate::simulation_engine::ids::NodeId;
use crate::simulation_engine::map::Map;
use crate::simulation_engine::rsu::BasicRsu;
use crate::simulation_engine::street::{OneWay, StreetDisplay};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Key used by streets and scenarios to refer to this node.
    pub key: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub traffic_signal: bool,
    #[serde(default)]
    pub mix_zone_radius: Option<i32>,
    #[serde(default)]
    pub amenity: Option<String>,
}

fn default_lanes() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetDescription {
    #[serde(default)]
    pub name: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub oneway: OneWay,
    #[serde(default = "default_lanes")]
    pub lanes: u32,
    /// cm/s
    pub max_speed: i32,
    #[serde(default)]
    pub display: Option<StreetDisplay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsuDescription {
    pub x: i32,
    pub y: i32,
}

/// A map as stored on disk. Coordinates and lengths are in cm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDescription {
    pub width: i32,
    pub height: i32,
    pub region_width: i32,
    pub region_height: i32,
    #[serde(default)]
    pub signal_timings: Option<SignalTimings>,
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub streets: Vec<StreetDescription>,
    #[serde(default)]
    pub rsus: Vec<RsuDescription>,
}

/// A built map plus the node keys it was described with.
#[derive(Debug)]
pub struct LoadedMap {
    pub map: Map,
    pub nodes: HashMap<String, NodeId>,
}

impl MapDescription {
    pub fn load(path: &Path) -> SimResult<Self> {
        let file = File::open(path)?;
        let description: Self = serde_json::from_reader(BufReader::new(file))?;
        log::info!(
            "Read map {} with {} nodes and {} streets",
            path.display(),
            description.nodes.len(),
            description.streets.len()
        );
        Ok(description)
    }

    /// Builds and finishes the map. `fallback_timings` applies when the file names none.
    pub fn build(&self, fallback_timings: SignalTimings) -> SimResult<LoadedMap> {
        let mut map = Map::new(self.width, self.height, self.region_width, self.region_height)?;
        let timings = self.signal_timings.unwrap_or(fallback_timings);
        timings.validate()?;
        map.set_signal_timings(timings);

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if nodes.contains_key(&node.key) {
                return Err(invalid(format!("node key {:?} is used twice", node.key)));
            }
            let id = map.add_node(node.x, node.y, node.traffic_signal);
            if let Some(radius) = node.mix_zone_radius {
                map.set_mix_zone(id, radius)?;
            }
            if let Some(amenity) = &node.amenity {
                map.set_amenity(id, amenity.as_str())?;
            }
            nodes.insert(node.key.clone(), id);
        }

        for street in &self.streets {
            let start = lookup(&nodes, &street.start)?;
            let end = lookup(&nodes, &street.end)?;
            map.add_street(
                &street.name,
                start,
                end,
                street.oneway,
                street.lanes,
                street.max_speed,
                street.display.clone().unwrap_or_default(),
            )?;
        }

        for rsu in &self.rsus {
            map.add_rsu(Box::new(BasicRsu::new(rsu.x, rsu.y)));
        }

        map.finish_loading();
        Ok(LoadedMap { map, nodes })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDescription {
    pub start_ms: u64,
    /// Node keys, each directly connected to the next.
    pub path: Vec<String>,
    /// cm/s
    pub speed: f64,
}

/// Scheduled vehicles referring to the node keys of a `MapDescription`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescription {
    pub vehicles: Vec<VehicleDescription>,
}

impl ScenarioDescription {
    pub fn load(path: &Path) -> SimResult<Self> {
        let file = File::open(path)?;
        let description: Self = serde_json::from_reader(BufReader::new(file))?;
        log::info!(
            "Read scenario {} with {} vehicles",
            path.display(),
            description.vehicles.len()
        );
        Ok(description)
    }

    pub fn trips(&self, nodes: &HashMap<String, NodeId>) -> SimResult<Vec<Trip>> {
        self.vehicles
            .iter()
            .map(|vehicle| {
                let path = vehicle
                    .path
                    .iter()
                    .map(|key| lookup(nodes, key))
                    .collect::<SimResult<Vec<_>>>()?;
                Ok(Trip {
                    start_ms: vehicle.start_ms,
                    path,
                    desired_speed: vehicle.speed,
                })
            })
            .collect()
    }
}

fn lookup(nodes: &HashMap<String, NodeId>, key: &str) -> SimResult<NodeId> {
    nodes
        .get(key)
        .copied()
        .ok_or_else(|| invalid(format!("unknown node key {key:?}")))
}

fn invalid(message: String) -> SimError {
    log::error!("{}", message);
    SimError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T_JUNCTION: &str = r#"{
        "width": 20000, "height": 20000, "region_width": 10000, "region_height": 10000,
        "nodes": [
            { "key": "west", "x": 1000, "y": 5000 },
            { "key": "centre", "x": 9000, "y": 5000, "traffic_signal": true },
            { "key": "east", "x": 17000, "y": 5000 },
            { "key": "south", "x": 9000, "y": 15000, "amenity": "school" }
        ],
        "streets": [
            { "name": "Main", "start": "west", "end": "centre", "max_speed": 1400 },
            { "name": "Main", "start": "centre", "end": "east", "max_speed": 1400 },
            { "name": "Side", "start": "south", "end": "centre", "oneway": "forward", "max_speed": 800 }
        ],
        "rsus": [ { "x": 9000, "y": 6000 } ]
    }"#;

    #[test]
    fn builds_a_t_junction_with_a_light() {
        let description: MapDescription = serde_json::from_str(T_JUNCTION).unwrap();
        let loaded = description.build(SignalTimings::default()).unwrap();
        let map = &loaded.map;
        assert!(map.is_ready());
        assert_eq!(map.node_count(), 4);
        assert_eq!(map.street_count(), 3);
        assert_eq!(map.junction_count(), 1);
        assert_eq!(map.traffic_light_count(), 1);

        let centre = loaded.nodes["centre"];
        let junction = map.node(centre).unwrap().junction.as_ref().unwrap();
        let names: Vec<&str> = junction
            .priority_streets()
            .iter()
            .map(|id| map.street(*id).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["Main", "Main"]);
        assert_eq!(
            map.node(loaded.nodes["south"]).unwrap().amenity.as_deref(),
            Some("school")
        );
    }

    #[test]
    fn unknown_and_duplicate_keys_are_configuration_errors() {
        let mut description: MapDescription = serde_json::from_str(T_JUNCTION).unwrap();
        description.streets[0].end = "nowhere".to_string();
        assert!(matches!(
            description.build(SignalTimings::default()),
            Err(SimError::InvalidConfig(_))
        ));

        let mut description: MapDescription = serde_json::from_str(T_JUNCTION).unwrap();
        description.nodes[1].key = "west".to_string();
        assert!(matches!(
            description.build(SignalTimings::default()),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn scenario_keys_resolve_to_trips() {
        let description: MapDescription = serde_json::from_str(T_JUNCTION).unwrap();
        let loaded = description.build(SignalTimings::default()).unwrap();
        let scenario: ScenarioDescription = serde_json::from_str(
            r#"{ "vehicles": [
                { "start_ms": 0, "path": ["south", "centre", "east"], "speed": 900.0 },
                { "start_ms": 400, "path": ["west", "centre"], "speed": 1200.0 }
            ] }"#,
        )
        .unwrap();
        let trips = scenario.trips(&loaded.nodes).unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(
            trips[0].path,
            vec![loaded.nodes["south"], loaded.nodes["centre"], loaded.nodes["east"]]
        );
        assert_eq!(trips[1].start_ms, 400);

        let broken = ScenarioDescription {
            vehicles: vec![VehicleDescription {
                start_ms: 0,
                path: vec!["west".to_string(), "moon".to_string()],
                speed: 1.0,
            }],
        };
        assert!(broken.trips(&loaded.nodes).is_err());
    }
}
