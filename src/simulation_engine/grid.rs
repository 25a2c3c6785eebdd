use crate::control_system::traffic_light::SignalTimings;
use crate::error::{SimError, SimResult};
use crate::simulation_engine::events::Trip;
use crate::simulation_engine::ids::NodeId;
use crate::simulation_engine::map::Map;
use crate::simulation_engine::street::{OneWay, StreetDisplay};
use rand::rngs::SmallRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};

/// Layout of a synthetic Manhattan grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridOptions {
    pub columns: usize,
    pub rows: usize,
    /// Distance between neighbouring crossings (cm).
    pub spacing: i32,
    /// Side length of a map region (cm).
    pub region_size: i32,
    /// Limit on the north-south avenues (cm/s). Faster than the streets so they get priority.
    pub avenue_speed: i32,
    /// Limit on the east-west streets (cm/s).
    pub street_speed: i32,
    /// Put a traffic light on every crossing whose row and column are multiples of this. 0 disables signals.
    pub signal_every: usize,
    pub signal_timings: SignalTimings,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            columns: 5,
            rows: 5,
            spacing: 10_000,
            region_size: 20_000,
            avenue_speed: 1_400,
            street_speed: 1_000,
            signal_every: 0,
            signal_timings: SignalTimings::default(),
        }
    }
}

/// A finished grid map plus its crossings, indexed `[row][column]`.
#[derive(Debug)]
pub struct GridMap {
    pub map: Map,
    pub nodes: Vec<Vec<NodeId>>,
}

impl GridMap {
    pub fn node(&self, row: usize, column: usize) -> Option<NodeId> {
        self.nodes.get(row)?.get(column).copied()
    }
}

/// Builds a grid of two-way streets. Streets run east-west and are named
/// `Street {row}`; avenues run north-south and are named `Avenue {column}`.
pub fn build_grid_map(options: &GridOptions) -> SimResult<GridMap> {
    if options.columns < 2 || options.rows < 2 {
        log::error!(
            "A grid needs at least 2x2 crossings, got {}x{}",
            options.columns,
            options.rows
        );
        return Err(SimError::InvalidConfig(format!(
            "grid of {}x{} crossings is too small",
            options.columns, options.rows
        )));
    }
    options.signal_timings.validate()?;

    let width = options.columns as i32 * options.spacing;
    let height = options.rows as i32 * options.spacing;
    let mut map = Map::new(width, height, options.region_size, options.region_size)?;
    map.set_signal_timings(options.signal_timings);

    let margin = options.spacing / 2;
    let signalled = |row: usize, column: usize| {
        options.signal_every > 0
            && row % options.signal_every == 0
            && column % options.signal_every == 0
    };
    let nodes: Vec<Vec<NodeId>> = (0..options.rows)
        .map(|row| {
            (0..options.columns)
                .map(|column| {
                    map.add_node(
                        margin + column as i32 * options.spacing,
                        margin + row as i32 * options.spacing,
                        signalled(row, column),
                    )
                })
                .collect()
        })
        .collect();

    let street_display = StreetDisplay::default();
    let avenue_display = StreetDisplay {
        color: [255, 200, 80],
        street_type: "primary".to_string(),
    };
    for (row, line) in nodes.iter().enumerate() {
        let name = format!("Street {}", row + 1);
        for pair in line.windows(2) {
            map.add_street(
                &name,
                pair[0],
                pair[1],
                OneWay::TwoWay,
                1,
                options.street_speed,
                street_display.clone(),
            )?;
        }
    }
    for column in 0..options.columns {
        let name = format!("Avenue {}", column + 1);
        for row in 1..options.rows {
            map.add_street(
                &name,
                nodes[row - 1][column],
                nodes[row][column],
                OneWay::TwoWay,
                1,
                options.avenue_speed,
                avenue_display.clone(),
            )?;
        }
    }

    map.finish_loading();
    Ok(GridMap { map, nodes })
}

/// Parameters for a random set of trips.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOptions {
    pub vehicles: usize,
    pub seed: u64,
    /// Start times are drawn from `0..=spawn_window_ms`.
    pub spawn_window_ms: u64,
    pub min_speed: f64,
    pub max_speed: f64,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            vehicles: 50,
            seed: 1,
            spawn_window_ms: 30_000,
            min_speed: 800.0,
            max_speed: 1_600.0,
        }
    }
}

/// Draws random trips between distinct nodes. The same map and options always give the same trips.
pub fn random_trips(map: &Map, options: &ScenarioOptions) -> Vec<Trip> {
    let mut rng = SmallRng::seed_from_u64(options.seed);
    let nodes: Vec<NodeId> = map.nodes().map(|n| n.id).collect();
    let (slow, fast) = if options.min_speed <= options.max_speed {
        (options.min_speed, options.max_speed)
    } else {
        (options.max_speed, options.min_speed)
    };

    let mut trips = Vec::with_capacity(options.vehicles);
    let mut attempts = 0;
    while trips.len() < options.vehicles && attempts < options.vehicles * 4 {
        attempts += 1;
        let (Some(&start), Some(&target)) = (nodes.choose(&mut rng), nodes.choose(&mut rng)) else {
            break;
        };
        if start == target {
            continue;
        }
        let Some(path) = random_route(map, start, target, &mut rng) else {
            log::debug!("No route from {} to {}", start, target);
            continue;
        };
        trips.push(Trip {
            start_ms: rng.random_range(0..=options.spawn_window_ms),
            path,
            desired_speed: rng.random_range(slow..=fast),
        });
    }
    if trips.len() < options.vehicles {
        log::warn!(
            "Generated {} of {} requested trips",
            trips.len(),
            options.vehicles
        );
    }
    trips
}

/// Randomized breadth-first search over drivable streets. Neighbours are
/// shuffled, so equally short routes are picked at random.
pub fn random_route<R: Rng + ?Sized>(
    map: &Map,
    start: NodeId,
    target: NodeId,
    rng: &mut R,
) -> Option<Vec<NodeId>> {
    let mut queue = VecDeque::from([start]);
    let mut came_from: HashMap<NodeId, NodeId> = HashMap::from([(start, start)]);

    while let Some(current) = queue.pop_front() {
        if current == target {
            let mut path = vec![current];
            let mut cursor = current;
            while cursor != start {
                cursor = *came_from.get(&cursor)?;
                path.push(cursor);
            }
            path.reverse();
            return Some(path);
        }

        let Some(node) = map.node(current) else {
            continue;
        };
        let mut neighbours: Vec<NodeId> = node
            .outgoing_streets
            .iter()
            .filter_map(|id| map.street(*id)?.other_end(current))
            .collect();
        neighbours.shuffle(rng);
        for next in neighbours {
            if let std::collections::hash_map::Entry::Vacant(entry) = came_from.entry(next) {
                entry.insert(current);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(columns: usize, rows: usize) -> GridOptions {
        GridOptions {
            columns,
            rows,
            ..GridOptions::default()
        }
    }

    #[test]
    fn grid_has_expected_topology() {
        let grid = build_grid_map(&options(4, 3)).unwrap();
        assert!(grid.map.is_ready());
        assert_eq!(grid.map.node_count(), 12);
        assert_eq!(grid.map.street_count(), 3 * 3 + 4 * 2);
        // Every crossing but the four corners has at least three streets.
        assert_eq!(grid.map.junction_count(), 8);
        assert_eq!(grid.map.traffic_light_count(), 0);
        assert_eq!(grid.map.region_grid(), (2, 2));
        assert_eq!(grid.map.node(grid.node(0, 0).unwrap()).unwrap().position(), (5_000, 5_000));
        assert_eq!(grid.node(3, 0), None);
    }

    #[test]
    fn avenues_have_priority_at_crossings() {
        let grid = build_grid_map(&options(3, 3)).unwrap();
        let centre = grid.node(1, 1).unwrap();
        let junction = grid.map.node(centre).unwrap().junction.as_ref().unwrap();
        let names: Vec<&str> = junction
            .priority_streets()
            .iter()
            .map(|id| grid.map.street(*id).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["Avenue 2", "Avenue 2"]);
    }

    #[test]
    fn signals_follow_the_requested_spacing() {
        let all = GridOptions {
            signal_every: 1,
            ..options(4, 3)
        };
        let grid = build_grid_map(&all).unwrap();
        assert_eq!(grid.map.traffic_light_count(), 8);

        let sparse = GridOptions {
            signal_every: 2,
            ..options(4, 3)
        };
        let grid = build_grid_map(&sparse).unwrap();
        // (0, 2) and (2, 2); the even corners are not junctions.
        assert_eq!(grid.map.traffic_light_count(), 2);
    }

    #[test]
    fn tiny_grids_are_rejected() {
        assert!(matches!(
            build_grid_map(&options(1, 5)),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn random_trips_are_reproducible_and_drivable() {
        let grid = build_grid_map(&options(5, 5)).unwrap();
        let scenario = ScenarioOptions {
            vehicles: 20,
            seed: 7,
            ..ScenarioOptions::default()
        };
        let first = random_trips(&grid.map, &scenario);
        let second = random_trips(&grid.map, &scenario);
        assert_eq!(first.len(), 20);
        assert_eq!(first, second);
        for trip in &first {
            assert!(trip.path.len() >= 2);
            assert_ne!(trip.path.first(), trip.path.last());
            assert!(trip.start_ms <= scenario.spawn_window_ms);
            assert!((800.0..=1_600.0).contains(&trip.desired_speed));
            grid.map.route_from_nodes(&trip.path).unwrap();
        }
    }

    #[test]
    fn random_route_finds_a_shortest_path() {
        let grid = build_grid_map(&options(4, 4)).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let start = grid.node(0, 0).unwrap();
        let target = grid.node(3, 3).unwrap();
        let path = random_route(&grid.map, start, target, &mut rng).unwrap();
        assert_eq!(path.len(), 7);
        assert_eq!(path[0], start);
        assert_eq!(path[6], target);
    }
}
