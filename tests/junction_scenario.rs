mod common;

use common::{t_junction, GrantRecorder};
use std::sync::Arc;
use vanet_simulation::global_variables::MAXIMUM_TIME_ON_JUNCTION;
use vanet_simulation::simulation_engine::events::{events_from_trips, Trip};
use vanet_simulation::simulation_engine::grid::{build_grid_map, random_trips, GridOptions, ScenarioOptions};
use vanet_simulation::simulation_engine::ids::VehicleId;
use vanet_simulation::simulation_engine::junction::PriorityClass;
use vanet_simulation::{SimulationConfig, SimulationMaster};

#[test]
fn left_turn_from_the_priority_road_goes_before_the_side_road() {
    let t = t_junction(false);
    let junction = t.map.node(t.centre).unwrap().junction.as_ref().unwrap();
    assert_eq!(junction.get_junction_priority(t.east, t.south), PriorityClass::PriorityLeft);
    assert_eq!(junction.get_junction_priority(t.south, t.west), PriorityClass::Yield);

    // Both reach the junction after about 10 s.
    let trips = vec![
        Trip { start_ms: 40, path: vec![t.south, t.centre, t.west], desired_speed: 1_000.0 },
        Trip { start_ms: 40, path: vec![t.east, t.centre, t.south], desired_speed: 800.0 },
    ];
    let events = events_from_trips(&t.map, &trips).unwrap();
    let config = SimulationConfig {
        worker_threads: Some(2),
        ..SimulationConfig::default()
    };
    let mut master = SimulationMaster::new(Arc::new(t.map), config).unwrap();
    master.set_event_source(Box::new(events));
    let (recorder, log) = GrantRecorder::new();
    master.set_renderer(Box::new(recorder));

    while master.time() < 40_000 {
        master.step().unwrap();
    }
    master.stop();

    let log = log.lock().unwrap();
    assert_eq!(log.grants.len(), 2, "{:?}", log.grants);
    let (first, second) = (log.grants[0], log.grants[1]);
    assert_eq!(first.vehicle, VehicleId(2));
    assert_eq!(second.vehicle, VehicleId(1));
    assert!(first.time >= 9_000 && first.time <= 11_000, "{:?}", first);
    // The side road waits until the turning vehicle is clear of the junction.
    assert!(second.time >= first.time + 500, "{:?}", log.grants);
    // Then it goes within MAXIMUM_TIME_ON_JUNCTION of the release.
    let release = log
        .releases
        .iter()
        .find(|r| r.node == first.node && r.time > first.time)
        .copied()
        .unwrap();
    assert!(release.time < second.time, "{:?} {:?}", release, log.grants);
    assert!(
        second.time <= release.time + MAXIMUM_TIME_ON_JUNCTION,
        "{:?} {:?}",
        release,
        log.grants
    );

    let summary = master.summary();
    assert_eq!(summary.vehicles, 2);
    assert_eq!(summary.active_vehicles, 0);
    assert_eq!(summary.junction_passes, 2);
    assert_eq!(summary.max_waiting_at_junctions, 2);
}

#[test]
fn no_junction_grants_more_than_one_vehicle_per_tick() {
    let grid = build_grid_map(&GridOptions {
        columns: 6,
        rows: 6,
        ..GridOptions::default()
    })
    .unwrap();
    let trips = random_trips(
        &grid.map,
        &ScenarioOptions {
            vehicles: 60,
            seed: 5,
            spawn_window_ms: 20_000,
            ..ScenarioOptions::default()
        },
    );
    let events = events_from_trips(&grid.map, &trips).unwrap();
    let config = SimulationConfig {
        worker_threads: Some(3),
        ..SimulationConfig::default()
    };
    let mut master = SimulationMaster::new(Arc::new(grid.map), config).unwrap();
    master.set_event_source(Box::new(events));
    let (recorder, log) = GrantRecorder::new();
    master.set_renderer(Box::new(recorder));

    while master.time() < 60_000 {
        master.step().unwrap();
    }
    master.stop();

    let log = log.lock().unwrap();
    assert_eq!(log.frames, 1_500);
    assert!(!log.grants.is_empty());
    assert_eq!(log.max_grants_per_tick, 1);
    assert_eq!(master.summary().vehicles, 60);
}
