// benches/bench_junction_arbitration.rs

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use vanet_simulation::simulation_engine::ids::{NodeId, StreetId, VehicleId};
use vanet_simulation::simulation_engine::junction::{PriorityClass, WaitingVehicle};
use vanet_simulation::simulation_engine::street::{OneWay, StreetDisplay};
use vanet_simulation::Map;

// A T-junction whose side street feeds `centre`.
fn create_junction() -> (Map, NodeId, StreetId) {
    let mut map = Map::new(20_000, 20_000, 10_000, 10_000).unwrap();
    let west = map.add_node(1_000, 5_000, false);
    let centre = map.add_node(9_000, 5_000, false);
    let east = map.add_node(17_000, 5_000, false);
    let south = map.add_node(9_000, 15_000, false);
    map.add_street("Main", west, centre, OneWay::TwoWay, 1, 1_400, StreetDisplay::default())
        .unwrap();
    map.add_street("Main", centre, east, OneWay::TwoWay, 1, 1_400, StreetDisplay::default())
        .unwrap();
    let side = map
        .add_street("Side", south, centre, OneWay::TwoWay, 1, 1_000, StreetDisplay::default())
        .unwrap();
    map.finish_loading();
    (map, centre, side)
}

// Queues `vehicles` yielding vehicles and lets them through one grant per tick.
fn drain_queue(map: &Map, centre: NodeId, side: StreetId, vehicles: u64) -> u64 {
    let Some(junction) = map.node(centre).and_then(|n| n.junction.as_ref()) else {
        return 0;
    };
    let waiting = |id: u64| WaitingVehicle {
        id: VehicleId(id),
        x: 9_000,
        y: 6_000 + id as i32 * 10,
    };
    let mut time = 40;
    for id in 1..=vehicles {
        junction.add_waiting_vehicle(waiting(id), PriorityClass::Yield, time);
    }
    let mut granted = 0;
    while granted < vehicles {
        time += 40;
        for id in granted + 1..=vehicles {
            junction.add_waiting_vehicle(waiting(id), PriorityClass::Yield, time);
            if junction.can_pass_junction(map, VehicleId(id), side, PriorityClass::Yield, time) {
                granted += 1;
                junction.allow_other_vehicle();
            }
        }
    }
    granted
}

fn bench_junction_arbitration(c: &mut Criterion) {
    let mut group = c.benchmark_group("junction_arbitration");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(5));

    for &vehicles in [10u64, 50, 200].iter() {
        group.bench_function(format!("drain_{}_vehicles", vehicles), |b| {
            b.iter_batched(
                create_junction,
                |(map, centre, side)| black_box(drain_queue(&map, centre, side, vehicles)),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_junction_arbitration);
criterion_main!(benches);
