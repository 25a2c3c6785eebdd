use crate::config::FeatureFlags;
use crate::shared_data::lock;
use crate::simulation_engine::barrier::{BarrierAborted, PhaseBarrier};
use crate::simulation_engine::ids::RegionCoord;
use crate::simulation_engine::map::Map;
use crate::simulation_engine::region::Region;
use crate::simulation_engine::vehicles::StepContext;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// The per-tick phases, in the order every worker runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    AdjustSpeed,
    Messages,
    IntrusionDetection,
    Beacons,
    Move,
    TrafficLights,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::AdjustSpeed,
        Phase::Messages,
        Phase::IntrusionDetection,
        Phase::Beacons,
        Phase::Move,
        Phase::TrafficLights,
    ];
}

/// State the master shares with its workers.
#[derive(Debug)]
pub struct TickShared {
    /// Time of the tick being computed, published before `start` is released.
    pub time: AtomicU64,
    pub step_ms: u64,
    pub features: FeatureFlags,
    /// Master and all workers.
    pub start: PhaseBarrier,
    /// Workers only, between phases.
    pub mid: PhaseBarrier,
    /// Master and all workers.
    pub finish: PhaseBarrier,
    /// One slot per worker, drained by the master after `finish`.
    pub changed_regions: Vec<Mutex<BTreeSet<RegionCoord>>>,
    pub phase_panics: AtomicU64,
}

impl TickShared {
    pub fn new(workers: usize, step_ms: u64, features: FeatureFlags) -> Self {
        Self {
            time: AtomicU64::new(0),
            step_ms,
            features,
            start: PhaseBarrier::new(workers + 1),
            mid: PhaseBarrier::new(workers),
            finish: PhaseBarrier::new(workers + 1),
            changed_regions: (0..workers).map(|_| Mutex::new(BTreeSet::new())).collect(),
            phase_panics: AtomicU64::new(0),
        }
    }

    /// Releases every thread blocked in any of the barriers.
    pub fn abort(&self) {
        self.start.abort();
        self.mid.abort();
        self.finish.abort();
    }

    pub fn take_changed_regions(&self) -> BTreeSet<RegionCoord> {
        let mut all = BTreeSet::new();
        for slot in &self.changed_regions {
            all.append(&mut lock(slot));
        }
        all
    }
}

/// Computes the ticks of a fixed set of regions.
pub struct WorkerThread {
    index: usize,
    regions: Vec<RegionCoord>,
    map: Arc<Map>,
    shared: Arc<TickShared>,
    changed: BTreeSet<RegionCoord>,
}

impl WorkerThread {
    pub fn new(index: usize, regions: Vec<RegionCoord>, map: Arc<Map>, shared: Arc<TickShared>) -> Self {
        for coord in &regions {
            if let Some(region) = map.region(*coord) {
                region.set_owner(Some(index));
            }
        }
        Self {
            index,
            regions,
            map,
            shared,
            changed: BTreeSet::new(),
        }
    }

    pub fn regions(&self) -> &[RegionCoord] {
        &self.regions
    }

    /// Worker loop: one tick between each `start` and `finish` rendezvous until aborted.
    pub fn run(mut self) {
        log::debug!("Worker {} owns {} regions", self.index, self.regions.len());
        loop {
            if self.shared.start.wait().is_err() {
                break;
            }
            if self.tick().is_err() {
                break;
            }
            if self.shared.finish.wait().is_err() {
                break;
            }
        }
        for coord in &self.regions {
            if let Some(region) = self.map.region(*coord) {
                region.set_owner(None);
            }
        }
        log::debug!("Worker {} stopped", self.index);
    }

    /// All phases of one tick, separated by the mid-step barrier.
    pub fn tick(&mut self) -> Result<(), BarrierAborted> {
        let time = self.shared.time.load(Ordering::Acquire);
        self.prepare();
        for (i, phase) in Phase::ALL.iter().enumerate() {
            if i > 0 {
                self.shared.mid.wait()?;
            }
            self.run_phase(*phase, time);
        }
        if !self.changed.is_empty() {
            let mut slot = lock(&self.shared.changed_regions[self.index]);
            slot.append(&mut self.changed);
        }
        Ok(())
    }

    /// Takes in handed-over vehicles and rebuilds stale active arrays.
    fn prepare(&mut self) {
        for coord in &self.regions {
            let Some(region) = self.map.region(*coord) else {
                continue;
            };
            let arrived = region.drain_inbox();
            let rebuilt = region.state().refresh_active();
            if arrived || rebuilt {
                self.changed.insert(*coord);
            }
        }
    }

    fn run_phase(&mut self, phase: Phase, time: u64) {
        let map = Arc::clone(&self.map);
        for coord in &self.regions {
            let Some(region) = map.region(*coord) else {
                continue;
            };
            let ctx = StepContext {
                map: map.as_ref(),
                time,
                step_ms: self.shared.step_ms,
                region: *coord,
            };
            let features = self.shared.features;
            let changed = &mut self.changed;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_region_phase(phase, region, &ctx, features, changed)
            }));
            if result.is_err() {
                self.shared.phase_panics.fetch_add(1, Ordering::Relaxed);
                region.state().mark_dirty();
                log::error!(
                    "Worker {}: {:?} phase panicked in {} at {} ms",
                    self.index,
                    phase,
                    coord,
                    time
                );
            }
        }
    }
}

fn run_region_phase(
    phase: Phase,
    region: &Region,
    ctx: &StepContext<'_>,
    features: FeatureFlags,
    changed: &mut BTreeSet<RegionCoord>,
) {
    match phase {
        Phase::AdjustSpeed => {
            region.state().for_each_active(|v| v.adjust_speed(ctx));
        }
        Phase::Messages => {
            let mut state = region.state();
            if features.communication || features.beacons {
                for rsu in state.rsus_mut() {
                    rsu.cleanup(ctx.step_ms);
                }
            }
            if !features.communication {
                return;
            }
            state.for_each_active(|v| {
                if v.communication_countdown() < 1 {
                    v.send_messages(ctx);
                }
            });
            for rsu in state.rsus_mut() {
                if rsu.communication_countdown() < 1 {
                    rsu.send_messages(ctx);
                }
            }
        }
        Phase::IntrusionDetection => {
            if features.ids {
                region.state().for_each_active(|v| v.evaluate_ids(ctx));
            }
        }
        Phase::Beacons => {
            if !features.beacons {
                return;
            }
            let mut state = region.state();
            state.for_each_active(|v| {
                if v.beacon_countdown() < 1 {
                    if features.encrypted_beacons {
                        v.send_encrypted_beacons(ctx);
                    } else {
                        v.send_beacons(ctx);
                    }
                }
            });
            for rsu in state.rsus_mut() {
                if rsu.beacon_countdown() < 1 {
                    if features.encrypted_beacons {
                        rsu.send_encrypted_beacons(ctx);
                    } else {
                        rsu.send_beacons(ctx);
                    }
                }
            }
        }
        Phase::Move => {
            let mut state = region.state();
            let mut finished = false;
            state.for_each_active(|v| {
                v.move_vehicle(ctx);
                finished |= !v.is_active();
            });
            if finished {
                state.mark_dirty();
                changed.insert(region.coord);
            }
            let departed = state.take_departed(|v| {
                let (x, y) = v.position();
                ctx.map.region_of_point(x, y) == region.coord
            });
            drop(state);
            if !departed.is_empty() {
                changed.insert(region.coord);
            }
            for vehicle in departed {
                let (x, y) = vehicle.position();
                let target = ctx.map.region_of_point(x, y);
                if let Some(destination) = ctx.map.region(target) {
                    log::trace!("{} moves from {} to {}", vehicle.id(), region.coord, target);
                    destination.deliver(vehicle);
                    changed.insert(target);
                }
            }
        }
        Phase::TrafficLights => {
            for id in region.nodes() {
                let Some(light) = ctx.map.node(*id).and_then(|n| n.traffic_light.as_ref()) else {
                    continue;
                };
                lock(light).change_phases(ctx.step_ms, ctx.map);
            }
        }
    }
}
