use crate::simulation_engine::ids::RegionCoord;
use crate::simulation_engine::map::Map;
use std::collections::BTreeSet;

/// Receives one frame after every tick that is not skipped by jump-to-time.
///
/// `render_frame` runs on the master thread while all workers are parked, so
/// it may read the whole map without further locking than each object's own.
pub trait Renderer: Send {
    fn set_time_passed(&mut self, time: u64);

    fn set_running(&mut self, running: bool);

    /// `changed` holds the regions whose vehicle lists changed during the tick.
    fn render_frame(&mut self, map: &Map, changed: &BTreeSet<RegionCoord>);
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn set_time_passed(&mut self, _time: u64) {}

    fn set_running(&mut self, _running: bool) {}

    fn render_frame(&mut self, _map: &Map, _changed: &BTreeSet<RegionCoord>) {}
}

/// Logs a short summary at a fixed simulated interval.
#[derive(Debug)]
pub struct LogRenderer {
    interval_ms: u64,
    time: u64,
    last_report: u64,
    running: bool,
    frames: u64,
    changed_since_report: BTreeSet<RegionCoord>,
}

impl LogRenderer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            time: 0,
            last_report: 0,
            running: false,
            frames: 0,
            changed_since_report: BTreeSet::new(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Renderer for LogRenderer {
    fn set_time_passed(&mut self, time: u64) {
        self.time = time;
    }

    fn set_running(&mut self, running: bool) {
        if running != self.running {
            log::info!(
                "Simulation {} at {} ms",
                if running { "running" } else { "stopped" },
                self.time
            );
        }
        self.running = running;
    }

    fn render_frame(&mut self, map: &Map, changed: &BTreeSet<RegionCoord>) {
        self.frames += 1;
        self.changed_since_report.extend(changed.iter().copied());
        if self.time < self.last_report + self.interval_ms {
            return;
        }
        let waiting: usize = map.junctions().map(|j| j.waiting_count()).sum();
        log::info!(
            "t={} ms: {} vehicles, {} waiting at junctions, {} regions changed",
            self.time,
            map.vehicle_count(),
            waiting,
            self.changed_since_report.len()
        );
        self.changed_since_report.clear();
        self.last_report = self.time;
    }
}
