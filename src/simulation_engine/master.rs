use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use crate::monitoring::renderer::{NullRenderer, Renderer};
use crate::monitoring::statistics::StatisticsSink;
use crate::shared_data::{lock, RunSummary, TickStatistics};
use crate::simulation_engine::events::{EventList, EventSource};
use crate::simulation_engine::ids::RegionCoord;
use crate::simulation_engine::map::Map;
use crate::simulation_engine::worker::{TickShared, WorkerThread};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const PAUSE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct RunControl {
    stop: AtomicBool,
    paused: AtomicBool,
    shared: Mutex<Option<Arc<TickShared>>>,
}

/// Lets other threads (a Ctrl-C handler, a UI) pause or stop a running master.
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    control: Arc<RunControl>,
}

impl SimulationHandle {
    /// Requests shutdown and wakes every thread blocked in a barrier.
    pub fn stop(&self) {
        self.control.stop.store(true, Ordering::Release);
        if let Some(shared) = lock(&self.control.shared).as_ref() {
            shared.abort();
        }
    }

    pub fn pause(&self) {
        self.control.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.control.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.control.paused.load(Ordering::Acquire)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.control.stop.load(Ordering::Acquire)
    }
}

/// Default pool size: twice the available parallelism.
pub fn default_pool_size() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Splits `count` row-major region indices into `workers` contiguous chunks
/// whose sizes differ by at most one.
pub fn partition_regions(count: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    (0..workers)
        .map(|i| (i * count / workers)..((i + 1) * count / workers))
        .collect()
}

/// Drives the clock and the worker pool.
///
/// Each tick the master advances the time, feeds due events into the map,
/// releases the workers through the start barrier and waits for them at the
/// finish barrier. Statistics and rendering happen while all workers are parked.
pub struct SimulationMaster {
    map: Arc<Map>,
    config: SimulationConfig,
    time: u64,
    workers: Vec<JoinHandle<()>>,
    shared: Option<Arc<TickShared>>,
    control: Arc<RunControl>,
    events: Box<dyn EventSource>,
    renderer: Box<dyn Renderer>,
    statistics: Option<Box<dyn StatisticsSink>>,
    summary: RunSummary,
}

impl SimulationMaster {
    pub fn new(map: Arc<Map>, config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        if !map.is_ready() {
            return Err(SimError::MapNotReady);
        }
        Ok(Self {
            map,
            config,
            time: 0,
            workers: Vec::new(),
            shared: None,
            control: Arc::new(RunControl::default()),
            events: Box::new(EventList::new()),
            renderer: Box::new(NullRenderer),
            statistics: None,
            summary: RunSummary::default(),
        })
    }

    pub fn set_event_source(&mut self, events: Box<dyn EventSource>) {
        self.events = events;
    }

    pub fn set_renderer(&mut self, renderer: Box<dyn Renderer>) {
        self.renderer = renderer;
    }

    pub fn set_statistics(&mut self, sink: Box<dyn StatisticsSink>) {
        self.statistics = Some(sink);
    }

    pub fn set_worker_threads(&mut self, workers: Option<usize>) -> SimResult<()> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }
        self.config.worker_threads = workers;
        self.config.validate()
    }

    pub fn handle(&self) -> SimulationHandle {
        SimulationHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn map(&self) -> &Arc<Map> {
        &self.map
    }

    /// Mutable access for editing between runs. Fails while workers share the map.
    pub fn map_mut(&mut self) -> SimResult<&mut Map> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }
        Arc::get_mut(&mut self.map).ok_or(SimError::MapInUse)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulation time of the last completed tick (ms).
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn pending_events(&self) -> usize {
        self.events.pending()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_some()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Worker threads a run will use: never more than there are regions.
    pub fn pool_size(&self) -> usize {
        self.config
            .worker_threads
            .unwrap_or_else(default_pool_size)
            .max(1)
            .min(self.map.regions().len().max(1))
    }

    /// Spawns the worker pool. Does nothing if it is already running.
    pub fn start_threads(&mut self) -> SimResult<()> {
        if self.shared.is_some() {
            return Ok(());
        }
        let workers = self.pool_size();
        let shared = Arc::new(TickShared::new(
            workers,
            self.config.time_per_step_ms,
            self.config.features(),
        ));
        let coords: Vec<RegionCoord> = self.map.regions().iter().map(|r| r.coord).collect();

        for (index, range) in partition_regions(coords.len(), workers).into_iter().enumerate() {
            let worker = WorkerThread::new(
                index,
                coords[range].to_vec(),
                Arc::clone(&self.map),
                Arc::clone(&shared),
            );
            let spawned = thread::Builder::new()
                .name(format!("sim-worker-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    log::error!("Could not spawn worker {}: {}", index, e);
                    shared.abort();
                    self.join_workers();
                    return Err(SimError::Spawn(e));
                }
            }
        }

        *lock(&self.control.shared) = Some(Arc::clone(&shared));
        self.shared = Some(shared);
        self.renderer.set_running(true);
        log::info!(
            "Started {} workers for {} regions ({} ms per tick)",
            workers,
            coords.len(),
            self.config.time_per_step_ms
        );
        Ok(())
    }

    /// Computes one tick and renders it.
    pub fn step(&mut self) -> SimResult<TickStatistics> {
        let (stats, changed) = self.tick()?;
        self.renderer.render_frame(&self.map, &changed);
        Ok(stats)
    }

    /// Runs ticks without pacing or rendering until `target` ms, then renders once.
    pub fn jump_to_time(&mut self, target: u64) -> SimResult<()> {
        if target <= self.time {
            return Ok(());
        }
        log::info!("Jumping from {} ms to {} ms", self.time, target);
        let mut changed = BTreeSet::new();
        while self.time < target {
            if self.control.stop.load(Ordering::Acquire) {
                break;
            }
            let (_, mut tick_changed) = self.tick()?;
            changed.append(&mut tick_changed);
        }
        self.renderer.render_frame(&self.map, &changed);
        Ok(())
    }

    /// Paced run: one tick per `time_per_step_ms / realtime_factor` of wall time.
    /// Runs until stopped, or for `duration_ms` of simulated time if given.
    pub fn run_realtime(&mut self, duration_ms: Option<u64>) -> SimResult<()> {
        let end = duration_ms.map(|d| self.time + d);
        let period = Duration::from_secs_f64(
            self.config.time_per_step_ms as f64 / 1000.0 / self.config.realtime_factor,
        );
        self.start_threads()?;
        loop {
            if self.control.stop.load(Ordering::Acquire) {
                break;
            }
            if end.map_or(false, |end| self.time >= end) {
                break;
            }
            if self.control.paused.load(Ordering::Acquire) {
                thread::sleep(PAUSE_POLL);
                continue;
            }
            let started = Instant::now();
            match self.step() {
                Ok(_) => {}
                Err(SimError::Stopped) => break,
                Err(e) => return Err(e),
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            } else {
                log::debug!("Tick at {} ms took longer than its real-time slot", self.time);
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> SimResult<(TickStatistics, BTreeSet<RegionCoord>)> {
        if self.control.stop.load(Ordering::Acquire) {
            return Err(SimError::Stopped);
        }
        self.start_threads()?;
        let shared = self.shared.clone().ok_or(SimError::Stopped)?;

        let started = Instant::now();
        let time = self.time + self.config.time_per_step_ms;
        self.events.process_events(time, &self.map);
        shared.time.store(time, Ordering::Release);
        if shared.start.wait().is_err() || shared.finish.wait().is_err() {
            return Err(SimError::Stopped);
        }
        self.time = time;

        let changed = shared.take_changed_regions();
        let stats = self.collect_statistics(time, started.elapsed());
        self.summary.record(&stats);
        self.summary.workers = self.workers.len();
        self.summary.regions = self.map.regions().len();
        if let Some(sink) = self.statistics.as_mut() {
            sink.record(&stats)?;
        }
        self.renderer.set_time_passed(time);
        Ok((stats, changed))
    }

    fn collect_statistics(&self, time: u64, wall: Duration) -> TickStatistics {
        let mut vehicles = 0;
        let mut active_vehicles = 0;
        for region in self.map.regions() {
            let pending = region.pending_deliveries();
            let state = region.state();
            vehicles += state.vehicles().len() + pending;
            active_vehicles += state.vehicles().iter().filter(|v| v.is_active()).count() + pending;
        }
        let (waiting_at_junctions, junction_passes) = self
            .map
            .junctions()
            .fold((0, 0), |(waiting, passes), j| {
                (waiting + j.waiting_count(), passes + j.passes())
            });
        TickStatistics {
            time,
            vehicles,
            active_vehicles,
            waiting_at_junctions,
            junction_passes,
            tick_wall_micros: wall.as_micros() as u64,
        }
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("A worker thread panicked outside of a phase");
            }
        }
    }

    /// Aborts all barriers and joins the workers. The master can be started again afterwards.
    pub fn stop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        shared.abort();
        *lock(&self.control.shared) = None;
        self.join_workers();
        self.control.stop.store(false, Ordering::Release);
        let panics = shared.phase_panics.load(Ordering::Relaxed);
        if panics > 0 {
            log::warn!("{} phase bodies panicked during the run", panics);
        }
        if let Some(sink) = self.statistics.as_mut() {
            if let Err(e) = sink.flush() {
                log::warn!("Could not flush statistics: {}", e);
            }
        }
        self.renderer.set_running(false);
        log::info!("Simulation stopped at {} ms", self.time);
    }
}

impl Drop for SimulationMaster {
    fn drop(&mut self) {
        self.stop();
    }
}
