// src/shared_data.rs

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a panicking phase poisoned it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Statistics gathered by the master after every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickStatistics {
    pub time: u64,
    pub vehicles: usize,
    pub active_vehicles: usize,
    pub waiting_at_junctions: usize,
    pub junction_passes: u64,
    pub tick_wall_micros: u64,
}

/// End-of-run summary printed by the console entry point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub final_time: u64,
    pub ticks: u64,
    pub workers: usize,
    pub regions: usize,
    pub vehicles: usize,
    pub active_vehicles: usize,
    pub junction_passes: u64,
    pub max_waiting_at_junctions: usize,
}

impl RunSummary {
    pub fn record(&mut self, stats: &TickStatistics) {
        self.final_time = stats.time;
        self.ticks += 1;
        self.vehicles = stats.vehicles;
        self.active_vehicles = stats.active_vehicles;
        self.junction_passes = stats.junction_passes;
        self.max_waiting_at_junctions = self.max_waiting_at_junctions.max(stats.waiting_at_junctions);
    }
}
