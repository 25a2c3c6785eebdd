// src/config.rs
use crate::control_system::traffic_light::SignalTimings;
use crate::error::{SimError, SimResult};
use crate::global_variables::TIME_PER_STEP_MS;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Which optional per-tick phases do any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub communication: bool,
    pub beacons: bool,
    pub encrypted_beacons: bool,
    pub ids: bool,
}

/// Tunables of one simulation run, usually read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulated ms per tick.
    pub time_per_step_ms: u64,
    /// Overrides the default pool size of twice the available parallelism.
    pub worker_threads: Option<usize>,
    /// Simulated seconds per wall-clock second in real-time mode.
    pub realtime_factor: f64,
    pub communication_enabled: bool,
    pub beacons_enabled: bool,
    pub encrypted_beacons: bool,
    pub ids_enabled: bool,
    pub signal_timings: SignalTimings,
    /// How often the logging renderer reports, in simulated ms.
    pub render_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_per_step_ms: TIME_PER_STEP_MS,
            worker_threads: None,
            realtime_factor: 1.0,
            communication_enabled: true,
            beacons_enabled: true,
            encrypted_beacons: false,
            ids_enabled: false,
            signal_timings: SignalTimings::default(),
            render_interval_ms: 1000,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> SimResult<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.time_per_step_ms == 0 {
            return Err(SimError::InvalidConfig(
                "time_per_step_ms must be positive".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(SimError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if !(self.realtime_factor.is_finite() && self.realtime_factor > 0.0) {
            return Err(SimError::InvalidConfig(format!(
                "realtime_factor must be a positive number, got {}",
                self.realtime_factor
            )));
        }
        self.signal_timings.validate()
    }

    pub fn features(&self) -> FeatureFlags {
        FeatureFlags {
            communication: self.communication_enabled,
            beacons: self.beacons_enabled,
            encrypted_beacons: self.encrypted_beacons,
            ids: self.ids_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{ "worker_threads": 3, "signal_timings": { "yellow_ms": 500 } }"#)
                .unwrap();
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.time_per_step_ms, TIME_PER_STEP_MS);
        assert_eq!(config.signal_timings.yellow_ms, 500);
        assert_eq!(
            config.signal_timings.priority_green_ms,
            SignalTimings::default().priority_green_ms
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = SimulationConfig {
            time_per_step_ms: 0,
            ..SimulationConfig::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
        config.time_per_step_ms = 40;
        config.worker_threads = Some(0);
        assert!(config.validate().is_err());
        config.worker_threads = None;
        config.realtime_factor = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_files() {
        let result = SimulationConfig::load(Path::new("/nonexistent/vanet-config.json"));
        assert!(matches!(result, Err(SimError::Io(_))));
    }
}
