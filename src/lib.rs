pub mod config;
pub mod control_system;
pub mod error;
pub mod global_variables;
pub mod monitoring;
pub mod shared_data;
pub mod simulation_engine;

pub use config::SimulationConfig;
pub use error::{SimError, SimResult};
pub use simulation_engine::map::Map;
pub use simulation_engine::master::{SimulationHandle, SimulationMaster};
