use crate::simulation_engine::ids::{NodeId, StreetId};
use thiserror::Error as ThisError;

/// Everything that can go wrong while building or running a simulation.
#[derive(ThisError, Debug)]
pub enum SimError {
    #[error(
        "invalid map dimensions {width}x{height} with regions of {region_width}x{region_height}"
    )]
    InvalidDimensions {
        width: i32,
        height: i32,
        region_width: i32,
        region_height: i32,
    },
    #[error("the previous map is still loading; map initialisation is not reentrant")]
    MapNotReady,
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("street {0} does not exist")]
    UnknownStreet(StreetId),
    #[error("a street needs two distinct end nodes, got {0} twice")]
    DegenerateStreet(NodeId),
    #[error("no street connects {0} and {1} in a drivable direction")]
    NoStreetBetween(NodeId, NodeId),
    #[error("a route needs at least two nodes")]
    RouteTooShort,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("the simulation is already running")]
    AlreadyRunning,
    #[error("the map is shared with a running simulation and cannot be edited")]
    MapInUse,
    #[error("the simulation was stopped")]
    Stopped,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type SimResult<T> = Result<T, SimError>;
