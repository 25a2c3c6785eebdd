// simulation_engine/mod.rs
pub mod barrier;
pub mod description;
pub mod events;
pub mod grid;
pub mod ids;
pub mod junction;
pub mod junction_queue;
pub mod map;
pub mod master;
pub mod node;
pub mod region;
pub mod route_vehicle;
pub mod rsu;
pub mod street;
pub mod vehicles;
pub mod worker;
