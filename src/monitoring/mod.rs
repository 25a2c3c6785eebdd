pub mod renderer;
pub mod statistics;
