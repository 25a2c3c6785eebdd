use crate::simulation_engine::ids::{RegionCoord, VehicleId};
use crate::simulation_engine::map::Map;
use std::fmt;

/// What a vehicle or RSU may see while one phase of a tick runs.
///
/// The map is shared by all workers. Implementations may read it freely and may
/// mutate only the shared objects built for it (street lanes, junction
/// arbitration); they must never touch another region's vehicle list.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub map: &'a Map,
    /// Simulation time of the tick being computed (ms).
    pub time: u64,
    /// Length of one tick (ms).
    pub step_ms: u64,
    /// Region whose objects are being processed.
    pub region: RegionCoord,
}

impl fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("time", &self.time)
            .field("step_ms", &self.step_ms)
            .field("region", &self.region)
            .finish()
    }
}

/// Contract every simulated vehicle fulfils.
///
/// Workers call these in a fixed order each tick:
/// `adjust_speed`, `send_messages`, `evaluate_ids`, `send_beacons` (or
/// `send_encrypted_beacons`), `move_vehicle`. Each call happens in its own
/// phase, and every worker finishes a phase before any worker starts the next.
pub trait Vehicle: Send {
    fn id(&self) -> VehicleId;

    /// Current location in cm.
    fn position(&self) -> (i32, i32);

    fn is_active(&self) -> bool;

    /// Decide this tick's speed. Junction arbitration happens here.
    fn adjust_speed(&mut self, ctx: &StepContext<'_>);

    fn send_messages(&mut self, _ctx: &StepContext<'_>) {}

    /// Intrusion detection on whatever was received this tick.
    fn evaluate_ids(&mut self, _ctx: &StepContext<'_>) {}

    fn send_beacons(&mut self, _ctx: &StepContext<'_>) {}

    fn send_encrypted_beacons(&mut self, ctx: &StepContext<'_>) {
        self.send_beacons(ctx);
    }

    /// Advance along the street network by the speed chosen in `adjust_speed`.
    fn move_vehicle(&mut self, ctx: &StepContext<'_>);

    /// Return to the initial state so a scenario can be replayed.
    fn reset(&mut self);

    /// Messages are sent when this drops below 1.
    fn communication_countdown(&self) -> i64 {
        0
    }

    /// Beacons are sent when this drops below 1.
    fn beacon_countdown(&self) -> i64 {
        0
    }
}

/// Contract for road-side units.
pub trait Rsu: Send {
    fn position(&self) -> (i32, i32);

    /// Expire whatever the unit has collected.
    fn cleanup(&mut self, step_ms: u64);

    fn send_messages(&mut self, _ctx: &StepContext<'_>) {}

    fn send_beacons(&mut self, _ctx: &StepContext<'_>) {}

    fn send_encrypted_beacons(&mut self, ctx: &StepContext<'_>) {
        self.send_beacons(ctx);
    }

    fn communication_countdown(&self) -> i64 {
        0
    }

    fn beacon_countdown(&self) -> i64 {
        0
    }
}

impl fmt::Debug for dyn Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vehicle")
            .field("id", &self.id())
            .field("position", &self.position())
            .field("active", &self.is_active())
            .finish()
    }
}

impl fmt::Debug for dyn Rsu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rsu").field("position", &self.position()).finish()
    }
}
