use crate::global_variables::{DEFAULT_BEACON_INTERVAL, DEFAULT_COMMUNICATION_INTERVAL};
use crate::simulation_engine::vehicles::{Rsu, StepContext};

/// Stationary unit that sends on fixed intervals and counts what it did.
#[derive(Debug, Clone, Default)]
pub struct BasicRsu {
    x: i32,
    y: i32,
    communication_countdown: i64,
    beacon_countdown: i64,
    messages_sent: u64,
    beacons_sent: u64,
    cleanups: u64,
}

impl BasicRsu {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn beacons_sent(&self) -> u64 {
        self.beacons_sent
    }
}

impl Rsu for BasicRsu {
    fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    fn cleanup(&mut self, step_ms: u64) {
        self.cleanups += 1;
        self.communication_countdown -= step_ms as i64;
        self.beacon_countdown -= step_ms as i64;
    }

    fn send_messages(&mut self, _ctx: &StepContext<'_>) {
        self.messages_sent += 1;
        self.communication_countdown += DEFAULT_COMMUNICATION_INTERVAL;
    }

    fn send_beacons(&mut self, _ctx: &StepContext<'_>) {
        self.beacons_sent += 1;
        self.beacon_countdown += DEFAULT_BEACON_INTERVAL;
    }

    fn communication_countdown(&self) -> i64 {
        self.communication_countdown
    }

    fn beacon_countdown(&self) -> i64 {
        self.beacon_countdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation_engine::ids::RegionCoord;
    use crate::simulation_engine::map::Map;

    #[test]
    fn sends_once_per_interval() {
        let mut map = Map::new(10_000, 10_000, 10_000, 10_000).unwrap();
        map.finish_loading();
        let ctx = StepContext {
            map: &map,
            time: 0,
            step_ms: 40,
            region: RegionCoord(0, 0),
        };
        let mut rsu = BasicRsu::new(10, 20);
        for _ in 0..40 {
            rsu.cleanup(40);
            if rsu.communication_countdown() < 1 {
                rsu.send_messages(&ctx);
            }
            if rsu.beacon_countdown() < 1 {
                rsu.send_beacons(&ctx);
            }
        }
        // 1600 ms: sent on the first tick, then every 160 ms and 240 ms.
        assert_eq!(rsu.messages_sent(), 11);
        assert_eq!(rsu.beacons_sent(), 7);
        assert_eq!(rsu.position(), (10, 20));
    }
}
