// Simulated milliseconds advanced by one tick.
pub const TIME_PER_STEP_MS: u64 = 40;

// Junction arbitration
pub const MAXIMUM_TIME_ON_JUNCTION: u64 = 1000;
pub const JUNCTION_QUEUES_CLEANUP_INTERVAL: u64 = 1000;
pub const LAST_SEEN_TIMEOUT: u64 = 2500;
/// Priority streets must be free for this long at their speed limit (ms).
pub const NEEDED_FREE_TIME_MS: u64 = 1500;
/// Upper bound on short connecting streets followed while checking a priority street.
pub const MAX_PRIORITY_CHAIN_STREETS: usize = 16;

// Traffic lights
pub const JUNCTION_FREE_TIME: u64 = 2000;
pub const DEFAULT_PRIORITY_GREEN_TIME: u64 = 5000;
pub const DEFAULT_SECONDARY_GREEN_TIME: u64 = 5000;
pub const DEFAULT_YELLOW_TIME: u64 = 1000;
/// Distance (cm) from the junction centre at which light icons are anchored.
pub const TRAFFIC_LIGHT_RADIUS: f64 = 1000.0;

// Map defaults (cm)
pub const DEFAULT_MAP_WIDTH: i32 = 100_000;
pub const DEFAULT_MAP_HEIGHT: i32 = 100_000;
pub const DEFAULT_REGION_WIDTH: i32 = 10_000;
pub const DEFAULT_REGION_HEIGHT: i32 = 10_000;
/// Largest region grid `init_new_map` accepts.
pub const MAX_REGIONS: usize = 1 << 20;
pub const LANE_WIDTH: f64 = 350.0;

// Reference vehicle model
pub const DEFAULT_BEACON_INTERVAL: i64 = 240;
pub const DEFAULT_COMMUNICATION_INTERVAL: i64 = 160;
/// Minimum bumper-to-bumper gap (cm) kept to the vehicle ahead.
pub const MIN_VEHICLE_GAP: f64 = 500.0;
/// Extra distance (cm) beyond one step of travel at which a vehicle announces itself at a junction.
pub const JUNCTION_ANNOUNCE_MARGIN: f64 = 2000.0;
