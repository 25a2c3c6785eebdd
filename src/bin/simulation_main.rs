// simulation_main.rs
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use vanet_simulation::monitoring::renderer::LogRenderer;
use vanet_simulation::monitoring::statistics::StatisticsLog;
use vanet_simulation::shared_data::RunSummary;
use vanet_simulation::simulation_engine::description::{MapDescription, ScenarioDescription};
use vanet_simulation::simulation_engine::events::{events_from_trips, Trip};
use vanet_simulation::simulation_engine::grid::{
    build_grid_map, random_trips, GridOptions, ScenarioOptions,
};
use vanet_simulation::{Map, SimError, SimResult, SimulationConfig, SimulationMaster};

/// Simulated time of a batch run when neither --jump-to nor --duration is given.
const DEFAULT_BATCH_MS: u64 = 60_000;

/// Stepped VANET traffic simulation
#[derive(Parser, Debug)]
#[command(name = "simulation_main")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON file with simulation settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON map description. A synthetic grid is used without one
    #[arg(long)]
    map: Option<PathBuf>,

    /// JSON scenario using the node keys of --map. Random trips are used without one
    #[arg(long, requires = "map")]
    scenario: Option<PathBuf>,

    /// Compute ticks without rendering or pacing up to this simulated time (ms)
    #[arg(long)]
    jump_to: Option<u64>,

    /// Simulated time to run after --jump-to (ms)
    #[arg(long)]
    duration: Option<u64>,

    /// Worker threads, overriding the configuration
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for random trips
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Number of random trips
    #[arg(long, default_value_t = 50)]
    vehicles: usize,

    /// Synthetic grid size as COLUMNSxROWS
    #[arg(long, default_value = "5x5", value_parser = parse_grid)]
    grid: (usize, usize),

    /// Write per-tick statistics to this CSV file
    #[arg(long)]
    stats_csv: Option<PathBuf>,

    /// Pace ticks to wall-clock time, scaled by the configured realtime factor
    #[arg(long)]
    realtime: bool,
}

fn parse_grid(s: &str) -> Result<(usize, usize), String> {
    let (columns, rows) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLUMNSxROWS, got '{}'", s))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid grid size '{}': {}", s, e))
    };
    Ok((parse(columns)?, parse(rows)?))
}

fn build_world(args: &Args, config: &SimulationConfig) -> SimResult<(Map, Vec<Trip>)> {
    let scenario = ScenarioOptions {
        vehicles: args.vehicles,
        seed: args.seed,
        ..ScenarioOptions::default()
    };
    match &args.map {
        Some(path) => {
            let loaded = MapDescription::load(path)?.build(config.signal_timings)?;
            let trips = match &args.scenario {
                Some(path) => ScenarioDescription::load(path)?.trips(&loaded.nodes)?,
                None => random_trips(&loaded.map, &scenario),
            };
            Ok((loaded.map, trips))
        }
        None => {
            let (columns, rows) = args.grid;
            let grid = build_grid_map(&GridOptions {
                columns,
                rows,
                signal_every: 2,
                signal_timings: config.signal_timings,
                ..GridOptions::default()
            })?;
            let trips = random_trips(&grid.map, &scenario);
            Ok((grid.map, trips))
        }
    }
}

fn advance(
    master: &mut SimulationMaster,
    jump_to: Option<u64>,
    duration: Option<u64>,
    realtime: bool,
) -> SimResult<()> {
    if let Some(target) = jump_to {
        master.jump_to_time(target)?;
    }
    if realtime {
        return master.run_realtime(duration);
    }
    let length = match (jump_to, duration) {
        (_, Some(length)) => length,
        (Some(_), None) => 0,
        (None, None) => DEFAULT_BATCH_MS,
    };
    let target = master.time() + length;
    master.jump_to_time(target)
}

/// Runs on a blocking thread: the master parks on barriers every tick.
fn drive(
    mut master: SimulationMaster,
    jump_to: Option<u64>,
    duration: Option<u64>,
    realtime: bool,
) -> SimResult<RunSummary> {
    let outcome = advance(&mut master, jump_to, duration, realtime);
    master.stop();
    match outcome {
        Ok(()) => {}
        Err(SimError::Stopped) => log::info!("Run interrupted at {} ms", master.time()),
        Err(e) => return Err(e),
    }
    Ok(master.summary().clone())
}

async fn run(args: Args) -> SimResult<RunSummary> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if args.workers.is_some() {
        config.worker_threads = args.workers;
    }
    config.validate()?;

    let (map, trips) = build_world(&args, &config)?;
    let events = events_from_trips(&map, &trips)?;
    log::info!("Scheduled {} vehicles", events.len());

    let mut master = SimulationMaster::new(Arc::new(map), config.clone())?;
    master.set_event_source(Box::new(events));
    master.set_renderer(Box::new(LogRenderer::new(config.render_interval_ms)));
    if let Some(path) = &args.stats_csv {
        master.set_statistics(Box::new(StatisticsLog::create(path)?));
    }

    let handle = master.handle();
    let (jump_to, duration, realtime) = (args.jump_to, args.duration, args.realtime);
    let mut task = tokio::task::spawn_blocking(move || drive(master, jump_to, duration, realtime));

    let joined = tokio::select! {
        joined = &mut task => joined,
        Ok(()) = tokio::signal::ctrl_c() => {
            log::warn!("Ctrl-C received, stopping the simulation");
            handle.stop();
            task.await
        }
    };
    joined.map_err(|e| SimError::Io(std::io::Error::other(e)))?
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Usage errors exit with code 2 from clap.
    let args = Args::parse();
    match run(args).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => log::warn!("Could not serialise the run summary: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(1)
        }
    }
}
