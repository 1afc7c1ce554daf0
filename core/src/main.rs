//! LANDNAV: planar localization against a known landmark map.
//!
//! This program simulates a vehicle driving over a square map of point landmarks. The
//! vehicle integrates noisy odometry and periodically measures range and bearing to a
//! randomly chosen landmark; an estimator fuses the two into a pose belief.
//!
//! - ekf mode: tracks a Gaussian belief with an extended Kalman filter, linearizing
//!   the motion and observation models around the current estimate.
//!
//! - pf mode: carries the belief as a weighted particle cloud, reweighting it through
//!   the observation likelihood and resampling when the weights degenerate.
//!
//! Both subcommands ship with a reference scenario whose parameters can be overridden
//! via flags, and write the per-step history (truth, odometry, estimate, errors, and
//! standard deviations) to a CSV file for offline analysis.

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::info;

use landnav::kalman::ExtendedKalmanFilter;
use landnav::particle::{ParticleFilter, ParticleFilterConfig, ResamplingAlgorithm};
use landnav::sim::{SimulationConfig, Simulator, run_simulation};

const LONG_ABOUT: &str = "LANDNAV: planar localization against a known landmark map.

This program simulates a vehicle driving over a square map of point landmarks. The
vehicle integrates noisy odometry and periodically measures range and bearing to a
randomly chosen landmark; an estimator fuses the two into a pose belief.

- ekf mode: tracks a Gaussian belief with an extended Kalman filter, linearizing the
  motion and observation models around the current estimate.

- pf mode: carries the belief as a weighted particle cloud, reweighting it through
  the observation likelihood and resampling when the weights degenerate.

Both subcommands ship with a reference scenario whose parameters can be overridden
via flags, and write the per-step history (truth, odometry, estimate, errors, and
standard deviations) to a CSV file for offline analysis.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Planar localization against a known landmark map.", long_about = LONG_ABOUT)]
struct Cli {
    /// Command to execute
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "ekf",
        about = "Run the reference scenario with an extended Kalman filter",
        long_about = "Run the simulation with an extended Kalman filter. The filter propagates a Gaussian pose belief through the unicycle motion model and corrects it with range-bearing observations, linearizing both models around the current estimate. A correction that fails (for example against a landmark at the vehicle position) is skipped and the predicted belief is kept."
    )]
    Kalman(KalmanArgs),
    #[command(
        name = "pf",
        about = "Run the reference scenario with a particle filter",
        long_about = "Run the simulation with a sampling importance resampling particle filter. Every particle propagates through the motion model under its own process noise draw, observations reweight the cloud through the measurement likelihood, and the cloud is resampled whenever the effective sample size falls below the configured fraction of the particle count."
    )]
    ParticleFilter(ParticleFilterArgs),
}

/// Scenario parameters shared by both estimators. Flags left unset fall back to the
/// reference scenario of the selected subcommand.
#[derive(Args, Clone, Debug)]
struct ScenarioArgs {
    /// Total simulated time (seconds)
    #[arg(long)]
    duration: Option<f64>,

    /// Integration time step (seconds)
    #[arg(long)]
    dt: Option<f64>,

    /// Seconds between range-bearing observations
    #[arg(long)]
    measurement_interval: Option<f64>,

    /// Number of landmarks scattered over the map
    #[arg(long)]
    landmarks: Option<usize>,

    /// Half side length of the square map (meters)
    #[arg(long)]
    half_extent: Option<f64>,

    /// Factor scaling the true noise covariances into the assumed ones
    #[arg(long)]
    noise_inflation: Option<f64>,

    /// Start of an observation outage window (seconds)
    #[arg(long, requires = "outage_end")]
    outage_start: Option<f64>,

    /// End of an observation outage window (seconds)
    #[arg(long, requires = "outage_start")]
    outage_end: Option<f64>,

    /// RNG seed for the map layout and every noise and resampling draw
    #[arg(long, default_value_t = 123456)]
    seed: u64,

    /// Output CSV path for the per-step history
    #[arg(short, long, default_value = "landnav_history.csv")]
    output: PathBuf,
}

/// Extended Kalman filter arguments
#[derive(Args, Clone, Debug)]
struct KalmanArgs {
    /// Common scenario parameters
    #[command(flatten)]
    scenario: ScenarioArgs,
}

/// Particle filter arguments
#[derive(Args, Clone, Debug)]
struct ParticleFilterArgs {
    /// Common scenario parameters
    #[command(flatten)]
    scenario: ScenarioArgs,

    /// Number of particles in the cloud
    #[arg(long, default_value_t = 300)]
    particles: usize,

    /// Resample when the effective sample size falls below this fraction of the
    /// particle count
    #[arg(long, default_value_t = 0.1)]
    resampling_threshold: f64,

    /// Resampling algorithm
    #[arg(long, value_enum, default_value_t = ResamplingAlgorithm::Reallocation)]
    resampling: ResamplingAlgorithm,
}

/// Initialize logging for the run.
///
/// `log_level` is parsed as a [log::LevelFilter] and falls back to `info` when it
/// does not parse. When `log_file` is given, output is appended there instead of
/// going to stderr.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

/// Apply command line overrides on top of a reference scenario.
fn build_config(mut config: SimulationConfig, args: &ScenarioArgs) -> SimulationConfig {
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if let Some(dt) = args.dt {
        config.dt = dt;
    }
    if let Some(interval) = args.measurement_interval {
        config.measurement_interval = interval;
    }
    if let Some(count) = args.landmarks {
        config.landmark_count = count;
    }
    if let Some(half_extent) = args.half_extent {
        config.map_half_extent = half_extent;
    }
    if let Some(inflation) = args.noise_inflation {
        config.noise_inflation = inflation;
    }
    if let (Some(start), Some(end)) = (args.outage_start, args.outage_end) {
        config.outage = Some((start, end));
    }
    config.seed = args.seed;
    config
}

fn run_kalman(args: &KalmanArgs) -> Result<(), Box<dyn Error>> {
    let config = build_config(SimulationConfig::ekf_scenario(), &args.scenario);
    info!(
        "EKF run: {:.0} s at dt = {} s over {} landmarks, seed {}",
        config.duration, config.dt, config.landmark_count, config.seed
    );

    let mut simulator = Simulator::new(config.clone())?;
    let mut filter = ExtendedKalmanFilter::new(
        config.initial_pose,
        config.initial_covariance,
        config.assumed_process_noise(),
        config.assumed_measurement_noise(),
        simulator.map().clone(),
    )?;

    let history = run_simulation(&mut filter, &mut simulator);
    history.to_csv(&args.scenario.output)?;
    info!(
        "Wrote {} records to {}",
        history.len(),
        args.scenario.output.display()
    );
    Ok(())
}

fn run_particle_filter(args: &ParticleFilterArgs) -> Result<(), Box<dyn Error>> {
    let config = build_config(SimulationConfig::particle_scenario(), &args.scenario);
    let filter_config = ParticleFilterConfig {
        particle_count: args.particles,
        resampling: args.resampling,
        resampling_threshold: args.resampling_threshold,
        ..ParticleFilterConfig::default()
    };
    info!(
        "PF run: {} particles, {} resampling, Neff threshold {:.2}, seed {}",
        filter_config.particle_count,
        filter_config.resampling,
        filter_config.resampling_threshold,
        config.seed
    );

    let mut simulator = Simulator::new(config.clone())?;
    let mut filter = ParticleFilter::new(
        config.initial_pose,
        filter_config,
        config.assumed_process_noise(),
        config.assumed_measurement_noise(),
        simulator.map().clone(),
        config.seed,
    )?;

    let history = run_simulation(&mut filter, &mut simulator);
    history.to_csv(&args.scenario.output)?;
    info!(
        "Wrote {} records to {}",
        history.len(),
        args.scenario.output.display()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Command::Kalman(args) => run_kalman(&args),
        Command::ParticleFilter(args) => run_particle_filter(&args),
    }
}
