//! World simulator, run harness, and CSV history for localization runs.
//!
//! This module provides:
//! - `SimulationConfig` carrying the reference scenario constants, with validation
//! - `Simulator` fabricating ground truth, a drifting odometry track, and noisy
//!   range-bearing observations from deterministic derived streams
//! - `StepRecord` and `RunHistory` for per-step results with CSV import/export
//! - `RunSummary` aggregate error metrics
//! - `run_simulation` for driving any [Estimator] through a full scenario
//!
//! Every random draw comes from a [RandomStream] derived from the configured seed,
//! the step index, and a [StreamPurpose], so two simulators built from the same
//! configuration replay bit-identical worlds.

use std::error::Error;
use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt::{self, Display};
use std::path::Path;

use log::{info, warn};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::linalg::{
    check_positive_semidefinite, check_positive_semidefinite_2x2, diagonal_covariance_2,
    diagonal_covariance_3, matrix_square_root, matrix_square_root_2x2,
};
use crate::measurements::{LandmarkMap, RangeBearingMeasurement, observe_landmark};
use crate::rng::{RandomStream, StreamPurpose};
use crate::{EstimationError, Estimator, Pose2, Twist2, compose, wrap_to_pi};

/// Scenario parameters for a simulated localization run.
///
/// The two associated constructors mirror the reference scenarios; individual
/// fields can be overridden with struct update syntax. [SimulationConfig::validate]
/// rejects unusable parameter combinations and is called by [Simulator::new].
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Total simulated duration in seconds
    pub duration: f64,
    /// Integration time step in seconds
    pub dt: f64,
    /// Seconds between landmark observations
    pub measurement_interval: f64,
    /// Number of landmarks scattered over the map
    pub landmark_count: usize,
    /// Half side length of the square map in meters
    pub map_half_extent: f64,
    /// True process noise covariance driving the odometry drift
    pub process_noise_true: Matrix3<f64>,
    /// True measurement noise covariance corrupting the observations
    pub measurement_noise_true: Matrix2<f64>,
    /// Factor scaling the true noise covariances into the estimator's assumed ones
    pub noise_inflation: f64,
    /// Initial pose shared by the truth, the odometry track, and the estimator prior
    pub initial_pose: Pose2,
    /// Initial covariance of the EKF prior
    pub initial_covariance: Matrix3<f64>,
    /// Observation outage window (start, end) in seconds; observations are absent
    /// inside it, bounds inclusive
    pub outage: Option<(f64, f64)>,
    /// Root seed every random stream of the run derives from
    pub seed: u64,
}

impl SimulationConfig {
    /// Reference EKF scenario: a long run over a dense map with a coarse sensor.
    pub fn ekf_scenario() -> SimulationConfig {
        let one_degree = 1.0_f64.to_radians();
        SimulationConfig {
            duration: 6000.0,
            dt: 1.0,
            measurement_interval: 1.0,
            landmark_count: 30,
            map_half_extent: 70.0,
            process_noise_true: diagonal_covariance_3([0.01, 0.01, one_degree]),
            measurement_noise_true: diagonal_covariance_2([3.0, 3.0 * one_degree]),
            noise_inflation: 1.0,
            initial_pose: Pose2::new(1.0, -40.0, -FRAC_PI_2),
            initial_covariance: 10.0 * diagonal_covariance_3([1.0, 1.0, one_degree]),
            outage: None,
            seed: 123456,
        }
    }

    /// Reference particle filter scenario: a shorter run over a sparse map with a
    /// sharper sensor and the assumed noise inflated over the true one.
    pub fn particle_scenario() -> SimulationConfig {
        let one_degree = 1.0_f64.to_radians();
        SimulationConfig {
            duration: 1000.0,
            dt: 1.0,
            measurement_interval: 1.0,
            landmark_count: 5,
            map_half_extent: 60.0,
            process_noise_true: diagonal_covariance_3([0.02, 0.02, one_degree]),
            measurement_noise_true: diagonal_covariance_2([0.5, one_degree]),
            noise_inflation: 2.0,
            initial_pose: Pose2::new(1.0, -50.0, 0.0),
            initial_covariance: diagonal_covariance_3([1.0, 1.0, 0.1]),
            outage: None,
            seed: 123456,
        }
    }

    /// Number of integration steps in the run.
    pub fn n_steps(&self) -> usize {
        (self.duration / self.dt).round() as usize
    }

    /// Process noise covariance the estimator is configured with.
    pub fn assumed_process_noise(&self) -> Matrix3<f64> {
        self.process_noise_true * self.noise_inflation
    }

    /// Measurement noise covariance the estimator is configured with.
    pub fn assumed_measurement_noise(&self) -> Matrix2<f64> {
        self.measurement_noise_true * self.noise_inflation
    }

    /// Validate the scenario parameters.
    pub fn validate(&self) -> Result<(), EstimationError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "time step must be positive and finite, got {}",
                self.dt
            )));
        }
        if !(self.duration.is_finite() && self.duration >= self.dt) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "duration must cover at least one step of {} s, got {}",
                self.dt, self.duration
            )));
        }
        if !(self.measurement_interval.is_finite() && self.measurement_interval > 0.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "measurement interval must be positive and finite, got {}",
                self.measurement_interval
            )));
        }
        if self.landmark_count == 0 {
            return Err(EstimationError::InvalidConfiguration(
                "at least one landmark is required".to_string(),
            ));
        }
        if !(self.map_half_extent.is_finite() && self.map_half_extent > 0.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "map half extent must be positive and finite, got {}",
                self.map_half_extent
            )));
        }
        if !(self.noise_inflation.is_finite() && self.noise_inflation > 0.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "noise inflation factor must be positive and finite, got {}",
                self.noise_inflation
            )));
        }
        if let Some((start, end)) = self.outage {
            if !(start.is_finite() && end.is_finite() && start <= end) {
                return Err(EstimationError::InvalidConfiguration(format!(
                    "outage window start must not exceed its end, got ({start}, {end})"
                )));
            }
        }
        check_positive_semidefinite(&self.process_noise_true).map_err(|e| {
            EstimationError::InvalidConfiguration(format!("true process noise: {e}"))
        })?;
        check_positive_semidefinite_2x2(&self.measurement_noise_true).map_err(|e| {
            EstimationError::InvalidConfiguration(format!("true measurement noise: {e}"))
        })?;
        check_positive_semidefinite(&self.initial_covariance).map_err(|e| {
            EstimationError::InvalidConfiguration(format!("initial covariance: {e}"))
        })?;
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig::ekf_scenario()
    }
}

/// Output of one simulator step: the inputs an estimator consumes plus the truth
/// for error metrics.
#[derive(Clone, Copy, Debug)]
pub struct SimStep {
    /// Simulation time at the end of the step, in seconds
    pub time: f64,
    /// Ground-truth pose after the step
    pub true_pose: Pose2,
    /// Dead-reckoned odometry pose after the step
    pub odometry_pose: Pose2,
    /// Noisy control fed to the estimator
    pub control: Twist2,
    /// Landmark observation, absent off-cadence and inside the outage window
    pub observation: Option<RangeBearingMeasurement>,
}

/// World and sensor simulator for landmark localization runs.
///
/// The true trajectory creeps laterally under sinusoidal steering and is
/// deterministic. Each step draws a fresh process noise twist, hands the estimator
/// the true control plus that noise, and dead-reckons the odometry track with the
/// same corrupted control, so the track drifts away from the truth exactly as an
/// uncorrected estimator would. Observations corrupt the exact range and bearing
/// to one uniformly drawn landmark with the true measurement noise.
#[derive(Clone, Debug)]
pub struct Simulator {
    config: SimulationConfig,
    map: LandmarkMap,
    true_pose: Pose2,
    odometry_pose: Pose2,
    process_noise_sqrt: Matrix3<f64>,
    measurement_noise_sqrt: Matrix2<f64>,
    steps_per_observation: u64,
    step_index: u64,
}

impl Simulator {
    /// Build a simulator, validating the configuration and scattering the landmark
    /// map from the map-layout stream.
    pub fn new(config: SimulationConfig) -> Result<Simulator, EstimationError> {
        config.validate()?;
        let mut map_stream = RandomStream::derive(config.seed, 0, StreamPurpose::MapLayout);
        let map = LandmarkMap::scatter_uniform(
            config.landmark_count,
            config.map_half_extent,
            &mut map_stream,
        );
        let steps_per_observation =
            (config.measurement_interval / config.dt).round().max(1.0) as u64;
        Ok(Simulator {
            map,
            true_pose: config.initial_pose,
            odometry_pose: config.initial_pose,
            process_noise_sqrt: matrix_square_root(&config.process_noise_true),
            measurement_noise_sqrt: matrix_square_root_2x2(&config.measurement_noise_true),
            steps_per_observation,
            step_index: 0,
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn map(&self) -> &LandmarkMap {
        &self.map
    }

    pub fn true_pose(&self) -> Pose2 {
        self.true_pose
    }

    pub fn odometry_pose(&self) -> Pose2 {
        self.odometry_pose
    }

    pub fn n_steps(&self) -> usize {
        self.config.n_steps()
    }

    /// True control at step `k`: constant lateral creep with a sinusoidal angular
    /// rate completing one and a half modulation periods over the run.
    pub fn true_control(&self, k: u64) -> Twist2 {
        let n = self.config.n_steps() as f64;
        Twist2::new(
            0.0,
            0.025,
            0.1_f64.to_radians() * (3.0 * PI * k as f64 / n).sin(),
        )
    }

    /// Advance the world by one step and fabricate the estimator inputs.
    ///
    /// Draws three normals from the step's odometry stream for the control error.
    /// The returned control is the true control plus that error, and the odometry
    /// pose is the dead reckoning of exactly that control, so an estimator that
    /// never fuses an observation reproduces the odometry track.
    pub fn step(&mut self) -> SimStep {
        self.step_index += 1;
        let k = self.step_index;
        let dt = self.config.dt;
        let control = self.true_control(k);
        self.true_pose = compose(&self.true_pose, &control, dt);

        let mut odometry_stream = RandomStream::derive(self.config.seed, k, StreamPurpose::Odometry);
        let standard_normal = Normal::new(0.0, 1.0).unwrap();
        let noise = self.process_noise_sqrt
            * Vector3::new(
                standard_normal.sample(&mut odometry_stream),
                standard_normal.sample(&mut odometry_stream),
                standard_normal.sample(&mut odometry_stream),
            );
        let noisy_control = Twist2::new(
            control.vx + noise[0],
            control.vy + noise[1],
            control.omega + noise[2],
        );
        self.odometry_pose = compose(&self.odometry_pose, &noisy_control, dt);

        SimStep {
            time: k as f64 * dt,
            true_pose: self.true_pose,
            odometry_pose: self.odometry_pose,
            control: noisy_control,
            observation: self.observe(k),
        }
    }

    /// Observation at step `k`: present only on the measurement cadence and outside
    /// the outage window. The step's observation stream draws the landmark index
    /// uniformly over the whole map, then two normals for the range and bearing
    /// noise. The noisy range is clamped at zero and the bearing wrapped.
    fn observe(&self, k: u64) -> Option<RangeBearingMeasurement> {
        if k % self.steps_per_observation != 0 {
            return None;
        }
        let time = k as f64 * self.config.dt;
        if let Some((start, end)) = self.config.outage {
            if time >= start && time <= end {
                return None;
            }
        }
        let mut stream = RandomStream::derive(self.config.seed, k, StreamPurpose::Observation);
        let landmark_id =
            ((stream.uniform() * self.map.len() as f64) as usize).min(self.map.len() - 1);
        let landmark = *self.map.get(landmark_id).ok()?;
        let exact = observe_landmark(&self.true_pose, &landmark, landmark_id);
        let standard_normal = Normal::new(0.0, 1.0).unwrap();
        let noise = self.measurement_noise_sqrt
            * Vector2::new(
                standard_normal.sample(&mut stream),
                standard_normal.sample(&mut stream),
            );
        Some(RangeBearingMeasurement::new(
            (exact.range + noise[0]).max(0.0),
            exact.bearing + noise[1],
            landmark_id,
        ))
    }
}

/// One row of a [RunHistory].
///
/// Flat scalar fields so a record maps directly onto a CSV row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Simulation time in seconds
    pub time: f64,
    /// Ground-truth x position in meters
    pub true_x: f64,
    /// Ground-truth y position in meters
    pub true_y: f64,
    /// Ground-truth heading in radians
    pub true_heading: f64,
    /// Odometry x position in meters
    pub odom_x: f64,
    /// Odometry y position in meters
    pub odom_y: f64,
    /// Odometry heading in radians
    pub odom_heading: f64,
    /// Estimated x position in meters
    pub est_x: f64,
    /// Estimated y position in meters
    pub est_y: f64,
    /// Estimated heading in radians
    pub est_heading: f64,
    /// Estimate minus truth, x component
    pub error_x: f64,
    /// Estimate minus truth, y component
    pub error_y: f64,
    /// Estimate minus truth heading, wrapped to (-pi, pi]
    pub error_heading: f64,
    /// Reported standard deviation of x, from the covariance diagonal
    pub std_x: f64,
    /// Reported standard deviation of y
    pub std_y: f64,
    /// Reported standard deviation of the heading
    pub std_heading: f64,
    /// Whether an observation was fused this step
    pub observed: bool,
    /// Effective sample size; empty for estimators without a sample set
    pub neff: Option<f64>,
}

/// Per-step history of a run, appended once per step.
#[derive(Clone, Debug, Default)]
pub struct RunHistory {
    records: Vec<StepRecord>,
}

impl RunHistory {
    pub fn new() -> RunHistory {
        RunHistory {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the history to a CSV file, one row per step.
    ///
    /// # Example
    ///
    /// ```
    /// use landnav::sim::RunHistory;
    ///
    /// let history = RunHistory::new();
    /// let path = std::env::temp_dir().join("landnav_doc_history.csv");
    /// history.to_csv(&path).expect("Failed to write history");
    /// let _ = std::fs::remove_file(&path);
    /// ```
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a history previously written by [RunHistory::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<RunHistory, Box<dyn Error>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut history = RunHistory::new();
        for result in reader.deserialize() {
            history.push(result?);
        }
        Ok(history)
    }

    /// Aggregate error metrics over the whole run.
    pub fn summary(&self) -> RunSummary {
        let steps = self.records.len();
        if steps == 0 {
            return RunSummary {
                steps: 0,
                mean_translation_error: 0.0,
                rms_translation_error: 0.0,
                max_translation_error: 0.0,
                final_translation_error: 0.0,
                mean_absolute_heading_error: 0.0,
            };
        }
        let mut sum = 0.0;
        let mut sum_squared = 0.0;
        let mut max = 0.0_f64;
        let mut sum_heading = 0.0;
        for record in &self.records {
            let translation = record.error_x.hypot(record.error_y);
            sum += translation;
            sum_squared += translation * translation;
            max = max.max(translation);
            sum_heading += record.error_heading.abs();
        }
        let count = steps as f64;
        let last = &self.records[steps - 1];
        RunSummary {
            steps,
            mean_translation_error: sum / count,
            rms_translation_error: (sum_squared / count).sqrt(),
            max_translation_error: max,
            final_translation_error: last.error_x.hypot(last.error_y),
            mean_absolute_heading_error: sum_heading / count,
        }
    }
}

/// Aggregate error metrics of a completed run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub mean_translation_error: f64,
    pub rms_translation_error: f64,
    pub max_translation_error: f64,
    pub final_translation_error: f64,
    pub mean_absolute_heading_error: f64,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps, translation error mean {:.3} m / rms {:.3} m / max {:.3} m / final {:.3} m, mean |heading error| {:.3} deg",
            self.steps,
            self.mean_translation_error,
            self.rms_translation_error,
            self.max_translation_error,
            self.final_translation_error,
            self.mean_absolute_heading_error.to_degrees()
        )
    }
}

/// Drive an estimator through a full simulated scenario.
///
/// Each step advances the world, feeds the noisy control to the estimator's
/// predict, fuses the observation when one arrives, and appends one history
/// record. A failed update is logged as a warning and the step continues on the
/// predicted belief.
pub fn run_simulation(estimator: &mut dyn Estimator, simulator: &mut Simulator) -> RunHistory {
    let dt = simulator.config().dt;
    let n_steps = simulator.n_steps();
    info!(
        "simulating {} steps of {} s over a map of {}",
        n_steps,
        dt,
        simulator.map()
    );
    let mut history = RunHistory::new();
    for _ in 0..n_steps {
        let step = simulator.step();
        estimator.predict(&step.control, dt);
        let mut observed = false;
        if let Some(observation) = &step.observation {
            match estimator.update(observation) {
                Ok(()) => observed = true,
                Err(error) => warn!("update failed at t = {:.1} s: {}", step.time, error),
            }
        }
        let estimate = estimator.get_estimate();
        let covariance = estimator.get_certainty();
        history.push(StepRecord {
            time: step.time,
            true_x: step.true_pose.x,
            true_y: step.true_pose.y,
            true_heading: step.true_pose.heading,
            odom_x: step.odometry_pose.x,
            odom_y: step.odometry_pose.y,
            odom_heading: step.odometry_pose.heading,
            est_x: estimate.x,
            est_y: estimate.y,
            est_heading: estimate.heading,
            error_x: estimate.x - step.true_pose.x,
            error_y: estimate.y - step.true_pose.y,
            error_heading: wrap_to_pi(estimate.heading - step.true_pose.heading),
            std_x: covariance[(0, 0)].max(0.0).sqrt(),
            std_y: covariance[(1, 1)].max(0.0).sqrt(),
            std_heading: covariance[(2, 2)].max(0.0).sqrt(),
            observed,
            neff: estimator.effective_sample_size(),
        });
    }
    info!("run complete: {}", history.summary());
    history
}
