//! Sampling-importance-resampling particle filter for landmark-based localization
//!
//! This module contains the sampling-based estimator for the planar localization
//! problem. The filter represents the belief as a weighted cloud of pose hypotheses:
//! prediction propagates every particle through the motion model with a fresh process
//! noise draw, and update reweights the cloud by the observation likelihood. An
//! effective-sample-size test decides when the cloud is resampled. Both resampling
//! algorithms are exposed as free functions so they can be exercised directly.
//!
//! Pose estimates and covariances are read views computed from the weighted cloud on
//! demand; the heading estimate is a linear weighted mean with the result wrapped,
//! which is adequate while the cloud stays concentrated but is not a circular mean.
//!
//! References: Thrun, Burgard, and Fox, "Probabilistic Robotics", Chapters 4.3
//! and 8.3.

use crate::linalg::{
    check_positive_semidefinite, check_positive_semidefinite_2x2, invert_covariance_2x2,
    matrix_square_root,
};
use crate::measurements::{LandmarkMap, RangeBearingMeasurement, observe_landmark};
use crate::rng::{RandomStream, StreamPurpose};
use crate::{EstimationError, Estimator, Pose2, Twist2, compose};

use std::fmt::{self, Debug, Display};

use nalgebra::{Matrix2, Matrix3, Vector3};
use rand_distr::{Distribution, Normal};

/// One pose hypothesis with its importance weight.
#[derive(Clone, Copy, Debug)]
pub struct Particle {
    pub pose: Pose2,
    pub weight: f64,
}
impl Particle {
    pub fn new(pose: Pose2, weight: f64) -> Particle {
        Particle { pose, weight }
    }
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("heading", &self.pose.heading)
            .field("weight", &self.weight)
            .finish()
    }
}

/// Resampling algorithm applied when the effective sample size collapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ResamplingAlgorithm {
    /// Systematic resampling: evenly spaced selection points from a single uniform
    /// offset, with every weight reset to uniform.
    LowVariance,
    /// Copy-count reallocation: heavy particles are duplicated proportionally to
    /// their weight, light particles survive a uniform trial.
    Reallocation,
}
impl Default for ResamplingAlgorithm {
    fn default() -> Self {
        ResamplingAlgorithm::Reallocation
    }
}
impl Display for ResamplingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResamplingAlgorithm::LowVariance => write!(f, "low-variance"),
            ResamplingAlgorithm::Reallocation => write!(f, "reallocation"),
        }
    }
}

/// Cloud shape and resampling policy for a [ParticleFilter].
#[derive(Clone, Debug)]
pub struct ParticleFilterConfig {
    /// Number of particles, at least 1
    pub particle_count: usize,
    /// Standard deviations [x, y, heading] of the initial cloud around the pose guess
    pub initial_spread: [f64; 3],
    /// Resampling algorithm
    pub resampling: ResamplingAlgorithm,
    /// Resample when the effective sample size falls below this fraction of the
    /// particle count, in (0, 1]
    pub resampling_threshold: f64,
}
impl Default for ParticleFilterConfig {
    fn default() -> Self {
        ParticleFilterConfig {
            particle_count: 300,
            initial_spread: [1.0, 1.0, 0.1],
            resampling: ResamplingAlgorithm::default(),
            resampling_threshold: 0.1,
        }
    }
}

/// Sampling-importance-resampling (SIR) particle filter
///
/// # Mathematical Background
///
/// The filter approximates the posterior over the pose with a set of weighted
/// particles $\\{x^{(i)}, w^{(i)}\\}$. Each step:
///
/// 1. **Predict**: every particle is propagated through the motion model with an
///    independent process noise draw added to the control,
///    $x^{(i)} \leftarrow f(x^{(i)}, u + w^{(i)}_u, \Delta t)$ with
///    $w^{(i)}_u \sim N(0, Q)$.
/// 2. **Weight**: on an observation $z$ each weight is multiplied by the Gaussian
///    likelihood $\exp(-\frac{1}{2} \nu^T R^{-1} \nu)$ of the wrapped innovation
///    $\nu$ against the particle's predicted observation, then the weights are
///    normalized. If every weight collapses to zero the filter resets them to
///    uniform and reports [EstimationError::WeightDegeneracy].
/// 3. **Resample**: when the effective sample size $N_{eff} = 1 / \sum (w^{(i)})^2$
///    falls below the configured fraction of the particle count, the cloud is
///    resampled with the configured [ResamplingAlgorithm] and the weights are
///    renormalized.
///
/// All randomness is drawn from [RandomStream]s derived from the filter's seed, a
/// per-call counter, and the purpose, so two filters built from the same
/// configuration and seed produce bit-identical trajectories.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Particle>,
    process_noise_sqrt: Matrix3<f64>,
    measurement_noise_inverse: Matrix2<f64>,
    resampling: ResamplingAlgorithm,
    resampling_threshold: f64,
    map: LandmarkMap,
    seed: u64,
    predict_count: u64,
    resample_count: u64,
}

impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.get_estimate();
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("effective_sample_size", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field("mean_pose", &mean)
            .field("resampling", &self.resampling)
            .finish()
    }
}

impl ParticleFilter {
    /// Create a new particle filter with its initial cloud sampled around a pose guess.
    ///
    /// The cloud is drawn from independent normals with the configured per-axis
    /// spread; headings are wrapped and every weight starts at `1 / particle_count`.
    ///
    /// # Arguments
    ///
    /// * `initial_pose` - Center of the initial cloud.
    /// * `config` - Cloud shape and resampling policy.
    /// * `process_noise` - Process noise covariance Q on the body-frame twist.
    /// * `measurement_noise` - Measurement noise covariance R on [range, bearing];
    ///   must be invertible since the likelihood weights through its inverse.
    /// * `map` - Known landmark map; must contain at least one landmark.
    /// * `seed` - Root seed all of the filter's random streams derive from.
    ///
    /// # Returns
    ///
    /// The filter, or [EstimationError::InvalidConfiguration] describing the first
    /// rejected parameter.
    pub fn new(
        initial_pose: Pose2,
        config: ParticleFilterConfig,
        process_noise: Matrix3<f64>,
        measurement_noise: Matrix2<f64>,
        map: LandmarkMap,
        seed: u64,
    ) -> Result<ParticleFilter, EstimationError> {
        if config.particle_count == 0 {
            return Err(EstimationError::InvalidConfiguration(
                "particle count must be at least 1".to_string(),
            ));
        }
        if !(config.resampling_threshold > 0.0 && config.resampling_threshold <= 1.0) {
            return Err(EstimationError::InvalidConfiguration(format!(
                "resampling threshold must be in (0, 1], got {}",
                config.resampling_threshold
            )));
        }
        if config
            .initial_spread
            .iter()
            .any(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(EstimationError::InvalidConfiguration(format!(
                "initial spread must be finite and non-negative, got {:?}",
                config.initial_spread
            )));
        }
        if map.is_empty() {
            return Err(EstimationError::InvalidConfiguration(
                "landmark map is empty".to_string(),
            ));
        }
        check_positive_semidefinite(&process_noise)
            .map_err(|e| EstimationError::InvalidConfiguration(format!("process noise: {e}")))?;
        check_positive_semidefinite_2x2(&measurement_noise).map_err(|e| {
            EstimationError::InvalidConfiguration(format!("measurement noise: {e}"))
        })?;
        let measurement_noise_inverse = invert_covariance_2x2(&measurement_noise).map_err(|_| {
            EstimationError::InvalidConfiguration(
                "measurement noise must be invertible".to_string(),
            )
        })?;

        let mut stream = RandomStream::derive(seed, 0, StreamPurpose::InitialCloud);
        let uniform_weight = 1.0 / config.particle_count as f64;
        let particles = (0..config.particle_count)
            .map(|_| {
                let pose = Pose2::new(
                    initial_pose.x
                        + Normal::new(0.0, config.initial_spread[0])
                            .unwrap()
                            .sample(&mut stream),
                    initial_pose.y
                        + Normal::new(0.0, config.initial_spread[1])
                            .unwrap()
                            .sample(&mut stream),
                    initial_pose.heading
                        + Normal::new(0.0, config.initial_spread[2])
                            .unwrap()
                            .sample(&mut stream),
                );
                Particle::new(pose, uniform_weight)
            })
            .collect();

        Ok(ParticleFilter {
            particles,
            process_noise_sqrt: matrix_square_root(&process_noise),
            measurement_noise_inverse,
            resampling: config.resampling,
            resampling_threshold: config.resampling_threshold,
            map,
            seed,
            predict_count: 0,
            resample_count: 0,
        })
    }

    /// The current particle cloud.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Effective sample size $N_{eff} = 1 / \sum w_i^2$ of the normalized weights.
    ///
    /// Ranges from 1 (all weight on a single particle) to the particle count
    /// (uniform weights).
    pub fn effective_sample_size(&self) -> f64 {
        let sum_of_squares: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }

    /// Normalize the weights to sum to one.
    ///
    /// Returns `true` when the weights had collapsed (zero or non-finite sum) and
    /// were reset to uniform instead.
    pub fn normalize_weights(&mut self) -> bool {
        let sum: f64 = self.particles.iter().map(|p| p.weight).sum();
        if sum > 0.0 && sum.is_finite() {
            for particle in &mut self.particles {
                particle.weight /= sum;
            }
            false
        } else {
            let uniform = 1.0 / self.particles.len() as f64;
            for particle in &mut self.particles {
                particle.weight = uniform;
            }
            true
        }
    }

    /// Resample the cloud with the configured algorithm and renormalize.
    ///
    /// The reallocation algorithm hands back raw copy weights whose sum is not one;
    /// the immediate renormalization restores the filter's weight invariant without
    /// changing the relative weighting.
    pub fn resample(&mut self) {
        let mut stream =
            RandomStream::derive(self.seed, self.resample_count, StreamPurpose::Resampling);
        self.resample_count += 1;
        self.particles = match self.resampling {
            ResamplingAlgorithm::LowVariance => low_variance_resample(&self.particles, &mut stream),
            ResamplingAlgorithm::Reallocation => {
                reallocation_resample(&self.particles, &mut stream)
            }
        };
        self.normalize_weights();
    }

    fn weighted_mean(&self) -> Vector3<f64> {
        let mut mean = Vector3::zeros();
        for particle in &self.particles {
            mean += particle.weight * Vector3::from(particle.pose);
        }
        mean
    }
}

impl Estimator for ParticleFilter {
    /// Predict step: propagate every particle with an independent process noise draw.
    ///
    /// The draw is colored by the square root of Q and added to the control before
    /// the shared Euler integration; headings come back wrapped.
    fn predict(&mut self, control: &Twist2, dt: f64) {
        let mut stream =
            RandomStream::derive(self.seed, self.predict_count, StreamPurpose::ProcessNoise);
        self.predict_count += 1;
        let standard_normal = Normal::new(0.0, 1.0).unwrap();
        for particle in &mut self.particles {
            let draw = Vector3::new(
                standard_normal.sample(&mut stream),
                standard_normal.sample(&mut stream),
                standard_normal.sample(&mut stream),
            );
            let noise = self.process_noise_sqrt * draw;
            let noisy_control = Twist2::new(
                control.vx + noise[0],
                control.vy + noise[1],
                control.omega + noise[2],
            );
            particle.pose = compose(&particle.pose, &noisy_control, dt);
        }
    }

    /// Update step: reweight by the observation likelihood, normalize, and resample
    /// when the effective sample size collapses below the configured threshold.
    fn update(&mut self, observation: &RangeBearingMeasurement) -> Result<(), EstimationError> {
        let landmark = *self.map.get(observation.landmark_id)?;
        for particle in &mut self.particles {
            let predicted =
                observe_landmark(&particle.pose, &landmark, observation.landmark_id);
            let innovation = observation.innovation(&predicted);
            let mahalanobis = innovation.dot(&(self.measurement_noise_inverse * innovation));
            particle.weight *= (-0.5 * mahalanobis).exp();
        }
        let degenerate = self.normalize_weights();
        if self.effective_sample_size()
            < self.resampling_threshold * self.particles.len() as f64
        {
            self.resample();
        }
        if degenerate {
            Err(EstimationError::WeightDegeneracy)
        } else {
            Ok(())
        }
    }

    /// Weighted mean of the cloud, heading wrapped.
    fn get_estimate(&self) -> Pose2 {
        let mean = self.weighted_mean();
        Pose2::new(mean[0], mean[1], mean[2])
    }

    /// Weighted empirical covariance of the cloud about its weighted mean.
    fn get_certainty(&self) -> Matrix3<f64> {
        let mean = self.weighted_mean();
        let mut covariance = Matrix3::zeros();
        for particle in &self.particles {
            let diff = Vector3::from(particle.pose) - mean;
            covariance += particle.weight * diff * diff.transpose();
        }
        covariance
    }

    fn effective_sample_size(&self) -> Option<f64> {
        Some(ParticleFilter::effective_sample_size(self))
    }
}

/// Low-variance (systematic) resampling.
///
/// Draws a single uniform offset in `[0, 1/N)` and walks the cumulative weight
/// distribution at selection points spaced `1/N` apart, returning `N` particles
/// with every weight reset to `1/N`. Compared with independent multinomial draws
/// the single shared offset keeps the sampling variance minimal.
///
/// # Arguments
/// * `particles` - Cloud with normalized weights.
/// * `stream` - Stream providing the single offset draw.
///
/// # Returns
/// * The resampled cloud, uniformly weighted. Empty input yields empty output.
pub fn low_variance_resample(particles: &[Particle], stream: &mut RandomStream) -> Vec<Particle> {
    let n = particles.len();
    if n == 0 {
        return Vec::new();
    }
    let offset = stream.uniform() / n as f64;
    let uniform_weight = 1.0 / n as f64;
    let mut resampled = Vec::with_capacity(n);
    let mut cumulative = particles[0].weight;
    let mut index = 0;
    for k in 0..n {
        let position = k as f64 / n as f64 + offset;
        while position > cumulative && index < n - 1 {
            index += 1;
            cumulative += particles[index].weight;
        }
        resampled.push(Particle::new(particles[index].pose, uniform_weight));
    }
    resampled
}

/// Copy-count reallocation resampling.
///
/// Particles at or above the uniform weight `1/N` are duplicated
/// `floor(N * w)` times, each copy carrying `w / copies`; particles below it
/// survive a uniform `[0, 1/N)` trial against their weight and, if kept, are reset
/// to `1/N`. The output is padded (or truncated) to exactly `N` particles by
/// uniform draws over the input cloud at weight `1/N`.
///
/// The returned weights are the algorithm's raw copy weights and do not sum to
/// one; [ParticleFilter::resample] renormalizes immediately after, which leaves
/// the relative weighting intact.
///
/// # Arguments
/// * `particles` - Cloud with normalized weights.
/// * `stream` - Stream providing the survival trials and padding draws.
///
/// # Returns
/// * The resampled cloud of exactly `particles.len()` entries, raw-weighted.
pub fn reallocation_resample(particles: &[Particle], stream: &mut RandomStream) -> Vec<Particle> {
    let n = particles.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform_weight = 1.0 / n as f64;
    let mut resampled = Vec::with_capacity(n);
    for particle in particles {
        if particle.weight >= uniform_weight {
            let copies = (particle.weight * n as f64).floor() as usize;
            let copy_weight = particle.weight / copies as f64;
            for _ in 0..copies {
                resampled.push(Particle::new(particle.pose, copy_weight));
            }
        } else {
            let keep_threshold = stream.uniform() / n as f64;
            if particle.weight >= keep_threshold {
                resampled.push(Particle::new(particle.pose, uniform_weight));
            }
        }
    }
    while resampled.len() < n {
        let pick = ((stream.uniform() * n as f64) as usize).min(n - 1);
        resampled.push(Particle::new(particles[pick].pose, uniform_weight));
    }
    resampled.truncate(n);
    resampled
}
