//! Landmark navigation toolbox for planar localization filters
//!
//! This crate provides a set of tools for implementing and analyzing recursive Bayesian
//! localization filters for planar (2D) mobile robots operating against a known landmark
//! map. The filters are implemented as structs that can be initialized and then stepped
//! with new control and observation data. Two interchangeable estimators are provided:
//! an Extended Kalman Filter ([kalman::ExtendedKalmanFilter]) and a
//! Sampling-Importance-Resampling particle filter ([particle::ParticleFilter]). Both
//! consume noisy odometry in the form of a body-frame twist and intermittent range and
//! bearing observations of a single landmark per step, and both expose a pose estimate
//! together with an uncertainty representation through the common [Estimator] trait.
//!
//! Primarily built off of two crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): linear algebra types and
//!   decompositions used throughout the filters.
//! - [`rand`](https://crates.io/crates/rand) /
//!   [`rand_distr`](https://crates.io/crates/rand_distr): random sampling for the
//!   particle filter and the simulation utilities, always through the deterministic
//!   streams in [rng].
//!
//! The primary reference texts are _Probabilistic Robotics_ by Thrun, Burgard, and Fox
//! and _Estimation with Applications to Tracking and Navigation_ by Bar-Shalom, Li, and
//! Kirubarajan. Variables are generally named for the quantity they represent rather
//! than the symbol used in the books; this rule is sometimes relaxed inside a function
//! body where the local symbol (`q`, `s`, `k`) reads closer to the derivation.
//!
//! # State, control, and observation definitions
//!
//! The planar navigation state is the robot pose:
//!
//! $$
//! x = [p_x, p_y, \psi]
//! $$
//!
//! where $p_x$ and $p_y$ are the world-frame position in meters and $\psi$ is the
//! heading in radians, always normalized to $(-\pi, \pi]$. The control input is a
//! body-frame twist $u = [v_x, v_y, \omega]$ (m/s, m/s, rad/s). Pose propagation is the
//! Euler integration of the twist rotated into the world frame:
//!
//! $$
//! p_x(+) = p_x(-) + (v_x \cos\psi - v_y \sin\psi)\\, \Delta t
//! $$
//! $$
//! p_y(+) = p_y(-) + (v_x \sin\psi + v_y \cos\psi)\\, \Delta t
//! $$
//! $$
//! \psi(+) = \psi(-) + \omega \\, \Delta t
//! $$
//!
//! Observations are range and bearing to a known landmark $m_i = [m_x, m_y]$:
//!
//! $$
//! h(x, m_i) = \left[ \sqrt{(m_x - p_x)^2 + (m_y - p_y)^2},\\;
//! \operatorname{atan2}(m_y - p_y, m_x - p_x) - \psi \right]
//! $$
//!
//! with the bearing wrapped to $(-\pi, \pi]$. The Jacobians of both models used by the
//! EKF live in [linearize].
//!
//! This top-level module provides the shared pose and twist types, the angle wrapping
//! utilities, the pose composition function used by both the filters and the world
//! simulation, and the [Estimator] trait implemented by both filters.
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod measurements;
pub mod particle;
pub mod rng;
pub mod sim;

use nalgebra::{Matrix3, Vector3};

use std::convert::{From, TryFrom};
use std::fmt::{self, Display};

use thiserror::Error;

use crate::measurements::RangeBearingMeasurement;

/// Errors surfaced by filter construction and by per-step estimation.
///
/// Numerical failures (`SingularInnovation`, `DegenerateObservation`,
/// `CovarianceNotPositiveSemiDefinite`, `UnknownLandmark`) abort the failing update and
/// leave the filter at its predicted belief, so the caller can log the event and keep
/// stepping. `WeightDegeneracy` reports that the particle weights collapsed and were
/// reset to uniform. `InvalidConfiguration` is returned by constructors and is fatal:
/// a filter is never built from a rejected configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    /// The innovation covariance could not be inverted.
    #[error("innovation covariance is singular or ill-conditioned (determinant {determinant:.6e})")]
    SingularInnovation { determinant: f64 },
    /// The robot pose coincides with the observed landmark; the observation Jacobian
    /// is undefined at zero range.
    #[error("degenerate observation geometry: range to the landmark is zero")]
    DegenerateObservation,
    /// An updated covariance developed a negative eigenvalue beyond floating tolerance.
    #[error("covariance is not positive semi-definite (minimum eigenvalue {min_eigenvalue:.6e})")]
    CovarianceNotPositiveSemiDefinite { min_eigenvalue: f64 },
    /// The observation references a landmark index outside the map.
    #[error("landmark {id} is not in the map ({landmarks} landmarks)")]
    UnknownLandmark { id: usize, landmarks: usize },
    /// Every particle weight collapsed to zero during weighting; the filter reset the
    /// weights to uniform before returning.
    #[error("all particle weights collapsed to zero; weights were reset to uniform")]
    WeightDegeneracy,
    /// A constructor rejected its configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Generic Bayesian localization filter trait providing the interface shared by the
/// Kalman-family and particle-family estimators.
///
/// Callers drive a filter with one [predict](Estimator::predict) per time step and one
/// [update](Estimator::update) per received observation, and read the current belief
/// through [get_estimate](Estimator::get_estimate) and
/// [get_certainty](Estimator::get_certainty). A step without an observation is simply a
/// predict with no update. The estimate accessors are read views of the filter's
/// internal belief and never mutate it.
pub trait Estimator {
    /// Propagate the belief through the motion model over `dt` seconds.
    fn predict(&mut self, control: &Twist2, dt: f64);
    /// Correct the belief with a range-bearing observation. On error the belief is
    /// left at its predicted (time-propagated) value.
    fn update(&mut self, observation: &RangeBearingMeasurement) -> Result<(), EstimationError>;
    /// Current pose estimate.
    fn get_estimate(&self) -> Pose2;
    /// Current 3x3 pose covariance (empirical for the particle filter).
    fn get_certainty(&self) -> Matrix3<f64>;
    /// Effective sample size, for estimators whose belief is a sample set.
    /// Covariance-based estimators report `None`.
    fn effective_sample_size(&self) -> Option<f64> {
        None
    }
}

/// Planar robot pose: world-frame position in meters and heading in radians.
///
/// The heading is normalized to $(-\pi, \pi]$ by [Pose2::new] and by every conversion
/// into `Pose2`; code constructing poses by struct literal is responsible for providing
/// an already-wrapped heading.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pose2 {
    /// World-frame x position in meters
    pub x: f64,
    /// World-frame y position in meters
    pub y: f64,
    /// Heading in radians, in (-pi, pi]
    pub heading: f64,
}
impl Pose2 {
    /// Create a pose, wrapping the supplied heading into $(-\pi, \pi]$.
    ///
    /// # Example
    /// ```rust
    /// use landnav::Pose2;
    /// use std::f64::consts::PI;
    /// let pose = Pose2::new(1.0, -2.0, 3.0 * PI);
    /// assert_eq!(pose.heading, PI);
    /// ```
    pub fn new(x: f64, y: f64, heading: f64) -> Pose2 {
        Pose2 {
            x,
            y,
            heading: wrap_to_pi(heading),
        }
    }
}
impl Display for Pose2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose2 {{ x: {:.3} m, y: {:.3} m, heading: {:.2} deg }}",
            self.x,
            self.y,
            self.heading.to_degrees()
        )
    }
}
impl From<Pose2> for Vector3<f64> {
    /// Converts a pose to a `Vector3<f64>` ordered `[x, y, heading]`.
    fn from(pose: Pose2) -> Self {
        Vector3::new(pose.x, pose.y, pose.heading)
    }
}
impl From<&Pose2> for Vector3<f64> {
    fn from(pose: &Pose2) -> Self {
        Vector3::new(pose.x, pose.y, pose.heading)
    }
}
impl From<Vector3<f64>> for Pose2 {
    /// Converts a `[x, y, heading]` vector to a pose, wrapping the heading.
    fn from(vector: Vector3<f64>) -> Self {
        Pose2::new(vector[0], vector[1], vector[2])
    }
}
impl From<Pose2> for Vec<f64> {
    fn from(pose: Pose2) -> Self {
        vec![pose.x, pose.y, pose.heading]
    }
}
impl TryFrom<&[f64]> for Pose2 {
    type Error = &'static str;
    /// Attempts to create a pose from a slice of 3 elements ordered `[x, y, heading]`.
    fn try_from(slice: &[f64]) -> Result<Self, Self::Error> {
        if slice.len() != 3 {
            return Err("Slice must have length 3 for Pose2");
        }
        Ok(Pose2::new(slice[0], slice[1], slice[2]))
    }
}
impl TryFrom<Vec<f64>> for Pose2 {
    type Error = &'static str;
    fn try_from(vec: Vec<f64>) -> Result<Self, Self::Error> {
        Self::try_from(vec.as_slice())
    }
}

/// Body-frame twist: linear velocity along the robot's x and y axes and angular rate.
///
/// This is both the commanded control and the quantity reported by odometry. The
/// linear part is expressed in the robot body frame and is rotated by the current
/// heading during [compose].
#[derive(Clone, Copy, Debug, Default)]
pub struct Twist2 {
    /// Body-frame forward velocity in m/s
    pub vx: f64,
    /// Body-frame lateral velocity in m/s
    pub vy: f64,
    /// Angular rate in rad/s, positive counter-clockwise
    pub omega: f64,
}
impl Twist2 {
    pub fn new(vx: f64, vy: f64, omega: f64) -> Twist2 {
        Twist2 { vx, vy, omega }
    }
}
impl Display for Twist2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Twist2 {{ vx: {:.4} m/s, vy: {:.4} m/s, omega: {:.4} rad/s }}",
            self.vx, self.vy, self.omega
        )
    }
}
impl From<Twist2> for Vector3<f64> {
    /// Converts a twist to a `Vector3<f64>` ordered `[vx, vy, omega]`.
    fn from(twist: Twist2) -> Self {
        Vector3::new(twist.vx, twist.vy, twist.omega)
    }
}
impl From<&Twist2> for Vector3<f64> {
    fn from(twist: &Twist2) -> Self {
        Vector3::new(twist.vx, twist.vy, twist.omega)
    }
}
impl From<Vector3<f64>> for Twist2 {
    /// Converts a `[vx, vy, omega]` vector to a twist.
    fn from(vector: Vector3<f64>) -> Self {
        Twist2::new(vector[0], vector[1], vector[2])
    }
}

/// Compose a body-frame twist onto a base pose by Euler integration over `dt` seconds.
///
/// The twist's linear part is rotated by the base heading into the world frame and
/// added to the base position scaled by `dt`; the angular rate is integrated onto the
/// heading and the result is wrapped to $(-\pi, \pi]$. This is the single integration
/// scheme shared by the deterministic motion model, the stochastic particle
/// propagation, and the world simulation, so all three stay consistent by
/// construction. Pure and deterministic.
///
/// # Arguments
/// * `base` - Pose the twist is applied to.
/// * `twist` - Body-frame twist.
/// * `dt` - Integration interval in seconds.
///
/// # Example
/// ```rust
/// use landnav::{Pose2, Twist2, compose};
/// use std::f64::consts::FRAC_PI_2;
/// // Facing +y, a unit forward velocity moves the robot along +y.
/// let pose = compose(&Pose2::new(0.0, 0.0, FRAC_PI_2), &Twist2::new(1.0, 0.0, 0.0), 1.0);
/// assert!(pose.x.abs() < 1e-12);
/// assert!((pose.y - 1.0).abs() < 1e-12);
/// ```
pub fn compose(base: &Pose2, twist: &Twist2, dt: f64) -> Pose2 {
    let (sin_heading, cos_heading) = base.heading.sin_cos();
    Pose2 {
        x: base.x + dt * (cos_heading * twist.vx - sin_heading * twist.vy),
        y: base.y + dt * (sin_heading * twist.vx + cos_heading * twist.vy),
        heading: wrap_to_pi(base.heading + dt * twist.omega),
    }
}

/// Deterministic motion model $f(x, u, \Delta t)$ used by the EKF prediction step.
///
/// Propagates the pose through the same Euler integration as [compose] with no noise
/// injection; process noise enters the EKF separately through the Jacobians in
/// [linearize]. The output heading is wrapped.
pub fn motion_model(state: &Pose2, control: &Twist2, dt: f64) -> Pose2 {
    compose(state, control, dt)
}

/// Wrap an angle in radians to the half-open range $(-\pi, \pi]$
///
/// This function is generic and can be used with any type that implements the
/// necessary traits. It is idempotent on its own output, and maps $-\pi$ (and every
/// odd multiple of $\pi$) to $+\pi$ so that the result is unique on the half-open
/// interval.
///
/// # Arguments
/// * `angle` - The angle to be wrapped, in radians.
/// # Returns
/// * The wrapped angle in $(-\pi, \pi]$.
/// # Example
/// ```rust
/// use landnav::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0; // radians
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// assert_eq!(wrap_to_pi(-PI), PI);
/// ```
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped > T::from(std::f64::consts::PI) {
        wrapped -= T::from(2.0 * std::f64::consts::PI);
    }
    while wrapped <= T::from(-std::f64::consts::PI) {
        wrapped += T::from(2.0 * std::f64::consts::PI);
    }
    wrapped
}

/// Wrap an angle in radians to the range $[0, 2\pi)$
///
/// This function is generic and can be used with any type that implements the
/// necessary traits.
///
/// # Arguments
/// * `angle` - The angle to be wrapped, in radians.
/// # Returns
/// * The wrapped angle in $[0, 2\pi)$.
/// # Example
/// ```rust
/// use landnav::wrap_to_2pi;
/// use std::f64::consts::PI;
/// let angle = 5.0 * PI; // radians
/// let wrapped_angle = wrap_to_2pi(angle);
/// assert_eq!(wrapped_angle, PI);
/// ```
pub fn wrap_to_2pi<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped >= T::from(2.0 * std::f64::consts::PI) {
        wrapped -= T::from(2.0 * std::f64::consts::PI);
    }
    while wrapped < T::from(0.0) {
        wrapped += T::from(2.0 * std::f64::consts::PI);
    }
    wrapped
}

// Note: nalgebra does not yet have a well developed testing framework for directly
// comparing nalgebra data structures. Rather than directly comparing, check the
// individual items.
#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_wrap_to_pi() {
        assert_eq!(wrap_to_pi(3.0 * PI), PI);
        assert_eq!(wrap_to_pi(-3.0 * PI), PI);
        assert_eq!(wrap_to_pi(0.0), 0.0);
        assert_eq!(wrap_to_pi(PI), PI);
        assert_eq!(wrap_to_pi(-PI), PI);
        assert_approx_eq!(wrap_to_pi(PI + 0.1), -PI + 0.1, 1e-12);
        assert_approx_eq!(wrap_to_pi(-PI - 0.1), PI - 0.1, 1e-12);
    }

    #[test]
    fn test_wrap_to_pi_range_and_idempotence() {
        let samples = [
            -10.0 * PI,
            -7.5,
            -PI,
            -1.0,
            0.0,
            0.5,
            PI,
            4.0,
            9.0 * PI,
            123.456,
        ];
        for &angle in &samples {
            let wrapped = wrap_to_pi(angle);
            assert!(wrapped > -PI && wrapped <= PI, "{} -> {}", angle, wrapped);
            assert_eq!(wrap_to_pi(wrapped), wrapped);
        }
    }

    #[test]
    fn test_wrap_to_2pi() {
        assert_eq!(wrap_to_2pi(5.0 * PI), PI);
        assert_eq!(wrap_to_2pi(-PI), PI);
        assert_eq!(wrap_to_2pi(0.0), 0.0);
        assert_eq!(wrap_to_2pi(2.0 * PI), 0.0);
    }

    #[test]
    fn test_pose_new_wraps_heading() {
        let pose = Pose2::new(1.0, 2.0, 3.0 * PI);
        assert_eq!(pose.heading, PI);
        let pose = Pose2::new(0.0, 0.0, -PI);
        assert_eq!(pose.heading, PI);
    }

    #[test]
    fn test_pose_vector_round_trip() {
        let pose = Pose2::new(1.5, -2.5, 0.75);
        let vector: Vector3<f64> = pose.into();
        assert_eq!(vector, Vector3::new(1.5, -2.5, 0.75));
        let back = Pose2::from(vector);
        assert_eq!(back.x, pose.x);
        assert_eq!(back.y, pose.y);
        assert_eq!(back.heading, pose.heading);
    }

    #[test]
    fn test_pose_try_from_slice() {
        let pose = Pose2::try_from(vec![1.0, 2.0, 0.5]).unwrap();
        assert_eq!(pose.x, 1.0);
        assert_eq!(pose.y, 2.0);
        assert_eq!(pose.heading, 0.5);
        assert!(Pose2::try_from(vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_compose_zero_twist_is_identity() {
        let pose = Pose2::new(3.0, -4.0, 1.2);
        for dt in [0.0, 0.1, 1.0, 100.0] {
            let out = compose(&pose, &Twist2::default(), dt);
            assert_eq!(out.x, pose.x);
            assert_eq!(out.y, pose.y);
            assert_eq!(out.heading, pose.heading);
        }
    }

    #[test]
    fn test_compose_rotates_body_frame_velocity() {
        // Facing +x: forward motion increases x, lateral motion increases y.
        let out = compose(&Pose2::new(0.0, 0.0, 0.0), &Twist2::new(1.0, 2.0, 0.0), 1.0);
        assert_approx_eq!(out.x, 1.0, 1e-12);
        assert_approx_eq!(out.y, 2.0, 1e-12);
        // Facing +y: forward motion increases y, lateral motion decreases x.
        let out = compose(
            &Pose2::new(0.0, 0.0, PI / 2.0),
            &Twist2::new(1.0, 2.0, 0.0),
            1.0,
        );
        assert_approx_eq!(out.x, -2.0, 1e-12);
        assert_approx_eq!(out.y, 1.0, 1e-12);
    }

    #[test]
    fn test_compose_integrates_and_wraps_heading() {
        let out = compose(&Pose2::new(0.0, 0.0, 0.9 * PI), &Twist2::new(0.0, 0.0, 0.3 * PI), 1.0);
        assert_approx_eq!(out.heading, -0.8 * PI, 1e-12);
    }

    #[test]
    fn test_motion_model_matches_compose() {
        let pose = Pose2::new(1.0, -40.0, -PI / 2.0);
        let control = Twist2::new(0.0, 0.025, 0.001);
        let a = motion_model(&pose, &control, 1.0);
        let b = compose(&pose, &control, 1.0);
        assert_eq!(a.x, b.x);
        assert_eq!(a.y, b.y);
        assert_eq!(a.heading, b.heading);
    }

    #[test]
    fn test_display_formats() {
        let pose = Pose2::new(1.0, 2.0, PI / 2.0);
        assert!(format!("{}", pose).contains("heading: 90.00 deg"));
        let twist = Twist2::new(0.0, 0.025, 0.0);
        assert!(format!("{}", twist).contains("vy: 0.0250"));
    }
}
