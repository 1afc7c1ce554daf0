//! Jacobian and linearization utilities for the EKF localization filter
//!
//! This module provides analytic Jacobians for the planar odometry motion model and
//! the range-bearing observation model. These linearizations are what turn the
//! nonlinear models in [crate] and [crate::measurements] into the matrices consumed
//! by the Extended Kalman Filter in [crate::kalman].
//!
//! # State Ordering
//!
//! The 3-state pose vector follows the ordering:
//! ```text
//! x = [x, y, heading]
//! ```
//! where:
//! - `x`, `y`: world-frame position in meters
//! - `heading`: heading in radians, wrapped to (-pi, pi]
//!
//! Controls are ordered `[vx, vy, omega]` (body frame) and observations
//! `[range, bearing]`.
//!
//! # Usage Example
//!
//! ```rust
//! use landnav::linearize::{
//!     process_noise_jacobian, range_bearing_jacobian, state_transition_jacobian,
//! };
//! use landnav::{Pose2, Twist2};
//! use nalgebra::Vector2;
//!
//! let pose = Pose2::new(1.0, -40.0, -1.5);
//! let control = Twist2::new(0.0, 0.025, 0.001);
//! let dt = 1.0;
//!
//! let f_matrix = state_transition_jacobian(&pose, &control, dt);
//! let g_matrix = process_noise_jacobian(&pose, dt);
//! let h_matrix = range_bearing_jacobian(&pose, &Vector2::new(10.0, 0.0)).unwrap();
//!
//! // Use in EKF: P(-) = F*P*F^T + G*Q*G^T
//! // Use in measurement update: K = P(-)*H^T*(H*P(-)*H^T + R)^-1
//! ```
//!
//! # References
//!
//! Jacobian derivations follow Thrun, Burgard, and Fox, "Probabilistic Robotics":
//! - Motion linearization (F, G): Chapter 7.4, adapted to a body-frame twist input
//! - Range-bearing measurement (H): Chapter 7.4, Table 7.2

use crate::{EstimationError, Pose2, Twist2};
use nalgebra::{Matrix2x3, Matrix3, Vector2};

/// Range below which the observation geometry is treated as degenerate.
const ZERO_RANGE_TOLERANCE: f64 = 1e-9;

/// Compute the state transition Jacobian (F) for the planar motion model
///
/// This function computes the linearized state transition matrix F for the pose
/// propagation in [crate::motion_model]. The Jacobian describes how small
/// perturbations in the current pose propagate forward in time; it is evaluated at
/// the pose the filter holds before prediction.
///
/// # Mathematical Background
///
/// The motion model rotates the body-frame velocity into the world frame before
/// integrating, so only the heading column carries linearization terms:
///
/// ```text
/// F = | 1  0  (-vx sin(h) - vy cos(h)) dt |
///     | 0  1  ( vx cos(h) - vy sin(h)) dt |
///     | 0  0                1             |
/// ```
///
/// # Arguments
///
/// * `state` - Pose the linearization is evaluated at.
/// * `control` - Body-frame twist applied over the step.
/// * `dt` - Time step in seconds.
///
/// # Returns
///
/// 3×3 state transition Jacobian matrix F
///
/// # Example
///
/// ```rust
/// use landnav::Twist2;
/// use landnav::Pose2;
/// use landnav::linearize::state_transition_jacobian;
///
/// let f = state_transition_jacobian(
///     &Pose2::new(0.0, 0.0, 0.0),
///     &Twist2::new(1.0, 0.0, 0.0),
///     0.1,
/// );
/// assert_eq!(f[(0, 0)], 1.0);
/// assert_eq!(f[(0, 2)], 0.0);
/// assert_eq!(f[(1, 2)], 0.1);
/// ```
pub fn state_transition_jacobian(state: &Pose2, control: &Twist2, dt: f64) -> Matrix3<f64> {
    let (sin_heading, cos_heading) = state.heading.sin_cos();
    let mut f = Matrix3::identity();
    f[(0, 2)] = (-control.vx * sin_heading - control.vy * cos_heading) * dt;
    f[(1, 2)] = (control.vx * cos_heading - control.vy * sin_heading) * dt;
    f
}

/// Compute the process noise Jacobian (G) for the planar motion model
///
/// This function computes the matrix G that maps white noise on the body-frame twist
/// into pose perturbations. The linear components pass through the world-frame
/// rotation at the current heading and the angular component integrates directly.
///
/// # Mathematical Background
///
/// With the process noise entering additively on the control, G = ∂f/∂u:
///
/// ```text
/// G = | dt cos(h)  -dt sin(h)  0  |
///     | dt sin(h)   dt cos(h)  0  |
///     |     0          0       dt |
/// ```
///
/// The discrete process noise contribution is G * Q * Gᵀ.
///
/// # Arguments
///
/// * `state` - Pose the linearization is evaluated at.
/// * `dt` - Time step in seconds.
///
/// # Returns
///
/// 3×3 process noise Jacobian matrix G
pub fn process_noise_jacobian(state: &Pose2, dt: f64) -> Matrix3<f64> {
    let (sin_heading, cos_heading) = state.heading.sin_cos();
    Matrix3::new(
        dt * cos_heading,
        -dt * sin_heading,
        0.0,
        dt * sin_heading,
        dt * cos_heading,
        0.0,
        0.0,
        0.0,
        dt,
    )
}

/// Compute the measurement Jacobian (H) for a range-bearing observation
///
/// This function computes the linearization of the observation model in
/// [crate::measurements::expected_observation] about the supplied pose. The range
/// row is the negated unit vector toward the landmark; the bearing row is the
/// perpendicular direction scaled by the inverse squared range, with a -1 on the
/// heading component because the bearing is measured in the body frame.
///
/// # Mathematical Background
///
/// With dx, dy the offsets from robot to landmark and q their Euclidean norm:
///
/// ```text
/// H = | -dx/q    -dy/q     0 |
///     |  dy/q²   -dx/q²   -1 |
/// ```
///
/// # Arguments
///
/// * `pose` - Pose the linearization is evaluated at.
/// * `landmark` - World-frame position of the observed landmark.
///
/// # Returns
///
/// * 2×3 measurement Jacobian matrix H, or
///   [EstimationError::DegenerateObservation] when the range is zero and the
///   linearization is undefined.
///
/// # Example
///
/// ```rust
/// use landnav::Pose2;
/// use landnav::linearize::range_bearing_jacobian;
/// use nalgebra::Vector2;
///
/// let h = range_bearing_jacobian(&Pose2::new(0.0, 0.0, 0.0), &Vector2::new(10.0, 0.0)).unwrap();
/// assert_eq!(h[(0, 0)], -1.0);
/// assert_eq!(h[(1, 1)], -0.1);
/// assert_eq!(h[(1, 2)], -1.0);
/// ```
pub fn range_bearing_jacobian(
    pose: &Pose2,
    landmark: &Vector2<f64>,
) -> Result<Matrix2x3<f64>, EstimationError> {
    let dx = landmark[0] - pose.x;
    let dy = landmark[1] - pose.y;
    let q = (dx * dx + dy * dy).sqrt();
    if q < ZERO_RANGE_TOLERANCE {
        return Err(EstimationError::DegenerateObservation);
    }
    let q2 = q * q;
    Ok(Matrix2x3::new(
        -dx / q,
        -dy / q,
        0.0,
        dy / q2,
        -dx / q2,
        -1.0,
    ))
}
