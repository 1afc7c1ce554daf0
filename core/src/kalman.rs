//! Extended Kalman Filter for landmark-based localization
//!
//! This module contains the Kalman-family estimator for the planar localization
//! problem. The filter builds on the pose propagation functions provided in the
//! top-level [crate] module, the analytic Jacobians in [crate::linearize], and the
//! observation model in [crate::measurements].

use crate::linalg::{
    check_positive_semidefinite, check_positive_semidefinite_2x2, invert_covariance_2x2,
    symmetrize,
};
use crate::linearize::{process_noise_jacobian, range_bearing_jacobian, state_transition_jacobian};
use crate::measurements::{LandmarkMap, RangeBearingMeasurement, expected_observation};
use crate::{EstimationError, Estimator, Pose2, Twist2, motion_model};

use std::fmt::{self, Debug, Display};

use nalgebra::{Matrix2, Matrix3};

/// Extended Kalman Filter (EKF) for localization against a known landmark map
///
/// The Extended Kalman Filter maintains a Gaussian belief over the robot pose,
/// linearizing the nonlinear motion and observation models with first-order Taylor
/// approximations (Jacobians). It is the cheap, smooth-belief counterpart to the
/// sampling-based [crate::particle::ParticleFilter]; both implement [Estimator] and
/// are driven identically.
///
/// # Mathematical Background
///
/// The EKF operates in two stages.
///
/// ## Predict Step
///
/// The predict step propagates the pose estimate through the nonlinear motion model
/// and the covariance through its linearization, with both Jacobians evaluated at the
/// pose held before prediction:
///
/// $$
/// \begin{aligned}
/// \bar{x}_{k+1} &= f(x_k, u_k, \Delta t) \\\\
/// \bar{P}_{k+1} &= F_k P_k F_k^T + G_k Q G_k^T
/// \end{aligned}
/// $$
///
/// where $F_k$ is the state transition Jacobian, $G_k$ the process noise Jacobian,
/// and $Q$ the process noise covariance on the body-frame twist.
///
/// ## Update Step
///
/// The update step corrects the predicted estimate with a range-bearing observation:
///
/// $$
/// \begin{aligned}
/// S_k &= H_k \bar{P}_k H_k^T + R \\\\
/// K_k &= \bar{P}_k H_k^T S_k^{-1} \\\\
/// x_k &= \bar{x}_k + K_k (z_k - h(\bar{x}_k)) \\\\
/// P_k &= (I - K_k H_k) \bar{P}_k
/// \end{aligned}
/// $$
///
/// The bearing component of the innovation and the heading component of the corrected
/// pose are both wrapped to $(-\pi, \pi]$. After the covariance update the filter
/// symmetrizes $P_k$ and verifies it is positive semi-definite.
///
/// Every fallible step of the update (landmark lookup, zero-range linearization,
/// innovation covariance inversion, definiteness verification) runs before anything
/// is committed, so a failed update leaves the filter exactly at its predicted
/// belief and the caller can continue stepping.
///
/// # References
///
/// - Thrun, Burgard, and Fox, "Probabilistic Robotics", Chapter 7.4
/// - Bar-Shalom, Y., et al. "Estimation with Applications to Tracking and
///   Navigation", Chapter 10
///
/// # Example
///
/// ```rust
/// use landnav::kalman::ExtendedKalmanFilter;
/// use landnav::measurements::{LandmarkMap, RangeBearingMeasurement};
/// use landnav::{Estimator, Pose2, Twist2};
/// use nalgebra::{Matrix2, Matrix3, Vector2};
///
/// let map = LandmarkMap::new(vec![Vector2::new(10.0, 0.0)]);
/// let mut ekf = ExtendedKalmanFilter::new(
///     Pose2::new(0.0, 0.0, 0.0),
///     Matrix3::identity(),
///     Matrix3::identity() * 1e-4, // process noise Q
///     Matrix2::identity() * 1e-2, // measurement noise R
///     map,
/// )
/// .unwrap();
///
/// ekf.predict(&Twist2::new(0.0, 0.025, 0.0), 1.0);
/// ekf.update(&RangeBearingMeasurement::new(10.0, 0.0, 0)).unwrap();
/// let estimate = ekf.get_estimate();
/// assert!(estimate.x.abs() < 1.0);
/// ```
#[derive(Clone)]
pub struct ExtendedKalmanFilter {
    /// Pose estimate
    pose: Pose2,
    /// Pose covariance matrix (3x3)
    covariance: Matrix3<f64>,
    /// Process noise covariance on the body-frame twist
    process_noise: Matrix3<f64>,
    /// Measurement noise covariance on [range, bearing]
    measurement_noise: Matrix2<f64>,
    /// Known landmark map observations are matched against
    map: LandmarkMap,
}

impl Debug for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EKF")
            .field("pose", &self.pose)
            .field("covariance", &self.covariance)
            .field("process_noise", &self.process_noise)
            .field("measurement_noise", &self.measurement_noise)
            .field("map", &self.map)
            .finish()
    }
}

impl Display for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtendedKalmanFilter {{ estimate: {}, map: {} }}",
            self.pose, self.map
        )
    }
}

impl ExtendedKalmanFilter {
    /// Create a new Extended Kalman Filter
    ///
    /// # Arguments
    ///
    /// * `initial_pose` - Initial pose estimate.
    /// * `initial_covariance` - Initial pose uncertainty (3x3, positive semi-definite).
    /// * `process_noise` - Process noise covariance Q on the body-frame twist.
    /// * `measurement_noise` - Measurement noise covariance R on [range, bearing].
    /// * `map` - Known landmark map; must contain at least one landmark.
    ///
    /// # Returns
    ///
    /// The filter, or [EstimationError::InvalidConfiguration] when a covariance is
    /// not positive semi-definite or the map is empty. A filter is never constructed
    /// from a rejected configuration.
    pub fn new(
        initial_pose: Pose2,
        initial_covariance: Matrix3<f64>,
        process_noise: Matrix3<f64>,
        measurement_noise: Matrix2<f64>,
        map: LandmarkMap,
    ) -> Result<ExtendedKalmanFilter, EstimationError> {
        if map.is_empty() {
            return Err(EstimationError::InvalidConfiguration(
                "landmark map is empty".to_string(),
            ));
        }
        check_positive_semidefinite(&initial_covariance).map_err(|e| {
            EstimationError::InvalidConfiguration(format!("initial covariance: {e}"))
        })?;
        check_positive_semidefinite(&process_noise)
            .map_err(|e| EstimationError::InvalidConfiguration(format!("process noise: {e}")))?;
        check_positive_semidefinite_2x2(&measurement_noise).map_err(|e| {
            EstimationError::InvalidConfiguration(format!("measurement noise: {e}"))
        })?;
        Ok(ExtendedKalmanFilter {
            pose: initial_pose,
            covariance: symmetrize(&initial_covariance),
            process_noise,
            measurement_noise,
            map,
        })
    }
}

impl Estimator for ExtendedKalmanFilter {
    /// Predict step: propagate pose and covariance through the motion model.
    ///
    /// Both Jacobians are evaluated at the pose held before prediction, then the
    /// pose is advanced through [motion_model] and the covariance through
    /// $F P F^T + G Q G^T$.
    fn predict(&mut self, control: &Twist2, dt: f64) {
        let f = state_transition_jacobian(&self.pose, control, dt);
        let g = process_noise_jacobian(&self.pose, dt);
        self.pose = motion_model(&self.pose, control, dt);
        self.covariance = symmetrize(
            &(f * self.covariance * f.transpose() + g * self.process_noise * g.transpose()),
        );
    }

    /// Update step: correct the predicted belief with a range-bearing observation.
    ///
    /// On any error the filter is left at its predicted belief; nothing is
    /// committed until the whole update has been computed and verified.
    fn update(&mut self, observation: &RangeBearingMeasurement) -> Result<(), EstimationError> {
        let landmark = *self.map.get(observation.landmark_id)?;
        let predicted = expected_observation(&self.pose, &self.map, observation.landmark_id)?;
        let h = range_bearing_jacobian(&self.pose, &landmark)?;

        let innovation = observation.innovation(&predicted);
        let s = self.measurement_noise + h * self.covariance * h.transpose();
        let s_inverse = invert_covariance_2x2(&s)?;
        let gain = self.covariance * h.transpose() * s_inverse;

        let correction = gain * innovation;
        let updated_pose = Pose2::new(
            self.pose.x + correction[0],
            self.pose.y + correction[1],
            self.pose.heading + correction[2],
        );
        let updated_covariance = symmetrize(&((Matrix3::identity() - gain * h) * self.covariance));
        check_positive_semidefinite(&updated_covariance)?;

        self.pose = updated_pose;
        self.covariance = updated_covariance;
        Ok(())
    }

    fn get_estimate(&self) -> Pose2 {
        self.pose
    }

    fn get_certainty(&self) -> Matrix3<f64> {
        self.covariance
    }
}
