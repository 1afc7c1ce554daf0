//! Landmark map and range-bearing observation types
//!
//! This module defines the known landmark map the filters localize against and the
//! range and bearing observation produced by the simulated sensor. The observation
//! model $h(x, m_i)$ that predicts a measurement from a pose lives here as
//! [expected_observation]; its Jacobian is in [crate::linearize].

use std::fmt::{self, Display};

use nalgebra::Vector2;

use crate::rng::RandomStream;
use crate::{EstimationError, Pose2, wrap_to_pi};

/// Known map of point landmarks in the world frame.
///
/// Landmarks are identified by their index into the map; observations carry that
/// index, so data association is exact by construction.
#[derive(Clone, Debug, Default)]
pub struct LandmarkMap {
    positions: Vec<Vector2<f64>>,
}
impl LandmarkMap {
    pub fn new(positions: Vec<Vector2<f64>>) -> LandmarkMap {
        LandmarkMap { positions }
    }

    /// Scatter `count` landmarks uniformly over the square
    /// `[-half_extent, half_extent]` in both axes.
    ///
    /// Draws two uniform samples per landmark (x first, then y) from the supplied
    /// stream, so a map is fully determined by the stream it is built from.
    pub fn scatter_uniform(
        count: usize,
        half_extent: f64,
        stream: &mut RandomStream,
    ) -> LandmarkMap {
        let positions = (0..count)
            .map(|_| {
                let x = (stream.uniform() - 0.5) * 2.0 * half_extent;
                let y = (stream.uniform() - 0.5) * 2.0 * half_extent;
                Vector2::new(x, y)
            })
            .collect();
        LandmarkMap { positions }
    }

    /// Number of landmarks in the map.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Look up a landmark position by index.
    pub fn get(&self, id: usize) -> Result<&Vector2<f64>, EstimationError> {
        self.positions.get(id).ok_or(EstimationError::UnknownLandmark {
            id,
            landmarks: self.positions.len(),
        })
    }

    /// Iterate over the landmark positions in index order.
    pub fn positions(&self) -> impl Iterator<Item = &Vector2<f64>> {
        self.positions.iter()
    }
}
impl Display for LandmarkMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LandmarkMap({} landmarks)", self.positions.len())
    }
}

/// Range and bearing observation of a single identified landmark.
///
/// The bearing is expressed in the robot body frame (zero straight ahead, positive
/// counter-clockwise) and is kept wrapped to $(-\pi, \pi]$ wherever one of these is
/// constructed.
#[derive(Clone, Copy, Debug)]
pub struct RangeBearingMeasurement {
    /// Distance to the landmark in meters
    pub range: f64,
    /// Body-frame bearing to the landmark in radians, in (-pi, pi]
    pub bearing: f64,
    /// Index of the observed landmark in the map
    pub landmark_id: usize,
}
impl RangeBearingMeasurement {
    pub fn new(range: f64, bearing: f64, landmark_id: usize) -> RangeBearingMeasurement {
        RangeBearingMeasurement {
            range,
            bearing: wrap_to_pi(bearing),
            landmark_id,
        }
    }

    /// Innovation of this observation against a predicted one, ordered
    /// `[range, bearing]` with the bearing difference wrapped to $(-\pi, \pi]$.
    ///
    /// Wrapping the difference (rather than comparing raw angles) keeps an
    /// observation at `+3.1` rad consistent with a prediction at `-3.1` rad.
    pub fn innovation(&self, predicted: &RangeBearingMeasurement) -> Vector2<f64> {
        Vector2::new(
            self.range - predicted.range,
            wrap_to_pi(self.bearing - predicted.bearing),
        )
    }
}
impl Display for RangeBearingMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RangeBearingMeasurement(range: {:.3} m, bearing: {:.2} deg, landmark: {})",
            self.range,
            self.bearing.to_degrees(),
            self.landmark_id
        )
    }
}

/// Observation model $h(x, m_i)$: the noise-free range and bearing from a pose to a
/// mapped landmark.
///
/// The bearing subtracts the robot heading from the world-frame angle to the landmark
/// and wraps the result. A zero-range geometry is well defined here (the bearing
/// degenerates to an arbitrary but finite angle); only the linearization in
/// [crate::linearize] rejects it.
///
/// # Arguments
/// * `pose` - Pose the observation is predicted from.
/// * `map` - Known landmark map.
/// * `landmark_id` - Index of the landmark being observed.
///
/// # Returns
/// * The predicted observation, or [EstimationError::UnknownLandmark] when the index
///   is outside the map.
pub fn expected_observation(
    pose: &Pose2,
    map: &LandmarkMap,
    landmark_id: usize,
) -> Result<RangeBearingMeasurement, EstimationError> {
    Ok(observe_landmark(pose, map.get(landmark_id)?, landmark_id))
}

/// Noise-free observation of an already resolved landmark position.
///
/// Infallible variant of [expected_observation] for callers that have looked the
/// landmark up once and evaluate the model for many poses, as the particle filter
/// does across its cloud.
pub fn observe_landmark(
    pose: &Pose2,
    landmark: &Vector2<f64>,
    landmark_id: usize,
) -> RangeBearingMeasurement {
    let dx = landmark[0] - pose.x;
    let dy = landmark[1] - pose.y;
    RangeBearingMeasurement::new(
        (dx * dx + dy * dy).sqrt(),
        dy.atan2(dx) - pose.heading,
        landmark_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::StreamPurpose;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    fn single_landmark_map(x: f64, y: f64) -> LandmarkMap {
        LandmarkMap::new(vec![Vector2::new(x, y)])
    }

    #[test]
    fn test_expected_observation_straight_ahead() {
        let map = single_landmark_map(10.0, 0.0);
        let z = expected_observation(&Pose2::new(0.0, 0.0, 0.0), &map, 0).unwrap();
        assert_approx_eq!(z.range, 10.0, 1e-12);
        assert_approx_eq!(z.bearing, 0.0, 1e-12);
        assert_eq!(z.landmark_id, 0);
    }

    #[test]
    fn test_expected_observation_heading_compensation() {
        // Facing +y with the landmark on the +y axis: bearing is zero.
        let map = single_landmark_map(0.0, 5.0);
        let z = expected_observation(&Pose2::new(0.0, 0.0, PI / 2.0), &map, 0).unwrap();
        assert_approx_eq!(z.range, 5.0, 1e-12);
        assert_approx_eq!(z.bearing, 0.0, 1e-12);
    }

    #[test]
    fn test_expected_observation_wraps_bearing() {
        // World-frame angle to the landmark is -2.5 rad and the robot faces +2.5 rad;
        // the raw difference of -5 rad must come back wrapped.
        let map = single_landmark_map(10.0 * (-2.5f64).cos(), 10.0 * (-2.5f64).sin());
        let z = expected_observation(&Pose2::new(0.0, 0.0, 2.5), &map, 0).unwrap();
        assert_approx_eq!(z.range, 10.0, 1e-9);
        assert_approx_eq!(z.bearing, -5.0 + 2.0 * PI, 1e-12);
    }

    #[test]
    fn test_expected_observation_unknown_landmark() {
        let map = single_landmark_map(10.0, 0.0);
        match expected_observation(&Pose2::default(), &map, 1) {
            Err(EstimationError::UnknownLandmark { id, landmarks }) => {
                assert_eq!(id, 1);
                assert_eq!(landmarks, 1);
            }
            other => panic!("expected UnknownLandmark, got {:?}", other),
        }
    }

    #[test]
    fn test_innovation_wraps_bearing_difference() {
        let observed = RangeBearingMeasurement::new(10.0, 3.0, 0);
        let predicted = RangeBearingMeasurement::new(9.0, -3.0, 0);
        let innovation = observed.innovation(&predicted);
        assert_approx_eq!(innovation[0], 1.0, 1e-12);
        assert_approx_eq!(innovation[1], 6.0 - 2.0 * PI, 1e-12);
    }

    #[test]
    fn test_measurement_new_wraps_bearing() {
        let z = RangeBearingMeasurement::new(1.0, 3.0 * PI, 0);
        assert_approx_eq!(z.bearing, PI, 1e-12);
    }

    #[test]
    fn test_scatter_uniform_bounds_and_determinism() {
        let mut stream = RandomStream::derive(123456, 0, StreamPurpose::MapLayout);
        let map = LandmarkMap::scatter_uniform(30, 70.0, &mut stream);
        assert_eq!(map.len(), 30);
        for position in map.positions() {
            assert!(position[0].abs() <= 70.0);
            assert!(position[1].abs() <= 70.0);
        }
        let mut stream = RandomStream::derive(123456, 0, StreamPurpose::MapLayout);
        let again = LandmarkMap::scatter_uniform(30, 70.0, &mut stream);
        for (a, b) in map.positions().zip(again.positions()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_map_get_and_display() {
        let map = single_landmark_map(1.0, 2.0);
        assert_eq!(map.get(0).unwrap(), &Vector2::new(1.0, 2.0));
        assert!(map.get(5).is_err());
        assert!(!map.is_empty());
        assert_eq!(format!("{}", map), "LandmarkMap(1 landmarks)");
    }
}
