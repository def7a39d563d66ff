use nalgebra as na;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum TrajectoryError {
    #[error("trajectory needs at least 2 waypoints but got {0}")]
    TooFewWaypoints(usize),
    #[error("waypoint matrices don't match, expected {expected} columns but got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("waypoint times must be finite and strictly increasing")]
    NonIncreasingTimes,
    #[error("position of joint {0} has to be set on the first and last waypoint")]
    FreeBoundaryPosition(usize),
}

type Result<T> = std::result::Result<T, TrajectoryError>;

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryState {
    pub position: na::DVector<f64>,
    pub velocity: na::DVector<f64>,
    pub acceleration: na::DVector<f64>,
}

/// Joint space trajectory.
///
/// Time is measured from the first waypoint.
pub trait Trajectory: Send {
    fn duration(&self) -> f64;

    /// State at `time`, clamped to `[0, duration]`
    fn state(&self, time: f64) -> TrajectoryState;
}

/// Builds trajectories from waypoint matrices.
///
/// Matrices are joints x waypoints. `NaN` entries are free and chosen by the factory.
pub trait TrajectoryFactory: Send {
    fn create(
        &self,
        times: &na::DVector<f64>,
        positions: &na::DMatrix<f64>,
        velocities: &na::DMatrix<f64>,
        accelerations: &na::DMatrix<f64>,
    ) -> Result<Box<dyn Trajectory>>;
}

/// Creates [`HermiteTrajectory`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HermiteTrajectoryFactory;

impl TrajectoryFactory for HermiteTrajectoryFactory {
    fn create(
        &self,
        times: &na::DVector<f64>,
        positions: &na::DMatrix<f64>,
        velocities: &na::DMatrix<f64>,
        accelerations: &na::DMatrix<f64>,
    ) -> Result<Box<dyn Trajectory>> {
        let trajectory = HermiteTrajectory::new(times, positions, velocities, accelerations)?;
        Ok(Box::new(trajectory))
    }
}

/// Piecewise quintic polynomial through every waypoint.
///
/// Each segment matches position, velocity and acceleration on both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct HermiteTrajectory {
    times: Vec<f64>,
    /// `segments[segment][joint]` are the polynomial coefficients, lowest order first
    segments: Vec<Vec<[f64; 6]>>,
    joints: usize,
}

impl HermiteTrajectory {
    pub fn new(
        times: &na::DVector<f64>,
        positions: &na::DMatrix<f64>,
        velocities: &na::DMatrix<f64>,
        accelerations: &na::DMatrix<f64>,
    ) -> Result<HermiteTrajectory> {
        let count = times.len();
        if count < 2 {
            return Err(TrajectoryError::TooFewWaypoints(count));
        }
        let joints = positions.nrows();
        for matrix in [positions, velocities, accelerations] {
            if matrix.ncols() != count {
                return Err(TrajectoryError::DimensionMismatch {
                    expected: count,
                    actual: matrix.ncols(),
                });
            }
            if matrix.nrows() != joints {
                return Err(TrajectoryError::DimensionMismatch {
                    expected: joints,
                    actual: matrix.nrows(),
                });
            }
        }
        if times.iter().any(|time| !time.is_finite())
            || times.as_slice().windows(2).any(|pair| pair[1] <= pair[0])
        {
            return Err(TrajectoryError::NonIncreasingTimes);
        }
        let times = times.as_slice();

        let mut resolved_positions = positions.clone();
        let mut resolved_velocities = velocities.clone();
        let mut resolved_accelerations = accelerations.clone();
        for joint in 0..joints {
            if !positions[(joint, 0)].is_finite() || !positions[(joint, count - 1)].is_finite() {
                return Err(TrajectoryError::FreeBoundaryPosition(joint));
            }
            let mut row = row_values(positions, joint);
            interpolate_free(times, &mut row);
            resolved_positions.row_mut(joint).copy_from_slice(&row);

            let mut row = row_values(velocities, joint);
            differentiate_free(times, &row_values(&resolved_positions, joint), &mut row);
            resolved_velocities.row_mut(joint).copy_from_slice(&row);

            let mut row = row_values(accelerations, joint);
            differentiate_free(times, &row_values(&resolved_velocities, joint), &mut row);
            resolved_accelerations.row_mut(joint).copy_from_slice(&row);
        }

        let segments = (0..count - 1)
            .map(|segment| {
                let span = times[segment + 1] - times[segment];
                (0..joints)
                    .map(|joint| {
                        quintic_coefficients(
                            span,
                            [
                                resolved_positions[(joint, segment)],
                                resolved_velocities[(joint, segment)],
                                resolved_accelerations[(joint, segment)],
                            ],
                            [
                                resolved_positions[(joint, segment + 1)],
                                resolved_velocities[(joint, segment + 1)],
                                resolved_accelerations[(joint, segment + 1)],
                            ],
                        )
                    })
                    .collect()
            })
            .collect();

        Ok(HermiteTrajectory {
            times: times.to_vec(),
            segments,
            joints,
        })
    }

    pub fn waypoint_times(&self) -> &[f64] {
        &self.times
    }
}

impl Trajectory for HermiteTrajectory {
    fn duration(&self) -> f64 {
        self.times[self.times.len() - 1] - self.times[0]
    }

    fn state(&self, time: f64) -> TrajectoryState {
        let time = self.times[0] + time.max(0.0).min(self.duration());
        let after = self.times.partition_point(|&waypoint| waypoint <= time);
        let segment = after.saturating_sub(1).min(self.segments.len() - 1);
        let tau = time - self.times[segment];
        let mut state = TrajectoryState {
            position: na::DVector::zeros(self.joints),
            velocity: na::DVector::zeros(self.joints),
            acceleration: na::DVector::zeros(self.joints),
        };
        for (joint, c) in self.segments[segment].iter().enumerate() {
            state.position[joint] = c[0]
                + tau * (c[1] + tau * (c[2] + tau * (c[3] + tau * (c[4] + tau * c[5]))));
            state.velocity[joint] = c[1]
                + tau * (2.0 * c[2] + tau * (3.0 * c[3] + tau * (4.0 * c[4] + tau * 5.0 * c[5])));
            state.acceleration[joint] =
                2.0 * c[2] + tau * (6.0 * c[3] + tau * (12.0 * c[4] + tau * 20.0 * c[5]));
        }
        state
    }
}

fn row_values(matrix: &na::DMatrix<f64>, row: usize) -> Vec<f64> {
    matrix.row(row).iter().copied().collect()
}

/// Coefficients of the quintic matching `start` and `end` (position, velocity, acceleration)
fn quintic_coefficients(span: f64, start: [f64; 3], end: [f64; 3]) -> [f64; 6] {
    let [p0, v0, a0] = start;
    let [p1, v1, a1] = end;
    let delta = p1 - p0;
    let t2 = span * span;
    let t3 = t2 * span;
    [
        p0,
        v0,
        a0 / 2.0,
        (20.0 * delta - (8.0 * v1 + 12.0 * v0) * span - (3.0 * a0 - a1) * t2) / (2.0 * t3),
        (-30.0 * delta + (14.0 * v1 + 16.0 * v0) * span + (3.0 * a0 - 2.0 * a1) * t2)
            / (2.0 * t3 * span),
        (12.0 * delta - 6.0 * (v1 + v0) * span + (a1 - a0) * t2) / (2.0 * t3 * t2),
    ]
}

/// Linear interpolation in time between the closest set neighbours.
///
/// First and last values have to be finite.
fn interpolate_free(times: &[f64], values: &mut [f64]) {
    let mut previous = 0;
    for index in 1..values.len() {
        if values[index].is_nan() {
            continue;
        }
        for free in previous + 1..index {
            let ratio = (times[free] - times[previous]) / (times[index] - times[previous]);
            values[free] = values[previous] + ratio * (values[index] - values[previous]);
        }
        previous = index;
    }
}

/// Fills free derivatives with a central difference of `integral`.
///
/// Free boundary values become 0.
fn differentiate_free(times: &[f64], integral: &[f64], values: &mut [f64]) {
    let last = values.len() - 1;
    for index in 0..values.len() {
        if !values[index].is_nan() {
            continue;
        }
        values[index] = if index == 0 || index == last {
            debug!("Free derivative on trajectory boundary set to 0");
            0.0
        } else {
            (integral[index + 1] - integral[index - 1]) / (times[index + 1] - times[index - 1])
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_joint(
        times: &[f64],
        positions: &[f64],
        velocities: &[f64],
        accelerations: &[f64],
    ) -> Result<HermiteTrajectory> {
        HermiteTrajectory::new(
            &na::DVector::from_column_slice(times),
            &na::DMatrix::from_row_slice(1, positions.len(), positions),
            &na::DMatrix::from_row_slice(1, velocities.len(), velocities),
            &na::DMatrix::from_row_slice(1, accelerations.len(), accelerations),
        )
    }

    #[test]
    fn rest_to_rest_segment() {
        let trajectory = single_joint(&[0.0, 1.0], &[0.0, 1.0], &[0.0, 0.0], &[0.0, 0.0]).unwrap();
        assert_relative_eq!(trajectory.duration(), 1.0);
        let middle = trajectory.state(0.5);
        assert_relative_eq!(middle.position[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(middle.velocity[0], 1.875, epsilon = 1e-12);
        assert_relative_eq!(middle.acceleration[0], 0.0, epsilon = 1e-12);
        let end = trajectory.state(1.0);
        assert_relative_eq!(end.position[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(end.velocity[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn passes_through_every_waypoint() {
        let trajectory = single_joint(
            &[0.0, 1.0, 3.0],
            &[0.0, 2.0, -1.0],
            &[0.5, 1.0, 0.0],
            &[0.0, 0.0, 0.0],
        )
        .unwrap();
        let state = trajectory.state(1.0);
        assert_relative_eq!(state.position[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(state.velocity[0], 1.0, epsilon = 1e-12);
        let start = trajectory.state(0.0);
        assert_relative_eq!(start.velocity[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn time_is_clamped() {
        let trajectory = single_joint(&[0.0, 2.0], &[1.0, 3.0], &[0.0, 0.0], &[0.0, 0.0]).unwrap();
        assert_relative_eq!(trajectory.state(-1.0).position[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(trajectory.state(10.0).position[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn free_interior_values_are_resolved() {
        let trajectory = single_joint(
            &[0.0, 1.0, 2.0],
            &[0.0, f64::NAN, 2.0],
            &[0.0, f64::NAN, 0.0],
            &[0.0, f64::NAN, 0.0],
        )
        .unwrap();
        let state = trajectory.state(1.0);
        assert_relative_eq!(state.position[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(state.velocity[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(state.acceleration[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_free_boundary_position() {
        assert_eq!(
            single_joint(&[0.0, 1.0], &[f64::NAN, 1.0], &[0.0, 0.0], &[0.0, 0.0]),
            Err(TrajectoryError::FreeBoundaryPosition(0))
        );
    }

    #[test]
    fn rejects_bad_times() {
        assert_eq!(
            single_joint(&[0.0, 0.0], &[0.0, 1.0], &[0.0, 0.0], &[0.0, 0.0]),
            Err(TrajectoryError::NonIncreasingTimes)
        );
        assert_eq!(
            single_joint(&[0.0], &[0.0], &[0.0], &[0.0]),
            Err(TrajectoryError::TooFewWaypoints(1))
        );
    }
}
