use nalgebra as na;
use std::cell::OnceCell;
use thiserror::Error;

/// Time between waypoints of a goal that doesn't specify times
pub const DEFAULT_SEGMENT_DURATION: f64 = 1.2;

#[derive(Error, Debug, PartialEq)]
pub enum GoalError {
    #[error("time and aux have to be specified on every waypoint or none")]
    InconsistentWaypointSchema,
    #[error("waypoint needs at least one of position, velocity or acceleration")]
    EmptyWaypoint,
    #[error("expected {expected} values but got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("waypoint time {time} has to be after {previous}")]
    NonMonotonicWaypointTime { time: f64, previous: f64 },
    #[error("goal has no waypoints")]
    NoWaypoints,
}

type Result<T> = std::result::Result<T, GoalError>;

/// Single point of a [`Goal`]
///
/// ```
/// use limb_controller::goal::Waypoint;
///
/// let waypoint = Waypoint::new().position(&[0.0, 1.0]).at(2.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    time: Option<f64>,
    time_relative: bool,
    position: Option<na::DVector<f64>>,
    velocity: Option<na::DVector<f64>>,
    acceleration: Option<na::DVector<f64>>,
    aux: Option<Vec<f64>>,
}

impl Default for Waypoint {
    fn default() -> Self {
        Waypoint::new()
    }
}

impl Waypoint {
    pub fn new() -> Waypoint {
        Waypoint {
            time: None,
            time_relative: true,
            position: None,
            velocity: None,
            acceleration: None,
            aux: None,
        }
    }

    pub fn position(mut self, position: &[f64]) -> Self {
        self.position = Some(na::DVector::from_column_slice(position));
        self
    }

    pub fn velocity(mut self, velocity: &[f64]) -> Self {
        self.velocity = Some(na::DVector::from_column_slice(velocity));
        self
    }

    pub fn acceleration(mut self, acceleration: &[f64]) -> Self {
        self.acceleration = Some(na::DVector::from_column_slice(acceleration));
        self
    }

    pub fn aux(mut self, aux: &[f64]) -> Self {
        self.aux = Some(aux.to_vec());
        self
    }

    /// Seconds after the previous waypoint
    pub fn at(mut self, time: f64) -> Self {
        self.time = Some(time);
        self.time_relative = true;
        self
    }

    /// Seconds after the start of the goal
    pub fn at_absolute(mut self, time: f64) -> Self {
        self.time = Some(time);
        self.time_relative = false;
        self
    }

    fn vectors(&self) -> impl Iterator<Item = &na::DVector<f64>> {
        [&self.position, &self.velocity, &self.acceleration]
            .into_iter()
            .flatten()
    }
}

/// Matrices of a goal, one column per waypoint
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltGoal {
    /// time of every waypoint measured from the start of the goal
    pub times: na::DVector<f64>,
    /// false if the times come from [`DEFAULT_SEGMENT_DURATION`]
    pub explicit_times: bool,
    pub positions: na::DMatrix<f64>,
    pub velocities: na::DMatrix<f64>,
    pub accelerations: na::DMatrix<f64>,
    pub aux: Option<Vec<Vec<f64>>>,
}

/// Ordered set of waypoints for an arm to move through
#[derive(Debug, Clone)]
pub struct Goal {
    dof: usize,
    waypoints: Vec<Waypoint>,
    resolved_times: Vec<f64>,
    built: OnceCell<BuiltGoal>,
}

impl Goal {
    pub fn new(dof: usize) -> Goal {
        Goal {
            dof,
            waypoints: vec![],
            resolved_times: vec![],
            built: OnceCell::new(),
        }
    }

    pub fn dof_count(&self) -> usize {
        self.dof
    }

    pub fn waypoint_count(&self) -> usize {
        self.waypoints.len()
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.resolved_times.clear();
        self.built = OnceCell::new();
    }

    /// Appends a waypoint.
    ///
    /// The goal is left unchanged if the waypoint is rejected.
    pub fn add_waypoint(&mut self, waypoint: Waypoint) -> Result<&mut Self> {
        if waypoint.vectors().next().is_none() {
            return Err(GoalError::EmptyWaypoint);
        }
        for vector in waypoint.vectors() {
            if vector.len() != self.dof {
                return Err(GoalError::DimensionMismatch {
                    expected: self.dof,
                    actual: vector.len(),
                });
            }
        }
        if let Some(first) = self.waypoints.first() {
            if first.time.is_some() != waypoint.time.is_some()
                || first.aux.is_some() != waypoint.aux.is_some()
            {
                return Err(GoalError::InconsistentWaypointSchema);
            }
            if let (Some(expected), Some(actual)) = (&first.aux, &waypoint.aux) {
                if expected.len() != actual.len() {
                    return Err(GoalError::DimensionMismatch {
                        expected: expected.len(),
                        actual: actual.len(),
                    });
                }
            }
        }
        if let Some(time) = waypoint.time {
            let previous = self.resolved_times.last().copied().unwrap_or(0.0);
            let resolved = if waypoint.time_relative {
                previous + time
            } else {
                time
            };
            if !resolved.is_finite() || resolved <= previous {
                return Err(GoalError::NonMonotonicWaypointTime {
                    time: resolved,
                    previous,
                });
            }
            self.resolved_times.push(resolved);
        }

        self.waypoints.push(waypoint);
        self.built = OnceCell::new();
        Ok(self)
    }

    /// Waypoint matrices, computed once and reused until the goal changes.
    ///
    /// Unset values on the first and last waypoint are 0,
    /// unset values in between are `NaN` and left for the trajectory to choose.
    pub fn build(&self) -> Result<&BuiltGoal> {
        if self.waypoints.is_empty() {
            return Err(GoalError::NoWaypoints);
        }
        Ok(self.built.get_or_init(|| self.assemble()))
    }

    fn assemble(&self) -> BuiltGoal {
        let count = self.waypoints.len();
        let explicit_times = !self.resolved_times.is_empty();
        let times = if explicit_times {
            na::DVector::from_column_slice(&self.resolved_times)
        } else {
            na::DVector::from_fn(count, |k, _| (k + 1) as f64 * DEFAULT_SEGMENT_DURATION)
        };

        let aux = if self.waypoints[0].aux.is_some() {
            Some(
                self.waypoints
                    .iter()
                    .filter_map(|waypoint| waypoint.aux.clone())
                    .collect(),
            )
        } else {
            None
        };

        BuiltGoal {
            times,
            explicit_times,
            positions: self.matrix(|waypoint| waypoint.position.as_ref()),
            velocities: self.matrix(|waypoint| waypoint.velocity.as_ref()),
            accelerations: self.matrix(|waypoint| waypoint.acceleration.as_ref()),
            aux,
        }
    }

    fn matrix(&self, select: fn(&Waypoint) -> Option<&na::DVector<f64>>) -> na::DMatrix<f64> {
        let count = self.waypoints.len();
        na::DMatrix::from_fn(self.dof, count, |joint, index| {
            match select(&self.waypoints[index]) {
                Some(values) => values[joint],
                None if index == 0 || index == count - 1 => 0.0,
                None => f64::NAN,
            }
        })
    }
}
