use crate::AsAny;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum KinematicsError {
    #[error("expected {expected} joint values but got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("link {0} has a zero length rotation axis")]
    InvalidAxis(usize),
    #[error("link {0} has a negative or non finite mass")]
    InvalidMass(usize),
    #[error("jacobian is singular")]
    SingularJacobian,
}

type Result<T> = std::result::Result<T, KinematicsError>;

/// Frames of a robot model that jacobians can be requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// center of mass of every body, in the same order as [`RobotModel::masses`]
    CenterOfMass,
    /// output frame of every joint
    Output,
}

/// Goals and constraints for inverse kinematics
#[derive(Debug, Clone, PartialEq)]
pub enum IkObjective {
    EndEffectorPosition(na::Vector3<f64>),
    /// direction the end effector z axis should point in
    TipAxis(na::Vector3<f64>),
    EndEffectorSo3(na::Rotation3<f64>),
    JointLimits {
        min: na::DVector<f64>,
        max: na::DVector<f64>,
    },
}

/// Kinematic and dynamic description of an arm.
///
/// Jacobians are 6 x dof, translational rows first.
pub trait RobotModel: AsAny + Send {
    fn dof_count(&self) -> usize;

    /// Mass of every body, one entry per center of mass frame
    fn masses(&self) -> Vec<f64>;

    fn jacobians(&self, kind: FrameKind, positions: &na::DVector<f64>) -> Vec<na::DMatrix<f64>>;

    fn end_effector(&self, positions: &na::DVector<f64>) -> na::Isometry3<f64>;

    fn end_effector_jacobian(&self, positions: &na::DVector<f64>) -> na::DMatrix<f64>;

    fn solve_inverse_kinematics(
        &self,
        initial_positions: &na::DVector<f64>,
        objectives: &[IkObjective],
    ) -> Result<na::DVector<f64>>;
}

/// End effector frame split into the parts users usually care about
#[derive(Debug, Clone, PartialEq)]
pub struct EndEffectorFrame {
    pub xyz: na::Vector3<f64>,
    /// z axis of the end effector
    pub tip_axis: na::Vector3<f64>,
    pub orientation: na::Rotation3<f64>,
}

impl From<na::Isometry3<f64>> for EndEffectorFrame {
    fn from(frame: na::Isometry3<f64>) -> Self {
        let orientation = frame.rotation.to_rotation_matrix();
        EndEffectorFrame {
            xyz: frame.translation.vector,
            tip_axis: orientation * na::Vector3::z(),
            orientation,
        }
    }
}

/// Rotation vector (axis * angle) of a rotation matrix.
///
/// The axis comes from the antisymmetric part, the angle from
/// `atan2(|axis|, trace - 1)`. At a half turn the antisymmetric part vanishes
/// and the axis is recovered from the symmetric part instead.
pub fn rotation_error(rotation: &na::Matrix3<f64>) -> na::Vector3<f64> {
    let axis = na::Vector3::new(
        rotation[(2, 1)] - rotation[(1, 2)],
        rotation[(0, 2)] - rotation[(2, 0)],
        rotation[(1, 0)] - rotation[(0, 1)],
    );
    let norm = axis.norm();
    if norm <= 1e-9 {
        if rotation.trace() > 1.0 {
            return na::Vector3::zeros();
        }
        return half_turn_axis(rotation) * std::f64::consts::PI;
    }
    let angle = norm.atan2(rotation.trace() - 1.0);
    axis / norm * angle
}

/// Unit axis of a rotation by pi, where `R = 2 a a^T - I`
fn half_turn_axis(rotation: &na::Matrix3<f64>) -> na::Vector3<f64> {
    let diagonal = rotation.diagonal();
    let i = diagonal.imax();
    let mut axis = na::Vector3::zeros();
    axis[i] = ((diagonal[i] + 1.0) / 2.0).max(0.0).sqrt();
    for j in (0..3).filter(|&j| j != i) {
        axis[j] = (rotation[(i, j)] + rotation[(j, i)]) / (4.0 * axis[i]);
    }
    axis.normalize()
}

/// One revolute joint and the body it moves
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Link {
    /// offset of the joint from the previous joint output
    pub translation: na::Vector3<f64>,
    /// roll pitch yaw of the joint relative to the previous joint output
    #[serde(default = "na::Vector3::zeros")]
    pub rotation: na::Vector3<f64>,
    pub axis: na::Vector3<f64>,
    pub mass: f64,
    /// center of mass in the joint output frame
    pub center_of_mass: na::Vector3<f64>,
}

impl Link {
    pub fn new(
        translation: na::Vector3<f64>,
        axis: na::Vector3<f64>,
        mass: f64,
        center_of_mass: na::Vector3<f64>,
    ) -> Link {
        Link {
            translation,
            rotation: na::Vector3::zeros(),
            axis,
            mass,
            center_of_mass,
        }
    }

    fn origin(&self) -> na::Isometry3<f64> {
        na::Isometry3::from_parts(
            na::Translation3::from(self.translation),
            na::UnitQuaternion::from_euler_angles(self.rotation.x, self.rotation.y, self.rotation.z),
        )
    }
}

const IK_MAX_ITERATIONS: usize = 200;
const IK_TOLERANCE: f64 = 1e-9;
const IK_DAMPING: f64 = 1e-2;

/// Serial chain of revolute joints.
///
/// Bodies are the links plus a payload at the end effector,
/// so [`RobotModel::masses`] has `dof_count() + 1` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialChain {
    links: Vec<Link>,
    axes: Vec<na::Unit<na::Vector3<f64>>>,
    end_effector: na::Vector3<f64>,
    payload_mass: f64,
}

struct ChainPose {
    joint_origins: Vec<na::Vector3<f64>>,
    joint_axes: Vec<na::Vector3<f64>>,
    outputs: Vec<na::Isometry3<f64>>,
    centers_of_mass: Vec<na::Vector3<f64>>,
    end_effector: na::Isometry3<f64>,
}

impl SerialChain {
    pub fn new(
        links: Vec<Link>,
        end_effector: na::Vector3<f64>,
        payload_mass: f64,
    ) -> Result<SerialChain> {
        let mut axes = Vec::with_capacity(links.len());
        for (index, link) in links.iter().enumerate() {
            if !(link.mass.is_finite() && link.mass >= 0.0) {
                return Err(KinematicsError::InvalidMass(index));
            }
            let axis = na::Unit::try_new(link.axis, f64::EPSILON)
                .ok_or(KinematicsError::InvalidAxis(index))?;
            axes.push(axis);
        }
        let mut chain = SerialChain {
            links,
            axes,
            end_effector,
            payload_mass: 0.0,
        };
        chain.set_payload_mass(payload_mass)?;
        Ok(chain)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn payload_mass(&self) -> f64 {
        self.payload_mass
    }

    /// Mass held at the end effector, can be changed between control ticks
    pub fn set_payload_mass(&mut self, mass: f64) -> Result<()> {
        if !(mass.is_finite() && mass >= 0.0) {
            return Err(KinematicsError::InvalidMass(self.links.len()));
        }
        self.payload_mass = mass;
        Ok(())
    }

    fn pose(&self, positions: &na::DVector<f64>) -> ChainPose {
        let dof = self.links.len();
        let mut frame = na::Isometry3::identity();
        let mut pose = ChainPose {
            joint_origins: Vec::with_capacity(dof),
            joint_axes: Vec::with_capacity(dof),
            outputs: Vec::with_capacity(dof),
            centers_of_mass: Vec::with_capacity(dof + 1),
            end_effector: na::Isometry3::identity(),
        };
        for (index, (link, axis)) in self.links.iter().zip(&self.axes).enumerate() {
            frame *= link.origin();
            pose.joint_origins.push(frame.translation.vector);
            pose.joint_axes.push(frame.rotation * axis.into_inner());
            let rotation = na::UnitQuaternion::from_axis_angle(axis, positions[index]);
            frame *= na::Isometry3::from_parts(na::Translation3::identity(), rotation);
            pose.outputs.push(frame);
            pose.centers_of_mass
                .push((frame * na::Point3::from(link.center_of_mass)).coords);
        }
        pose.end_effector = frame * na::Translation3::from(self.end_effector);
        pose.centers_of_mass
            .push(pose.end_effector.translation.vector);
        pose
    }

    /// Geometric jacobian of a point moved by joints `0..=last_joint`
    fn point_jacobian(
        pose: &ChainPose,
        point: &na::Vector3<f64>,
        last_joint: usize,
        dof: usize,
    ) -> na::DMatrix<f64> {
        let mut jacobian = na::DMatrix::zeros(6, dof);
        for joint in 0..=last_joint.min(dof.saturating_sub(1)) {
            if dof == 0 {
                break;
            }
            let axis = pose.joint_axes[joint];
            let linear = axis.cross(&(point - pose.joint_origins[joint]));
            for row in 0..3 {
                jacobian[(row, joint)] = linear[row];
                jacobian[(row + 3, joint)] = axis[row];
            }
        }
        jacobian
    }

    fn check_dimension(&self, positions: &na::DVector<f64>) -> Result<()> {
        if positions.len() != self.links.len() {
            return Err(KinematicsError::DimensionMismatch {
                expected: self.links.len(),
                actual: positions.len(),
            });
        }
        Ok(())
    }
}

impl RobotModel for SerialChain {
    fn dof_count(&self) -> usize {
        self.links.len()
    }

    fn masses(&self) -> Vec<f64> {
        self.links
            .iter()
            .map(|link| link.mass)
            .chain(std::iter::once(self.payload_mass))
            .collect()
    }

    fn jacobians(&self, kind: FrameKind, positions: &na::DVector<f64>) -> Vec<na::DMatrix<f64>> {
        let dof = self.dof_count();
        let pose = self.pose(positions);
        match kind {
            FrameKind::CenterOfMass => pose
                .centers_of_mass
                .iter()
                .enumerate()
                .map(|(body, point)| Self::point_jacobian(&pose, point, body, dof))
                .collect(),
            FrameKind::Output => pose
                .outputs
                .iter()
                .enumerate()
                .map(|(joint, frame)| {
                    Self::point_jacobian(&pose, &frame.translation.vector, joint, dof)
                })
                .collect(),
        }
    }

    fn end_effector(&self, positions: &na::DVector<f64>) -> na::Isometry3<f64> {
        self.pose(positions).end_effector
    }

    fn end_effector_jacobian(&self, positions: &na::DVector<f64>) -> na::DMatrix<f64> {
        let dof = self.dof_count();
        let pose = self.pose(positions);
        let tip = pose.end_effector.translation.vector;
        Self::point_jacobian(&pose, &tip, dof, dof)
    }

    /// Damped least squares
    fn solve_inverse_kinematics(
        &self,
        initial_positions: &na::DVector<f64>,
        objectives: &[IkObjective],
    ) -> Result<na::DVector<f64>> {
        self.check_dimension(initial_positions)?;
        let dof = self.dof_count();
        let mut limits = None;
        for objective in objectives {
            if let IkObjective::JointLimits { min, max } = objective {
                self.check_dimension(min)?;
                self.check_dimension(max)?;
                limits = Some((min, max));
            }
        }
        let clamp = |positions: &mut na::DVector<f64>| {
            if let Some((min, max)) = limits {
                for i in 0..positions.len() {
                    positions[i] = positions[i].max(min[i]).min(max[i]);
                }
            }
        };

        let mut positions = initial_positions.clone();
        clamp(&mut positions);

        for iteration in 0..IK_MAX_ITERATIONS {
            let frame = self.end_effector(&positions);
            let full_jacobian = self.end_effector_jacobian(&positions);
            let rotation = frame.rotation.to_rotation_matrix();

            let mut rows: Vec<(na::DMatrix<f64>, na::Vector3<f64>)> = Vec::new();
            for objective in objectives {
                match objective {
                    IkObjective::EndEffectorPosition(target) => {
                        let error = target - frame.translation.vector;
                        rows.push((full_jacobian.rows(0, 3).into_owned(), error));
                    }
                    IkObjective::TipAxis(target) => {
                        let current = rotation * na::Vector3::z();
                        let error = current.cross(&target.normalize());
                        rows.push((full_jacobian.rows(3, 3).into_owned(), error));
                    }
                    IkObjective::EndEffectorSo3(target) => {
                        let relative = target.matrix() * rotation.matrix().transpose();
                        let error = rotation_error(&relative);
                        rows.push((full_jacobian.rows(3, 3).into_owned(), error));
                    }
                    IkObjective::JointLimits { .. } => {}
                }
            }
            if rows.is_empty() {
                break;
            }

            let task_rows = rows.len() * 3;
            let mut jacobian = na::DMatrix::zeros(task_rows, dof);
            let mut error = na::DVector::zeros(task_rows);
            for (index, (block, block_error)) in rows.iter().enumerate() {
                for row in 0..3 {
                    error[index * 3 + row] = block_error[row];
                    for column in 0..dof {
                        jacobian[(index * 3 + row, column)] = block[(row, column)];
                    }
                }
            }

            if error.norm_squared() < IK_TOLERANCE {
                debug!("IK converged after {} iterations", iteration);
                break;
            }

            let damped = &jacobian * jacobian.transpose()
                + na::DMatrix::identity(task_rows, task_rows) * IK_DAMPING.powi(2);
            let cholesky = damped
                .cholesky()
                .ok_or(KinematicsError::SingularJacobian)?;
            let step = jacobian.transpose() * cholesky.solve(&error);
            positions += step;
            clamp(&mut positions);
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    /// planar arm, both joints rotate about z, links along x
    fn planar_arm() -> SerialChain {
        let links = vec![
            Link::new(
                na::Vector3::zeros(),
                na::Vector3::z(),
                1.0,
                na::Vector3::new(0.5, 0.0, 0.0),
            ),
            Link::new(
                na::Vector3::new(1.0, 0.0, 0.0),
                na::Vector3::z(),
                1.0,
                na::Vector3::new(0.5, 0.0, 0.0),
            ),
        ];
        SerialChain::new(links, na::Vector3::new(1.0, 0.0, 0.0), 0.0).unwrap()
    }

    #[test]
    fn forward_kinematics_straight() {
        let arm = planar_arm();
        let frame = arm.end_effector(&na::DVector::from_vec(vec![0.0, 0.0]));
        assert_relative_eq!(frame.translation.vector, na::Vector3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn forward_kinematics_bent() {
        let arm = planar_arm();
        let frame = arm.end_effector(&na::DVector::from_vec(vec![FRAC_PI_2, -FRAC_PI_2]));
        assert_relative_eq!(
            frame.translation.vector,
            na::Vector3::new(1.0, 1.0, 0.0),
            epsilon = 1e-12
        );
        let tip: EndEffectorFrame = frame.into();
        assert_relative_eq!(tip.tip_axis, na::Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn masses_include_payload() {
        let mut arm = planar_arm();
        arm.set_payload_mass(0.3).unwrap();
        assert_eq!(arm.masses(), vec![1.0, 1.0, 0.3]);
        assert!(arm.set_payload_mass(-1.0).is_err());
    }

    #[test]
    fn end_effector_jacobian_matches_finite_difference() {
        let arm = planar_arm();
        let positions = na::DVector::from_vec(vec![0.3, -0.7]);
        let jacobian = arm.end_effector_jacobian(&positions);
        let step = 1e-7;
        for joint in 0..2 {
            let mut moved = positions.clone();
            moved[joint] += step;
            let difference = (arm.end_effector(&moved).translation.vector
                - arm.end_effector(&positions).translation.vector)
                / step;
            for row in 0..3 {
                assert_relative_eq!(jacobian[(row, joint)], difference[row], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn center_of_mass_jacobians_only_use_preceding_joints() {
        let arm = planar_arm();
        let jacobians = arm.jacobians(FrameKind::CenterOfMass, &na::DVector::zeros(2));
        assert_eq!(jacobians.len(), 3);
        // first body does not move with the second joint
        assert_relative_eq!(jacobians[0].column(1).norm(), 0.0);
        // first body center sits at x = 0.5, moves along y
        assert_relative_eq!(jacobians[0][(1, 0)], 0.5);
    }

    #[test]
    fn rejects_zero_axis() {
        let links = vec![Link::new(
            na::Vector3::zeros(),
            na::Vector3::zeros(),
            1.0,
            na::Vector3::zeros(),
        )];
        assert_eq!(
            SerialChain::new(links, na::Vector3::zeros(), 0.0),
            Err(KinematicsError::InvalidAxis(0))
        );
    }

    #[test]
    fn rotation_error_of_identity_is_zero() {
        assert_relative_eq!(
            rotation_error(&na::Matrix3::identity()),
            na::Vector3::zeros()
        );
    }

    #[test]
    fn rotation_error_recovers_axis_angle() {
        let rotation = na::Rotation3::from_axis_angle(&na::Vector3::y_axis(), 0.4);
        assert_relative_eq!(
            rotation_error(rotation.matrix()),
            na::Vector3::new(0.0, 0.4, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rotation_error_of_half_turn() {
        let axis = na::Unit::new_normalize(na::Vector3::new(1.0, 1.0, 0.0));
        let rotation = na::Rotation3::from_axis_angle(&axis, std::f64::consts::PI);
        let error = rotation_error(rotation.matrix());
        assert_relative_eq!(error.norm(), std::f64::consts::PI, epsilon = 1e-9);
        assert_relative_eq!(error.normalize().dot(&axis).abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn inverse_kinematics_reaches_position() {
        let arm = planar_arm();
        let target = na::Vector3::new(1.2, 0.8, 0.0);
        let solution = arm
            .solve_inverse_kinematics(
                &na::DVector::from_vec(vec![0.1, 0.5]),
                &[IkObjective::EndEffectorPosition(target)],
            )
            .unwrap();
        assert_relative_eq!(
            arm.end_effector(&solution).translation.vector,
            target,
            epsilon = 1e-4
        );
    }

    #[test]
    fn inverse_kinematics_respects_joint_limits() {
        let arm = planar_arm();
        let solution = arm
            .solve_inverse_kinematics(
                &na::DVector::from_vec(vec![0.0, 0.0]),
                &[
                    IkObjective::EndEffectorPosition(na::Vector3::new(0.0, 2.0, 0.0)),
                    IkObjective::JointLimits {
                        min: na::DVector::from_vec(vec![-0.5, -0.5]),
                        max: na::DVector::from_vec(vec![0.5, 0.5]),
                    },
                ],
            )
            .unwrap();
        assert!(solution.iter().all(|q| q.abs() <= 0.5 + 1e-12));
    }

    #[test]
    fn inverse_kinematics_checks_dimensions() {
        let arm = planar_arm();
        assert_eq!(
            arm.solve_inverse_kinematics(&na::DVector::zeros(3), &[]),
            Err(KinematicsError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
    }
}
