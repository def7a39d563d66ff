use crate::group::GroupFeedback;
use crate::kinematics::{FrameKind, RobotModel};
use nalgebra as na;

pub const GRAVITY: f64 = 9.81;

/// Direction of gravity in the frame of a base module with `orientation`.
///
/// A base without a valid orientation reading is assumed to be upright.
/// A zero quaternion yields a zero direction.
pub fn gravity_direction(orientation: &na::Quaternion<f64>) -> na::Vector3<f64> {
    let down = -na::Vector3::z();
    if !orientation.coords.iter().all(|value| value.is_finite()) {
        return down;
    }
    if orientation.norm() == 0.0 {
        return na::Vector3::zeros();
    }
    na::UnitQuaternion::new_normalize(*orientation).inverse_transform_vector(&down)
}

/// Joint efforts holding up every body against gravity.
///
/// `jacobians` are the center of mass jacobians matching `masses`.
pub fn compensation_efforts(
    gravity: &na::Vector3<f64>,
    masses: &[f64],
    jacobians: &[na::DMatrix<f64>],
    dof: usize,
) -> na::DVector<f64> {
    let mut efforts = na::DVector::zeros(dof);
    let magnitude = gravity.norm();
    if magnitude == 0.0 {
        return efforts;
    }
    let support = -gravity / magnitude * GRAVITY;
    for (mass, jacobian) in masses.iter().zip(jacobians) {
        let force = support * *mass;
        let mut wrench = na::DVector::zeros(6);
        wrench.fixed_rows_mut::<3>(0).copy_from(&force);
        efforts += jacobian.tr_mul(&wrench);
    }
    efforts
}

/// Compensation efforts for the current feedback, using the first module as base
pub fn gravity_compensation_efforts(
    robot_model: &dyn RobotModel,
    feedback: &GroupFeedback,
) -> na::DVector<f64> {
    let orientation = feedback
        .orientation
        .first()
        .copied()
        .unwrap_or_else(na::Quaternion::identity);
    let masses = robot_model.masses();
    let jacobians = robot_model.jacobians(FrameKind::CenterOfMass, &feedback.position);
    compensation_efforts(
        &gravity_direction(&orientation),
        &masses,
        &jacobians,
        robot_model.dof_count(),
    )
}
