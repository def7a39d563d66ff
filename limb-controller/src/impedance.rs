use crate::arm_config::ImpedanceConfig;
use crate::kinematics::{rotation_error, RobotModel};
use crate::plugin::{ArmPlugin, ArmState, PluginError};
use nalgebra as na;

/// Virtual spring and damper between the commanded and the actual end effector pose.
///
/// Gains are ordered x, y, z, roll, pitch, yaw.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpedanceController {
    enabled: bool,
    spring_gains: na::Vector6<f64>,
    damper_gains: na::Vector6<f64>,
    gains_in_end_effector_frame: bool,
    impedance_effort: na::DVector<f64>,
}

impl ImpedanceController {
    pub fn new(gains_in_end_effector_frame: bool) -> ImpedanceController {
        ImpedanceController {
            enabled: true,
            spring_gains: na::Vector6::zeros(),
            damper_gains: na::Vector6::zeros(),
            gains_in_end_effector_frame,
            impedance_effort: na::DVector::zeros(0),
        }
    }

    pub fn from_config(config: &ImpedanceConfig) -> ImpedanceController {
        let mut controller = ImpedanceController::new(config.gains_in_end_effector_frame);
        controller.spring_gains = na::Vector6::from_column_slice(&config.spring_gains);
        controller.damper_gains = na::Vector6::from_column_slice(&config.damper_gains);
        controller
    }

    pub fn set_spring_gains(&mut self, x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) {
        self.spring_gains = na::Vector6::new(x, y, z, roll, pitch, yaw);
    }

    pub fn set_damper_gains(&mut self, x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) {
        self.damper_gains = na::Vector6::new(x, y, z, roll, pitch, yaw);
    }

    pub fn spring_gains(&self) -> &na::Vector6<f64> {
        &self.spring_gains
    }

    pub fn damper_gains(&self) -> &na::Vector6<f64> {
        &self.damper_gains
    }

    pub fn gains_in_end_effector_frame(&self) -> bool {
        self.gains_in_end_effector_frame
    }

    pub fn set_gains_in_end_effector_frame(&mut self, in_end_effector_frame: bool) {
        self.gains_in_end_effector_frame = in_end_effector_frame;
    }

    /// Effort added on the last update
    pub fn impedance_effort(&self) -> &na::DVector<f64> {
        &self.impedance_effort
    }
}

impl ArmPlugin for ImpedanceController {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_associated(&mut self, robot_model: &dyn RobotModel) -> Result<(), PluginError> {
        self.impedance_effort = na::DVector::zeros(robot_model.dof_count());
        Ok(())
    }

    fn update(&mut self, state: &mut ArmState<'_>) -> bool {
        let command = &mut *state.pending_command;
        if command.position.iter().any(|value| value.is_nan())
            || command.velocity.iter().any(|value| value.is_nan())
        {
            return true;
        }
        let model = state.robot_model;
        let feedback = state.last_feedback;

        let desired = model.end_effector(&command.position);
        let actual = model.end_effector(&feedback.position);
        let jacobian = model.end_effector_jacobian(&feedback.position);
        let actual_rotation = actual.rotation.to_rotation_matrix().into_inner();
        let desired_rotation = desired.rotation.to_rotation_matrix().into_inner();

        let mut xyz_error = desired.translation.vector - actual.translation.vector;
        let mut rotation_vector =
            rotation_error(&(desired_rotation * actual_rotation.transpose()));
        if self.gains_in_end_effector_frame {
            xyz_error = actual_rotation.tr_mul(&xyz_error);
            rotation_vector = actual_rotation.tr_mul(&rotation_vector);
        }

        let pose_error = na::Vector6::new(
            xyz_error.x,
            xyz_error.y,
            xyz_error.z,
            rotation_vector.x,
            rotation_vector.y,
            rotation_vector.z,
        );
        let joint_velocity_error = &command.velocity - &feedback.velocity;
        let tip_velocity_error = &jacobian * joint_velocity_error;
        let velocity_error = na::Vector6::new(
            tip_velocity_error[0],
            tip_velocity_error[1],
            tip_velocity_error[2],
            0.0,
            0.0,
            0.0,
        );

        let mut spring_wrench = pose_error.component_mul(&self.spring_gains);
        if self.gains_in_end_effector_frame {
            let force = actual_rotation * spring_wrench.fixed_rows::<3>(0);
            let torque = actual_rotation * spring_wrench.fixed_rows::<3>(3);
            spring_wrench.fixed_rows_mut::<3>(0).copy_from(&force);
            spring_wrench.fixed_rows_mut::<3>(3).copy_from(&torque);
        }
        let damper_wrench = velocity_error.component_mul(&self.damper_gains);
        let wrench = spring_wrench + damper_wrench;

        self.impedance_effort = jacobian.tr_mul(&na::DVector::from_column_slice(wrench.as_slice()));
        command.effort += &self.impedance_effort;
        true
    }
}
