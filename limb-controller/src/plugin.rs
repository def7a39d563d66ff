use crate::group::{Group, GroupCommand, GroupFeedback};
use crate::kinematics::RobotModel;
use crate::AsAny;
use nalgebra as na;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq)]
pub enum PluginError {
    #[error("plugin expects {expected} joints but the arm has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("plugin group has {0} modules instead of 1")]
    GroupSize(usize),
    #[error("joint {index} is out of range for an arm with {dof} joints")]
    JointOutOfRange { index: usize, dof: usize },
}

/// What a plugin gets to see and change during a tick.
///
/// `pending_command` is the command that will be sent at the end of the tick.
pub struct ArmState<'a> {
    pub robot_model: &'a dyn RobotModel,
    pub last_feedback: &'a GroupFeedback,
    pub pending_command: &'a mut GroupCommand,
}

/// Extension that adjusts the arm command every tick.
///
/// Plugins run in the order they were added, only while enabled.
pub trait ArmPlugin: AsAny + Send {
    fn enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Called once when the plugin is added to an arm
    fn on_associated(&mut self, _robot_model: &dyn RobotModel) -> Result<(), PluginError> {
        Ok(())
    }

    /// Returns false if the plugin failed this tick
    fn update(&mut self, state: &mut ArmState<'_>) -> bool;
}

/// Handle to a plugin owned by an arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq)]
enum Offset {
    Uniform(f64),
    PerJoint(na::DVector<f64>),
}

/// Adds a constant effort on top of the command
#[derive(Debug, Clone, PartialEq)]
pub struct EffortOffset {
    enabled: bool,
    offset: Offset,
    dof: Option<usize>,
}

impl EffortOffset {
    /// Same offset on every joint
    pub fn uniform(offset: f64) -> EffortOffset {
        EffortOffset {
            enabled: true,
            offset: Offset::Uniform(offset),
            dof: None,
        }
    }

    pub fn per_joint(offsets: &[f64]) -> EffortOffset {
        EffortOffset {
            enabled: true,
            offset: Offset::PerJoint(na::DVector::from_column_slice(offsets)),
            dof: None,
        }
    }

    /// Offset of every joint for an arm with `dof` joints
    pub fn offset(&self, dof: usize) -> na::DVector<f64> {
        match &self.offset {
            Offset::Uniform(offset) => na::DVector::from_element(dof, *offset),
            Offset::PerJoint(offsets) => offsets.clone(),
        }
    }

    pub fn set_uniform_offset(&mut self, offset: f64) {
        self.offset = Offset::Uniform(offset);
    }

    /// Replaces the offsets with per joint values.
    ///
    /// Once added to an arm the length has to match its joint count.
    pub fn set_offset(&mut self, offsets: &[f64]) -> Result<(), PluginError> {
        if let Some(dof) = self.dof {
            if offsets.len() != dof {
                return Err(PluginError::DimensionMismatch {
                    expected: offsets.len(),
                    actual: dof,
                });
            }
        }
        self.offset = Offset::PerJoint(na::DVector::from_column_slice(offsets));
        Ok(())
    }
}

impl ArmPlugin for EffortOffset {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_associated(&mut self, robot_model: &dyn RobotModel) -> Result<(), PluginError> {
        if let Offset::PerJoint(offsets) = &self.offset {
            if offsets.len() != robot_model.dof_count() {
                return Err(PluginError::DimensionMismatch {
                    expected: offsets.len(),
                    actual: robot_model.dof_count(),
                });
            }
        }
        self.dof = Some(robot_model.dof_count());
        Ok(())
    }

    fn update(&mut self, state: &mut ArmState<'_>) -> bool {
        let effort = &mut state.pending_command.effort;
        match &self.offset {
            Offset::Uniform(offset) => effort.add_scalar_mut(*offset),
            Offset::PerJoint(offsets) => *effort += offsets,
        }
        true
    }
}

/// Drives a second module that is mechanically coupled to one joint of the arm.
///
/// The second module mirrors the joint position, velocity and effort.
/// NaN entries are skipped and the module keeps its previous setpoint for them.
/// The arm command itself is left untouched.
pub struct DoubledJointMirror {
    enabled: bool,
    index: usize,
    group: Box<dyn Group>,
    command: GroupCommand,
}

impl DoubledJointMirror {
    /// `group` has to contain exactly the mirroring module
    pub fn new(index: usize, group: Box<dyn Group>) -> Result<DoubledJointMirror, PluginError> {
        if group.size() != 1 {
            return Err(PluginError::GroupSize(group.size()));
        }
        Ok(DoubledJointMirror {
            enabled: true,
            index,
            group,
            command: GroupCommand::new(1),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Command most recently sent to the mirroring module
    pub fn command(&self) -> &GroupCommand {
        &self.command
    }
}

impl ArmPlugin for DoubledJointMirror {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn on_associated(&mut self, robot_model: &dyn RobotModel) -> Result<(), PluginError> {
        if self.index >= robot_model.dof_count() {
            return Err(PluginError::JointOutOfRange {
                index: self.index,
                dof: robot_model.dof_count(),
            });
        }
        Ok(())
    }

    fn update(&mut self, state: &mut ArmState<'_>) -> bool {
        let primary = &*state.pending_command;
        let mirrored = [
            (&mut self.command.position, primary.position[self.index]),
            (&mut self.command.velocity, primary.velocity[self.index]),
            (&mut self.command.effort, primary.effort[self.index]),
        ];
        for (target, value) in mirrored {
            if !value.is_nan() {
                target[0] = -value;
            }
        }

        match self.group.send_command(&self.command) {
            Ok(()) => true,
            Err(error) => {
                warn!("Failed to send mirrored command: {}", error);
                false
            }
        }
    }
}
