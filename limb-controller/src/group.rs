use lazy_static::lazy_static;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::{
    fs, str,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("no feedback received within {0:?}")]
    FeedbackTimeout(Duration),
    #[error("command was not acknowledged within {0:?}")]
    AcknowledgementTimeout(Duration),
    #[error("expected {expected} modules but got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("group is not connected")]
    Disconnected,
    #[error("error while accessing gains file")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    DeserializationError(#[from] serde_json::error::Error),
}

type Result<T> = std::result::Result<T, GroupError>;

/// Timeout used for each acknowledged send when loading gains
pub const ACKNOWLEDGEMENT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStrategy {
    Off,
    DirectPwm,
    Strategy2,
    Strategy3,
    Strategy4,
}

/// Per-module controller gains
///
/// Every vector holds one value per module of the group it is sent to.
/// Fields that are `None` are left untouched on the modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Gains {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_strategy: Option<Vec<ControlStrategy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_kp: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_ki: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_kd: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_kp: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_ki: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_kd: Option<Vec<f64>>,
    /// feed forward effort gain, 1.0 passes commanded effort through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort_ff: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort_kp: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort_kd: Option<Vec<f64>>,
}

lazy_static! {
    static ref INCLUDED_ARM_GAINS: Gains = {
        let json = include_str!("../config/gains_arm.json");
        Gains::parse_json(json).unwrap()
    };
    static ref INCLUDED_GRIPPER_GAINS: Gains = {
        let json = include_str!("../config/gains_gripper.json");
        Gains::parse_json(json).unwrap()
    };
}

impl Gains {
    fn parse_json(json: &str) -> Result<Gains> {
        let gains = serde_json::from_str(json)?;
        Ok(gains)
    }

    pub fn load_json(path: &str) -> Result<Gains> {
        let text = fs::read_to_string(path)?;
        let gains = Gains::parse_json(&text)?;
        Ok(gains)
    }

    pub fn save_json(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, &json)?;
        Ok(())
    }

    /// Default gains for a six module arm.
    ///
    /// This file is packaged with the binary
    pub fn included_arm() -> Gains {
        INCLUDED_ARM_GAINS.clone()
    }

    /// Default gains for a single module gripper.
    ///
    /// This file is packaged with the binary
    pub fn included_gripper() -> Gains {
        INCLUDED_GRIPPER_GAINS.clone()
    }

    /// Number of modules these gains are written for.
    /// `None` if no field is set.
    pub fn module_count(&self) -> Option<usize> {
        self.lengths().next()
    }

    /// Checks that every set field has exactly `size` entries
    pub fn check_size(&self, size: usize) -> Result<()> {
        match self.lengths().find(|len| *len != size) {
            Some(actual) => Err(GroupError::SizeMismatch {
                expected: size,
                actual,
            }),
            None => Ok(()),
        }
    }

    fn lengths(&self) -> impl Iterator<Item = usize> + '_ {
        let strategy = self.control_strategy.as_ref().map(|values| values.len());
        let values = [
            &self.position_kp,
            &self.position_ki,
            &self.position_kd,
            &self.velocity_kp,
            &self.velocity_ki,
            &self.velocity_kd,
            &self.effort_ff,
            &self.effort_kp,
            &self.effort_kd,
        ];
        strategy
            .into_iter()
            .chain(values.into_iter().flatten().map(|values| values.len()))
    }
}

/// Command for every module of a group.
///
/// `NaN` entries mean "no command" for that module and field.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCommand {
    pub position: na::DVector<f64>,
    pub velocity: na::DVector<f64>,
    pub effort: na::DVector<f64>,
    pub gains: Option<Gains>,
}

impl GroupCommand {
    pub fn new(size: usize) -> GroupCommand {
        GroupCommand {
            position: na::DVector::from_element(size, f64::NAN),
            velocity: na::DVector::from_element(size, f64::NAN),
            effort: na::DVector::from_element(size, f64::NAN),
            gains: None,
        }
    }

    pub fn with_gains(size: usize, gains: Gains) -> Result<GroupCommand> {
        gains.check_size(size)?;
        let mut command = GroupCommand::new(size);
        command.gains = Some(gains);
        Ok(command)
    }

    pub fn size(&self) -> usize {
        self.position.len()
    }
}

/// Feedback from every module of a group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFeedback {
    pub position: na::DVector<f64>,
    pub velocity: na::DVector<f64>,
    pub effort: na::DVector<f64>,
    /// orientation of each module as reported by its IMU
    pub orientation: Vec<na::Quaternion<f64>>,
}

impl GroupFeedback {
    pub fn new(size: usize) -> GroupFeedback {
        GroupFeedback {
            position: na::DVector::zeros(size),
            velocity: na::DVector::zeros(size),
            effort: na::DVector::zeros(size),
            orientation: vec![na::Quaternion::identity(); size],
        }
    }

    pub fn size(&self) -> usize {
        self.position.len()
    }
}

/// A set of actuator modules that are commanded together.
///
/// Implementations own the transport. Discovery and wire format are their business.
pub trait Group: Send {
    fn size(&self) -> usize;

    /// Blocks until the next feedback arrives or `timeout` expires.
    ///
    /// `feedback` is only written on success.
    fn next_feedback(&mut self, feedback: &mut GroupFeedback, timeout: Duration) -> Result<()>;

    /// Fire and forget send
    fn send_command(&mut self, command: &GroupCommand) -> Result<()>;

    fn send_command_with_acknowledgement(
        &mut self,
        command: &GroupCommand,
        timeout: Duration,
    ) -> Result<()>;

    /// How long a command stays in effect on the modules
    fn set_command_lifetime(&mut self, _lifetime: Duration) -> Result<()> {
        Ok(())
    }

    fn set_feedback_frequency(&mut self, _frequency_hz: f64) -> Result<()> {
        Ok(())
    }
}

/// Sends `command` until it is acknowledged, at most `attempts` times
pub fn send_with_retries(group: &mut dyn Group, command: &GroupCommand, attempts: usize) -> bool {
    for attempt in 1..=attempts {
        match group.send_command_with_acknowledgement(command, ACKNOWLEDGEMENT_TIMEOUT) {
            Ok(()) => return true,
            Err(error) => debug!("Attempt {} of {} failed: {}", attempt, attempts, error),
        }
    }
    warn!("Command was not acknowledged after {} attempts", attempts);
    false
}

#[derive(Debug)]
struct SimulatedState {
    position: na::DVector<f64>,
    velocity: na::DVector<f64>,
    effort: na::DVector<f64>,
    orientation: na::Quaternion<f64>,
    online: bool,
    acknowledgements_to_drop: usize,
    sent_commands: usize,
    last_command: Option<GroupCommand>,
    gains: Option<Gains>,
    command_lifetime: Option<Duration>,
    feedback_frequency: Option<f64>,
}

/// In-process group of ideal servos.
///
/// Every module immediately reaches the commanded position and velocity,
/// and reports the commanded effort back as feedback.
pub struct SimulatedGroup {
    size: usize,
    state: Arc<Mutex<SimulatedState>>,
}

/// Shared view into a [`SimulatedGroup`] for inspecting and disturbing it
#[derive(Clone)]
pub struct SimulatedGroupHandle {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedGroup {
    pub fn new(size: usize) -> SimulatedGroup {
        let state = SimulatedState {
            position: na::DVector::zeros(size),
            velocity: na::DVector::zeros(size),
            effort: na::DVector::zeros(size),
            orientation: na::Quaternion::identity(),
            online: true,
            acknowledgements_to_drop: 0,
            sent_commands: 0,
            last_command: None,
            gains: None,
            command_lifetime: None,
            feedback_frequency: None,
        };
        SimulatedGroup {
            size,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn handle(&self) -> SimulatedGroupHandle {
        SimulatedGroupHandle {
            state: self.state.clone(),
        }
    }

    fn check_size(&self, command: &GroupCommand) -> Result<()> {
        if command.size() != self.size {
            return Err(GroupError::SizeMismatch {
                expected: self.size,
                actual: command.size(),
            });
        }
        Ok(())
    }
}

fn lock(state: &Mutex<SimulatedState>) -> MutexGuard<'_, SimulatedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Group for SimulatedGroup {
    fn size(&self) -> usize {
        self.size
    }

    fn next_feedback(&mut self, feedback: &mut GroupFeedback, timeout: Duration) -> Result<()> {
        let state = lock(&self.state);
        if !state.online {
            return Err(GroupError::FeedbackTimeout(timeout));
        }
        if feedback.size() != self.size {
            return Err(GroupError::SizeMismatch {
                expected: self.size,
                actual: feedback.size(),
            });
        }
        feedback.position.copy_from(&state.position);
        feedback.velocity.copy_from(&state.velocity);
        feedback.effort.copy_from(&state.effort);
        for orientation in feedback.orientation.iter_mut() {
            *orientation = state.orientation;
        }
        Ok(())
    }

    fn send_command(&mut self, command: &GroupCommand) -> Result<()> {
        self.check_size(command)?;
        let mut state = lock(&self.state);
        if !state.online {
            return Err(GroupError::Disconnected);
        }
        for i in 0..self.size {
            if command.position[i].is_finite() {
                state.position[i] = command.position[i];
            }
            state.velocity[i] = if command.velocity[i].is_finite() {
                command.velocity[i]
            } else {
                0.0
            };
            state.effort[i] = if command.effort[i].is_finite() {
                command.effort[i]
            } else {
                0.0
            };
        }
        if let Some(gains) = &command.gains {
            state.gains = Some(gains.clone());
        }
        state.sent_commands += 1;
        state.last_command = Some(command.clone());
        Ok(())
    }

    fn send_command_with_acknowledgement(
        &mut self,
        command: &GroupCommand,
        timeout: Duration,
    ) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.acknowledgements_to_drop > 0 {
                state.acknowledgements_to_drop -= 1;
                return Err(GroupError::AcknowledgementTimeout(timeout));
            }
        }
        self.send_command(command)
    }

    fn set_command_lifetime(&mut self, lifetime: Duration) -> Result<()> {
        lock(&self.state).command_lifetime = Some(lifetime);
        Ok(())
    }

    fn set_feedback_frequency(&mut self, frequency_hz: f64) -> Result<()> {
        lock(&self.state).feedback_frequency = Some(frequency_hz);
        Ok(())
    }
}

impl SimulatedGroupHandle {
    /// An offline group times out on feedback and rejects commands
    pub fn set_online(&self, online: bool) {
        lock(&self.state).online = online;
    }

    /// The next `count` acknowledged sends will time out
    pub fn drop_acknowledgements(&self, count: usize) {
        lock(&self.state).acknowledgements_to_drop = count;
    }

    /// Orientation reported by every module
    pub fn set_orientation(&self, orientation: na::Quaternion<f64>) {
        lock(&self.state).orientation = orientation;
    }

    pub fn set_position(&self, position: &[f64]) {
        let mut state = lock(&self.state);
        for (current, new) in state.position.iter_mut().zip(position) {
            *current = *new;
        }
    }

    pub fn position(&self) -> na::DVector<f64> {
        lock(&self.state).position.clone()
    }

    pub fn sent_commands(&self) -> usize {
        lock(&self.state).sent_commands
    }

    pub fn last_command(&self) -> Option<GroupCommand> {
        lock(&self.state).last_command.clone()
    }

    pub fn gains(&self) -> Option<Gains> {
        lock(&self.state).gains.clone()
    }

    pub fn command_lifetime(&self) -> Option<Duration> {
        lock(&self.state).command_lifetime
    }

    pub fn feedback_frequency(&self) -> Option<f64> {
        lock(&self.state).feedback_frequency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn group_includes_arm_gains() {
        let gains = Gains::included_arm();
        assert_eq!(gains.module_count(), Some(6));
        gains.check_size(6).unwrap();
    }

    #[test]
    fn group_includes_gripper_gains() {
        let gains = Gains::included_gripper();
        assert_eq!(gains.module_count(), Some(1));
    }

    #[test]
    fn gains_with_wrong_size_are_rejected() {
        let gains = Gains {
            position_kp: Some(vec![1.0, 2.0]),
            ..Default::default()
        };
        assert!(matches!(
            GroupCommand::with_gains(3, gains),
            Err(GroupError::SizeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn empty_gains_skip_serialization() {
        let json = serde_json::to_string(&Gains::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn simulated_group_echoes_commands() {
        let mut group = SimulatedGroup::new(2);
        let mut command = GroupCommand::new(2);
        command.position[0] = 1.5;
        command.velocity[0] = 0.5;
        command.effort[1] = -2.0;
        group.send_command(&command).unwrap();

        let mut feedback = GroupFeedback::new(2);
        group
            .next_feedback(&mut feedback, Duration::from_millis(10))
            .unwrap();
        assert_relative_eq!(feedback.position[0], 1.5);
        // NaN position holds the last one
        assert_relative_eq!(feedback.position[1], 0.0);
        assert_relative_eq!(feedback.velocity[0], 0.5);
        assert_relative_eq!(feedback.velocity[1], 0.0);
        assert_relative_eq!(feedback.effort[1], -2.0);
        assert_eq!(group.handle().sent_commands(), 1);
    }

    #[test]
    fn offline_group_does_not_touch_feedback() {
        let mut group = SimulatedGroup::new(1);
        group.handle().set_position(&[3.0]);
        group.handle().set_online(false);
        let mut feedback = GroupFeedback::new(1);
        let result = group.next_feedback(&mut feedback, Duration::from_millis(5));
        assert!(matches!(result, Err(GroupError::FeedbackTimeout(_))));
        assert_relative_eq!(feedback.position[0], 0.0);
    }

    #[test]
    fn retries_until_acknowledged() {
        let mut group = SimulatedGroup::new(1);
        let handle = group.handle();
        handle.drop_acknowledgements(2);
        let command = GroupCommand::with_gains(1, Gains::included_gripper()).unwrap();
        assert!(send_with_retries(&mut group, &command, 3));
        assert_eq!(handle.gains(), Some(Gains::included_gripper()));
    }

    #[test]
    fn gives_up_after_attempts() {
        let mut group = SimulatedGroup::new(1);
        let handle = group.handle();
        handle.drop_acknowledgements(5);
        let command = GroupCommand::new(1);
        assert!(!send_with_retries(&mut group, &command, 5));
        assert_eq!(handle.sent_commands(), 0);
    }
}
