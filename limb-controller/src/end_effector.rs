use crate::arm_config::GripperConfig;
use crate::group::{send_with_retries, Gains, Group, GroupCommand};
use crate::AsAny;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq)]
pub enum GripperError {
    #[error("invalid gripper state {0}")]
    InvalidGripperState(f64),
    #[error("gripper takes a single aux value but got {0}")]
    InvalidAuxLength(usize),
    #[error("gripper group has {0} modules instead of 1")]
    GroupSize(usize),
}

/// Tool at the end of the arm, driven by the aux values of the arm goal
pub trait EndEffector: AsAny + Send {
    /// Returns false if the aux value could not be applied.
    ///
    /// An idle arm passes an empty slice.
    fn update(&mut self, aux: &[f64]) -> bool;

    /// Returns false if the command could not be sent
    fn send(&mut self) -> bool;
}

/// Single module gripper.
///
/// State 0 is fully open and 1 fully closed, values in between blend the two efforts.
pub struct Gripper {
    group: Box<dyn Group>,
    close_effort: f64,
    open_effort: f64,
    state: f64,
    command: GroupCommand,
}

impl Gripper {
    pub fn new(
        group: Box<dyn Group>,
        close_effort: f64,
        open_effort: f64,
    ) -> Result<Gripper, GripperError> {
        if group.size() != 1 {
            return Err(GripperError::GroupSize(group.size()));
        }
        Ok(Gripper {
            group,
            close_effort,
            open_effort,
            state: 0.0,
            command: GroupCommand::new(1),
        })
    }

    pub fn from_config(
        group: Box<dyn Group>,
        config: &GripperConfig,
    ) -> Result<Gripper, GripperError> {
        Gripper::new(group, config.close_effort, config.open_effort)
    }

    /// Sets the state, clamped to `[0, 1]`
    pub fn set_state(&mut self, state: f64) -> Result<(), GripperError> {
        if !state.is_finite() {
            return Err(GripperError::InvalidGripperState(state));
        }
        self.apply(state.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn open(&mut self) {
        self.apply(0.0);
    }

    pub fn close(&mut self) {
        self.apply(1.0);
    }

    /// Switches between fully open and fully closed.
    ///
    /// Does nothing while the gripper is in between.
    pub fn toggle(&mut self) {
        if self.state == 0.0 {
            self.close();
        } else if self.state == 1.0 {
            self.open();
        }
    }

    pub fn state(&self) -> f64 {
        self.state
    }

    pub fn close_effort(&self) -> f64 {
        self.close_effort
    }

    pub fn open_effort(&self) -> f64 {
        self.open_effort
    }

    /// Command that will be sent by [`EndEffector::send`]
    pub fn command(&self) -> &GroupCommand {
        &self.command
    }

    pub fn load_gains(&mut self, gains: &Gains, attempts: usize) -> bool {
        match GroupCommand::with_gains(1, gains.clone()) {
            Ok(command) => send_with_retries(self.group.as_mut(), &command, attempts),
            Err(error) => {
                warn!("Invalid gripper gains: {}", error);
                false
            }
        }
    }

    fn apply(&mut self, state: f64) {
        self.state = state;
        self.command.effort[0] = state * self.close_effort + (1.0 - state) * self.open_effort;
    }
}

impl EndEffector for Gripper {
    fn update(&mut self, aux: &[f64]) -> bool {
        let result = match aux {
            [state] => self.set_state(*state),
            _ => Err(GripperError::InvalidAuxLength(aux.len())),
        };
        match result {
            Ok(()) => true,
            Err(error) => {
                warn!("Failed to update gripper: {}", error);
                false
            }
        }
    }

    fn send(&mut self) -> bool {
        match self.group.send_command(&self.command) {
            Ok(()) => true,
            Err(error) => {
                warn!("Failed to send gripper command: {}", error);
                false
            }
        }
    }
}
