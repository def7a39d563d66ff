use crate::arm_config::ArmConfig;
use crate::aux_schedule::{AuxSchedule, AuxScheduleError};
use crate::clock::Clock;
use crate::end_effector::EndEffector;
use crate::goal::{Goal, GoalError};
use crate::gravity::gravity_compensation_efforts;
use crate::group::{send_with_retries, Gains, Group, GroupCommand, GroupError, GroupFeedback};
use crate::kinematics::{EndEffectorFrame, IkObjective, KinematicsError, RobotModel};
use crate::plugin::{ArmPlugin, ArmState, PluginError, PluginId};
use crate::trajectory::{
    HermiteTrajectoryFactory, Trajectory, TrajectoryError, TrajectoryFactory, TrajectoryState,
};
use nalgebra as na;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of times [`Arm::create`] asks the group for feedback before giving up
pub const FEEDBACK_ATTEMPTS: usize = 10;

const DEFAULT_FEEDBACK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ArmError {
    #[error("group has {group} modules but the robot model has {model} joints")]
    SizeMismatch { group: usize, model: usize },
    #[error("no feedback from the group after {0} attempts")]
    NoFeedback(usize),
    #[error("expected {expected} joint values but got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("joint limits must not be NaN")]
    InvalidJointLimits,
    #[error("goal error")]
    GoalError(#[from] GoalError),
    #[error("trajectory error")]
    TrajectoryError(#[from] TrajectoryError),
    #[error("aux schedule error")]
    AuxScheduleError(#[from] AuxScheduleError),
    #[error("kinematics error")]
    KinematicsError(#[from] KinematicsError),
    #[error("plugin error")]
    PluginError(#[from] PluginError),
    #[error("group error")]
    GroupError(#[from] GroupError),
}

type Result<T> = std::result::Result<T, ArmError>;

struct ActiveGoal {
    trajectory: Box<dyn Trajectory>,
    start_time: f64,
}

impl ActiveGoal {
    /// Time since the goal was set, clamped to the trajectory
    fn elapsed(&self, now: f64) -> f64 {
        (now - self.start_time)
            .max(0.0)
            .min(self.trajectory.duration())
    }
}

/// Arm control loop.
///
/// Call [`Arm::update`] and then [`Arm::send`] once per control tick.
/// Between ticks the arm either holds no goal and only compensates for gravity,
/// or follows the trajectory created by the last [`Arm::set_goal`].
pub struct Arm {
    clock: Box<dyn Clock>,
    group: Box<dyn Group>,
    robot_model: Box<dyn RobotModel>,
    trajectory_factory: Box<dyn TrajectoryFactory>,
    end_effector: Option<Box<dyn EndEffector>>,
    plugins: Vec<Box<dyn ArmPlugin>>,
    pending_command: GroupCommand,
    last_feedback: GroupFeedback,
    feedback_scratch: GroupFeedback,
    feedback_timeout: Duration,
    active_goal: Option<ActiveGoal>,
    aux: AuxSchedule,
    aux_in_effect: Vec<f64>,
    joint_limits: Option<(na::DVector<f64>, na::DVector<f64>)>,
    last_time: f64,
}

impl Arm {
    pub fn new(
        mut clock: Box<dyn Clock>,
        group: Box<dyn Group>,
        robot_model: Box<dyn RobotModel>,
    ) -> Result<Arm> {
        let size = group.size();
        if size != robot_model.dof_count() {
            return Err(ArmError::SizeMismatch {
                group: size,
                model: robot_model.dof_count(),
            });
        }
        let last_time = clock.now();
        Ok(Arm {
            clock,
            group,
            robot_model,
            trajectory_factory: Box::new(HermiteTrajectoryFactory),
            end_effector: None,
            plugins: vec![],
            pending_command: GroupCommand::new(size),
            last_feedback: GroupFeedback::new(size),
            feedback_scratch: GroupFeedback::new(size),
            feedback_timeout: DEFAULT_FEEDBACK_TIMEOUT,
            active_goal: None,
            aux: AuxSchedule::new(),
            aux_in_effect: vec![],
            joint_limits: None,
            last_time,
        })
    }

    /// Configures the group and waits until it reports feedback
    pub fn create(
        config: &ArmConfig,
        clock: Box<dyn Clock>,
        mut group: Box<dyn Group>,
        robot_model: Box<dyn RobotModel>,
    ) -> Result<Arm> {
        group.set_command_lifetime(config.command_lifetime())?;
        group.set_feedback_frequency(config.control_frequency)?;
        let mut arm = Arm::new(clock, group, robot_model)?;
        arm.feedback_timeout = config.feedback_timeout();

        let mut received = false;
        for attempt in 1..=FEEDBACK_ATTEMPTS {
            match arm
                .group
                .next_feedback(&mut arm.last_feedback, arm.feedback_timeout)
            {
                Ok(()) => {
                    received = true;
                    break;
                }
                Err(error) => debug!("Feedback attempt {} failed: {}", attempt, error),
            }
        }
        if !received {
            return Err(ArmError::NoFeedback(FEEDBACK_ATTEMPTS));
        }

        if let Some(limits) = &config.joint_limits {
            arm.set_joint_limits(&limits.min(), &limits.max())?;
        }
        info!("Arm with {} joints is ready", arm.size());
        Ok(arm)
    }

    /// Reads feedback and computes the next command.
    ///
    /// Returns false if the clock went backwards, no feedback arrived
    /// or the end effector rejected its aux value. A gripper rejects the
    /// empty aux of an idle arm or of a goal without aux.
    pub fn update(&mut self) -> bool {
        let now = self.clock.now();
        if now < self.last_time {
            debug!(
                "Clock went backwards from {} to {}, skipping tick",
                self.last_time, now
            );
            return false;
        }
        self.last_time = now;

        if let Err(error) = self
            .group
            .next_feedback(&mut self.feedback_scratch, self.feedback_timeout)
        {
            warn!("Failed to receive feedback: {}", error);
            return false;
        }
        std::mem::swap(&mut self.last_feedback, &mut self.feedback_scratch);

        let aux: &[f64] = match &self.active_goal {
            Some(active) => {
                let elapsed = active.elapsed(now);
                let state = active.trajectory.state(elapsed);
                self.pending_command.position.copy_from(&state.position);
                self.pending_command.velocity.copy_from(&state.velocity);
                self.aux.get_aux(elapsed)
            }
            None => {
                self.pending_command.position.fill(f64::NAN);
                self.pending_command.velocity.fill(f64::NAN);
                &[]
            }
        };
        self.aux_in_effect.clear();
        self.aux_in_effect.extend_from_slice(aux);

        self.pending_command.effort =
            gravity_compensation_efforts(&*self.robot_model, &self.last_feedback);

        let mut state = ArmState {
            robot_model: &*self.robot_model,
            last_feedback: &self.last_feedback,
            pending_command: &mut self.pending_command,
        };
        for (index, plugin) in self.plugins.iter_mut().enumerate() {
            if plugin.enabled() && !plugin.update(&mut state) {
                warn!("Plugin {} failed to update", index);
            }
        }

        match self.end_effector.as_mut() {
            Some(end_effector) => end_effector.update(aux),
            None => true,
        }
    }

    /// Sends the pending command to the group and the end effector
    pub fn send(&mut self) -> bool {
        let mut result = match self.group.send_command(&self.pending_command) {
            Ok(()) => true,
            Err(error) => {
                warn!("Failed to send arm command: {}", error);
                false
            }
        };
        if let Some(end_effector) = self.end_effector.as_mut() {
            result = end_effector.send() && result;
        }
        result
    }

    /// Starts moving towards `goal`.
    ///
    /// The trajectory starts at the current feedback, or at the current setpoint
    /// of the goal being replaced. The arm is left untouched on error.
    pub fn set_goal(&mut self, goal: &Goal) -> Result<()> {
        let dof = self.size();
        if goal.dof_count() != dof {
            return Err(ArmError::DimensionMismatch {
                expected: dof,
                actual: goal.dof_count(),
            });
        }
        let built = goal.build()?;

        let start = match &self.active_goal {
            Some(active) => active.trajectory.state(active.elapsed(self.last_time)),
            None => TrajectoryState {
                position: self.last_feedback.position.clone(),
                velocity: self.last_feedback.velocity.clone(),
                acceleration: na::DVector::zeros(dof),
            },
        };

        let count = built.times.len() + 1;
        let times = na::DVector::from_fn(count, |index, _| {
            if index == 0 {
                0.0
            } else {
                built.times[index - 1]
            }
        });
        let prepend = |first: &na::DVector<f64>, rest: &na::DMatrix<f64>| {
            let mut matrix = na::DMatrix::zeros(dof, count);
            matrix.set_column(0, first);
            matrix.columns_mut(1, count - 1).copy_from(rest);
            matrix
        };
        let trajectory = self.trajectory_factory.create(
            &times,
            &prepend(&start.position, &built.positions),
            &prepend(&start.velocity, &built.velocities),
            &prepend(&start.acceleration, &built.accelerations),
        )?;

        let aux = match &built.aux {
            Some(goal_aux) => {
                // hold the current aux until the first waypoint if it has the same shape
                let first = match goal_aux.first() {
                    Some(first) if first.len() != self.aux_in_effect.len() => first.clone(),
                    _ => self.aux_in_effect.clone(),
                };
                let values = std::iter::once(first)
                    .chain(goal_aux.iter().cloned())
                    .collect();
                AuxSchedule::from_samples(times.iter().copied().collect(), values)?
            }
            None => AuxSchedule::new(),
        };

        info!(
            "New goal with {} waypoints over {:.2}s",
            count - 1,
            trajectory.duration()
        );
        self.aux = aux;
        self.active_goal = Some(ActiveGoal {
            trajectory,
            start_time: self.last_time,
        });
        Ok(())
    }

    /// Stops following the current goal
    pub fn cancel_goal(&mut self) {
        if self.active_goal.take().is_some() {
            info!("Goal cancelled");
        }
    }

    /// Fraction of the current goal that has elapsed, 0 without a goal
    pub fn goal_progress(&self) -> f64 {
        match &self.active_goal {
            Some(active) => {
                let duration = active.trajectory.duration();
                if duration <= 0.0 {
                    1.0
                } else {
                    active.elapsed(self.last_time) / duration
                }
            }
            None => 0.0,
        }
    }

    pub fn at_goal(&self) -> bool {
        self.goal_progress() >= 1.0
    }

    /// Replaces the aux schedule with `values` from now on.
    ///
    /// An empty slice clears the schedule.
    pub fn set_aux_state(&mut self, values: &[f64]) {
        if values.is_empty() {
            self.aux.clear();
            return;
        }
        let time = self
            .active_goal
            .as_ref()
            .map(|active| active.elapsed(self.last_time))
            .unwrap_or(0.0);
        self.aux = AuxSchedule::single(time, values.to_vec());
    }

    /// Aux value at `time` seconds after the start of the current goal
    pub fn get_aux(&self, time: f64) -> &[f64] {
        self.aux.get_aux(time)
    }

    /// Adds a plugin that runs after all previously added plugins
    pub fn add_plugin(&mut self, mut plugin: Box<dyn ArmPlugin>) -> Result<PluginId> {
        plugin.set_enabled(true);
        plugin.on_associated(&*self.robot_model)?;
        self.plugins.push(plugin);
        Ok(PluginId(self.plugins.len() - 1))
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn plugin<P: ArmPlugin>(&self, id: PluginId) -> Option<&P> {
        self.plugins
            .get(id.0)
            .and_then(|plugin| (**plugin).as_any().downcast_ref::<P>())
    }

    pub fn plugin_mut<P: ArmPlugin>(&mut self, id: PluginId) -> Option<&mut P> {
        self.plugins
            .get_mut(id.0)
            .and_then(|plugin| (**plugin).as_any_mut().downcast_mut::<P>())
    }

    /// First plugin of type `P`
    pub fn find_plugin_mut<P: ArmPlugin>(&mut self) -> Option<&mut P> {
        self.plugins
            .iter_mut()
            .find_map(|plugin| (**plugin).as_any_mut().downcast_mut::<P>())
    }

    /// Replaces the end effector, returning the previous one
    pub fn set_end_effector(
        &mut self,
        end_effector: Box<dyn EndEffector>,
    ) -> Option<Box<dyn EndEffector>> {
        self.end_effector.replace(end_effector)
    }

    pub fn take_end_effector(&mut self) -> Option<Box<dyn EndEffector>> {
        self.end_effector.take()
    }

    pub fn end_effector(&self) -> Option<&dyn EndEffector> {
        self.end_effector.as_deref()
    }

    pub fn end_effector_mut<E: EndEffector>(&mut self) -> Option<&mut E> {
        self.end_effector
            .as_mut()
            .and_then(|end_effector| (**end_effector).as_any_mut().downcast_mut::<E>())
    }

    pub fn set_joint_limits(
        &mut self,
        min: &na::DVector<f64>,
        max: &na::DVector<f64>,
    ) -> Result<()> {
        let dof = self.size();
        for limits in [min, max] {
            if limits.len() != dof {
                return Err(ArmError::DimensionMismatch {
                    expected: dof,
                    actual: limits.len(),
                });
            }
        }
        if min.iter().chain(max.iter()).any(|value| value.is_nan()) {
            return Err(ArmError::InvalidJointLimits);
        }
        self.joint_limits = Some((min.clone(), max.clone()));
        Ok(())
    }

    pub fn clear_joint_limits(&mut self) {
        self.joint_limits = None;
    }

    pub fn joint_limits(&self) -> Option<(&na::DVector<f64>, &na::DVector<f64>)> {
        self.joint_limits.as_ref().map(|(min, max)| (min, max))
    }

    /// End effector frame at `positions`
    pub fn fk(&self, positions: &na::DVector<f64>) -> Result<EndEffectorFrame> {
        self.check_dimension(positions)?;
        Ok(self.robot_model.end_effector(positions).into())
    }

    pub fn ik_target_xyz(
        &self,
        initial_positions: &na::DVector<f64>,
        target_xyz: &na::Vector3<f64>,
    ) -> Result<na::DVector<f64>> {
        self.solve_ik(
            initial_positions,
            vec![IkObjective::EndEffectorPosition(*target_xyz)],
        )
    }

    pub fn ik_target_xyz_tip_axis(
        &self,
        initial_positions: &na::DVector<f64>,
        target_xyz: &na::Vector3<f64>,
        tip_axis: &na::Vector3<f64>,
    ) -> Result<na::DVector<f64>> {
        self.solve_ik(
            initial_positions,
            vec![
                IkObjective::EndEffectorPosition(*target_xyz),
                IkObjective::TipAxis(*tip_axis),
            ],
        )
    }

    pub fn ik_target_xyz_so3(
        &self,
        initial_positions: &na::DVector<f64>,
        target_xyz: &na::Vector3<f64>,
        orientation: &na::Rotation3<f64>,
    ) -> Result<na::DVector<f64>> {
        self.solve_ik(
            initial_positions,
            vec![
                IkObjective::EndEffectorPosition(*target_xyz),
                IkObjective::EndEffectorSo3(*orientation),
            ],
        )
    }

    fn solve_ik(
        &self,
        initial_positions: &na::DVector<f64>,
        mut objectives: Vec<IkObjective>,
    ) -> Result<na::DVector<f64>> {
        self.check_dimension(initial_positions)?;
        if let Some((min, max)) = &self.joint_limits {
            objectives.push(IkObjective::JointLimits {
                min: min.clone(),
                max: max.clone(),
            });
        }
        let solution = self
            .robot_model
            .solve_inverse_kinematics(initial_positions, &objectives)?;
        Ok(solution)
    }

    /// Sends gains to every joint, retrying until acknowledged
    pub fn load_gains(&mut self, gains: &Gains, attempts: usize) -> bool {
        let command = match GroupCommand::with_gains(self.size(), gains.clone()) {
            Ok(command) => command,
            Err(error) => {
                warn!("Invalid arm gains: {}", error);
                return false;
            }
        };
        let loaded = send_with_retries(&mut *self.group, &command, attempts);
        if loaded {
            info!("Loaded gains for {} joints", self.size());
        }
        loaded
    }

    pub fn set_trajectory_factory(&mut self, trajectory_factory: Box<dyn TrajectoryFactory>) {
        self.trajectory_factory = trajectory_factory;
    }

    pub fn set_feedback_timeout(&mut self, timeout: Duration) {
        self.feedback_timeout = timeout;
    }

    pub fn size(&self) -> usize {
        self.pending_command.size()
    }

    pub fn group(&self) -> &dyn Group {
        &*self.group
    }

    pub fn robot_model(&self) -> &dyn RobotModel {
        &*self.robot_model
    }

    pub fn robot_model_mut(&mut self) -> &mut dyn RobotModel {
        &mut *self.robot_model
    }

    pub fn trajectory(&self) -> Option<&dyn Trajectory> {
        self.active_goal
            .as_ref()
            .map(|active| &*active.trajectory)
    }

    pub fn pending_command(&self) -> &GroupCommand {
        &self.pending_command
    }

    pub fn last_feedback(&self) -> &GroupFeedback {
        &self.last_feedback
    }

    pub fn last_time(&self) -> f64 {
        self.last_time
    }

    fn check_dimension(&self, positions: &na::DVector<f64>) -> Result<()> {
        if positions.len() != self.size() {
            return Err(ArmError::DimensionMismatch {
                expected: self.size(),
                actual: positions.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::end_effector::Gripper;
    use crate::goal::Waypoint;
    use crate::group::{SimulatedGroup, SimulatedGroupHandle};
    use crate::kinematics::{Link, SerialChain};
    use crate::plugin::EffortOffset;
    use approx::assert_relative_eq;

    fn chain(dof: usize) -> SerialChain {
        let links = (0..dof)
            .map(|_| {
                Link::new(
                    na::Vector3::new(0.0, 0.0, 0.1),
                    na::Vector3::y(),
                    0.2,
                    na::Vector3::new(0.05, 0.0, 0.0),
                )
            })
            .collect();
        SerialChain::new(links, na::Vector3::new(0.1, 0.0, 0.0), 0.0).unwrap()
    }

    fn arm(dof: usize) -> (Arm, ManualClock, SimulatedGroupHandle) {
        let clock = ManualClock::new(0.0);
        let group = SimulatedGroup::new(dof);
        let handle = group.handle();
        let arm = Arm::new(Box::new(clock.clone()), Box::new(group), Box::new(chain(dof))).unwrap();
        (arm, clock, handle)
    }

    #[test]
    fn rejects_mismatched_model() {
        let result = Arm::new(
            Box::new(ManualClock::new(0.0)),
            Box::new(SimulatedGroup::new(2)),
            Box::new(chain(3)),
        );
        assert!(matches!(
            result,
            Err(ArmError::SizeMismatch { group: 2, model: 3 })
        ));
    }

    #[test]
    fn create_configures_group() {
        let mut config = ArmConfig::default();
        config.links = chain(2).links().to_vec();
        config.command_lifetime_ms = 250;
        let group = SimulatedGroup::new(2);
        let handle = group.handle();
        let arm = Arm::create(
            &config,
            Box::new(ManualClock::new(0.0)),
            Box::new(group),
            Box::new(config.robot_model().unwrap()),
        )
        .unwrap();
        assert_eq!(arm.size(), 2);
        assert_eq!(handle.command_lifetime(), Some(Duration::from_millis(250)));
        assert_eq!(handle.feedback_frequency(), Some(100.0));
    }

    #[test]
    fn create_fails_without_feedback() {
        let group = SimulatedGroup::new(1);
        group.handle().set_online(false);
        let mut config = ArmConfig::default();
        config.links = chain(1).links().to_vec();
        let result = Arm::create(
            &config,
            Box::new(ManualClock::new(0.0)),
            Box::new(group),
            Box::new(chain(1)),
        );
        assert!(matches!(result, Err(ArmError::NoFeedback(FEEDBACK_ATTEMPTS))));
    }

    #[test]
    fn idle_arm_commands_nothing_but_gravity() {
        let (mut arm, _, _) = arm(2);
        assert!(arm.update());
        assert!(arm.pending_command().position.iter().all(|p| p.is_nan()));
        assert!(arm.pending_command().velocity.iter().all(|v| v.is_nan()));
        assert!(arm.pending_command().effort.iter().all(|e| e.is_finite()));
        assert!(arm.send());
    }

    #[test]
    fn update_fails_without_feedback() {
        let (mut arm, _, handle) = arm(2);
        handle.set_online(false);
        assert!(!arm.update());
        assert!(!arm.send());
    }

    #[test]
    fn clock_going_backwards_skips_tick() {
        let (mut arm, clock, _) = arm(1);
        clock.set(1.0);
        assert!(arm.update());
        clock.set(0.5);
        assert!(!arm.update());
        assert_relative_eq!(arm.last_time(), 1.0);
    }

    #[test]
    fn goal_progress() {
        let (mut arm, clock, _) = arm(1);
        assert_relative_eq!(arm.goal_progress(), 0.0);
        arm.update();
        let mut goal = Goal::new(1);
        goal.add_waypoint(Waypoint::new().position(&[1.0]).at(2.0))
            .unwrap();
        arm.set_goal(&goal).unwrap();
        assert_relative_eq!(arm.goal_progress(), 0.0);
        clock.advance(1.0);
        arm.update();
        assert_relative_eq!(arm.goal_progress(), 0.5);
        assert!(!arm.at_goal());
        clock.advance(5.0);
        arm.update();
        assert!(arm.at_goal());
        assert_relative_eq!(arm.pending_command().position[0], 1.0, epsilon = 1e-9);
        arm.cancel_goal();
        assert_relative_eq!(arm.goal_progress(), 0.0);
    }

    #[test]
    fn set_goal_checks_dimension() {
        let (mut arm, _, _) = arm(2);
        let mut goal = Goal::new(3);
        goal.add_waypoint(Waypoint::new().position(&[1.0, 0.0, 0.0]))
            .unwrap();
        assert!(matches!(
            arm.set_goal(&goal),
            Err(ArmError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(arm.trajectory().is_none());
    }

    #[test]
    fn plugins_are_downcast() {
        let (mut arm, _, _) = arm(2);
        let id = arm.add_plugin(Box::new(EffortOffset::uniform(1.0))).unwrap();
        assert!(arm.plugin::<EffortOffset>(id).is_some());
        assert!(arm.plugin::<crate::impedance::ImpedanceController>(id).is_none());
        arm.plugin_mut::<EffortOffset>(id).unwrap().set_enabled(false);
        assert!(!arm.plugin::<EffortOffset>(id).unwrap().enabled());
        assert!(arm.find_plugin_mut::<EffortOffset>().is_some());
    }

    #[test]
    fn disabled_plugin_is_skipped() {
        let (mut arm, _, _) = arm(1);
        arm.update();
        let gravity = arm.pending_command().effort[0];
        let id = arm.add_plugin(Box::new(EffortOffset::uniform(1.0))).unwrap();
        arm.update();
        assert_relative_eq!(arm.pending_command().effort[0], gravity + 1.0);
        arm.plugin_mut::<EffortOffset>(id).unwrap().set_enabled(false);
        arm.update();
        assert_relative_eq!(arm.pending_command().effort[0], gravity);
    }

    #[test]
    fn rejected_plugin_is_not_added() {
        let (mut arm, _, _) = arm(2);
        assert!(arm
            .add_plugin(Box::new(EffortOffset::per_joint(&[1.0])))
            .is_err());
        assert_eq!(arm.plugin_count(), 0);
    }

    #[test]
    fn end_effector_follows_aux() {
        let (mut arm, clock, _) = arm(1);
        let gripper = Gripper::new(Box::new(SimulatedGroup::new(1)), -5.0, 1.0).unwrap();
        arm.set_end_effector(Box::new(gripper));
        arm.update();

        let mut goal = Goal::new(1);
        goal.add_waypoint(Waypoint::new().position(&[0.5]).aux(&[1.0]))
            .unwrap();
        arm.set_goal(&goal).unwrap();
        clock.advance(2.0);
        assert!(arm.update());
        assert_relative_eq!(arm.end_effector_mut::<Gripper>().unwrap().state(), 1.0);
        assert!(arm.send());

        arm.set_aux_state(&[0.5, 0.5]);
        assert!(!arm.update());
        assert!(arm.take_end_effector().is_some());
        assert!(arm.update());
    }

    #[test]
    fn idle_arm_with_gripper_fails_update() {
        let (mut arm, _, _) = arm(1);
        let gripper = Gripper::new(Box::new(SimulatedGroup::new(1)), -5.0, 1.0).unwrap();
        arm.set_end_effector(Box::new(gripper));
        assert!(!arm.update());
        assert!(arm.pending_command().position[0].is_nan());
        assert!(arm.pending_command().effort[0].is_finite());

        let mut goal = Goal::new(1);
        goal.add_waypoint(Waypoint::new().position(&[0.5])).unwrap();
        arm.set_goal(&goal).unwrap();
        assert!(!arm.update());

        arm.take_end_effector();
        assert!(arm.update());
    }

    #[test]
    fn joint_limits_are_validated() {
        let (mut arm, _, _) = arm(2);
        assert!(arm
            .set_joint_limits(&na::DVector::zeros(1), &na::DVector::zeros(2))
            .is_err());
        assert!(matches!(
            arm.set_joint_limits(
                &na::DVector::from_vec(vec![f64::NAN, 0.0]),
                &na::DVector::zeros(2)
            ),
            Err(ArmError::InvalidJointLimits)
        ));
        arm.set_joint_limits(
            &na::DVector::from_vec(vec![-1.0, -1.0]),
            &na::DVector::from_vec(vec![1.0, 1.0]),
        )
        .unwrap();
        assert!(arm.joint_limits().is_some());
        arm.clear_joint_limits();
        assert!(arm.joint_limits().is_none());
    }

    #[test]
    fn ik_round_trips_through_fk() {
        let (arm, _, _) = arm(3);
        let reachable = na::DVector::from_vec(vec![0.2, -0.3, 0.4]);
        let target = arm.fk(&reachable).unwrap().xyz;
        let solution = arm
            .ik_target_xyz(&na::DVector::from_vec(vec![0.1, -0.1, 0.1]), &target)
            .unwrap();
        assert_relative_eq!(arm.fk(&solution).unwrap().xyz, target, epsilon = 1e-4);
        assert!(arm.fk(&na::DVector::zeros(2)).is_err());
    }

    #[test]
    fn load_gains_reports_failure() {
        let (mut arm, _, handle) = arm(6);
        assert!(arm.load_gains(&Gains::included_arm(), 3));
        assert_eq!(handle.gains(), Some(Gains::included_arm()));
        handle.drop_acknowledgements(5);
        assert!(!arm.load_gains(&Gains::included_arm(), 3));
        assert!(!arm.load_gains(&Gains::included_gripper(), 3));
    }
}
