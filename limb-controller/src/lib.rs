//! Control loop for arms built from networked actuator modules.
//!
//! An [`arm::Arm`] reads feedback from a [`group::Group`], follows a trajectory
//! towards a [`goal::Goal`], compensates for gravity, runs plugins and drives an
//! optional end effector, one tick at a time.

use std::any::Any;

pub mod arm;
pub mod arm_config;
pub mod aux_schedule;
pub mod clock;
pub mod end_effector;
pub mod goal;
pub mod gravity;
pub mod group;
pub mod impedance;
pub mod kinematics;
pub mod plugin;
pub mod trajectory;

/// Lets trait objects be downcast back to their concrete type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
