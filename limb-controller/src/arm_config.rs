use crate::kinematics::{KinematicsError, Link, SerialChain};
use lazy_static::lazy_static;
use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::{fs, str, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error while accessing config file")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    JsonError(#[from] serde_json::Error),
    #[error("error while parsing yaml")]
    YamlError(#[from] serde_yaml::Error),
    #[error("invalid kinematic chain")]
    KinematicsError(#[from] KinematicsError),
}

type Result<T> = std::result::Result<T, ConfigError>;

lazy_static! {
    static ref INCLUDED_ARM_CONFIG: ArmConfig = {
        let json = include_str!("../config/arm.json");
        ArmConfig::parse_json(json).unwrap()
    };
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JointLimits {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl JointLimits {
    pub fn min(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.min)
    }

    pub fn max(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.max)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GripperConfig {
    pub close_effort: f64,
    pub open_effort: f64,
}

/// Gains ordered x, y, z, roll, pitch, yaw
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImpedanceConfig {
    pub spring_gains: [f64; 6],
    pub damper_gains: [f64; 6],
    #[serde(default)]
    pub gains_in_end_effector_frame: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArmConfig {
    /// control loop rate in Hz
    pub control_frequency: f64,
    pub command_lifetime_ms: u64,
    pub feedback_timeout_ms: u64,
    pub links: Vec<Link>,
    /// tip offset from the output of the last joint
    pub end_effector: Vector3<f64>,
    #[serde(default)]
    pub payload_mass: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joint_limits: Option<JointLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gripper: Option<GripperConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impedance: Option<ImpedanceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort_offset: Option<Vec<f64>>,
}

impl ArmConfig {
    /// Arm configuration with default values
    pub fn default() -> ArmConfig {
        ArmConfig {
            control_frequency: 100.0,
            command_lifetime_ms: 100,
            feedback_timeout_ms: 100,
            links: vec![],
            end_effector: Vector3::new(0.0, 0.0, 0.0),
            payload_mass: 0.0,
            joint_limits: None,
            gripper: None,
            impedance: None,
            effort_offset: None,
        }
    }

    /// Configuration for the demo arm.
    ///
    /// This file is packaged with the binary
    pub fn included() -> ArmConfig {
        INCLUDED_ARM_CONFIG.clone()
    }

    pub fn dof_count(&self) -> usize {
        self.links.len()
    }

    pub fn command_lifetime(&self) -> Duration {
        Duration::from_millis(self.command_lifetime_ms)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback_timeout_ms)
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.control_frequency)
    }

    pub fn robot_model(&self) -> Result<SerialChain> {
        let chain = SerialChain::new(self.links.clone(), self.end_effector, self.payload_mass)?;
        Ok(chain)
    }

    pub fn parse_json(text: &str) -> Result<ArmConfig> {
        let config: ArmConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<ArmConfig> {
        let config: ArmConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn serialize_to_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(json)
    }

    pub fn serialize_to_yaml(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(yaml)
    }

    pub fn save_json(&self, path: &str) -> Result<()> {
        fs::write(path, self.serialize_to_json()?)?;
        Ok(())
    }

    pub fn save_yaml(&self, path: &str) -> Result<()> {
        fs::write(path, self.serialize_to_yaml()?)?;
        Ok(())
    }

    pub fn load_json(path: &str) -> Result<ArmConfig> {
        let text = fs::read_to_string(path)?;
        let config = ArmConfig::parse_json(&text)?;
        Ok(config)
    }

    pub fn load_yaml(path: &str) -> Result<ArmConfig> {
        let text = fs::read_to_string(path)?;
        let config = ArmConfig::parse_yaml(&text)?;
        Ok(config)
    }
}
