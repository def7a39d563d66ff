use limb_controller::arm_config::{ArmConfig, ConfigError};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("unknown config format {0:?}, expected json or yaml")]
    UnknownConfigFormat(String),
    #[error("failed to load config")]
    ConfigError(#[from] ConfigError),
}

/// Loads an arm config, picking the format from the file extension
pub fn load_config(path: &str) -> Result<ArmConfig, SimError> {
    let extension = Path::new(path)
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match extension.as_str() {
        "json" => Ok(ArmConfig::load_json(path)?),
        "yaml" | "yml" => Ok(ArmConfig::load_yaml(path)?),
        _ => Err(SimError::UnknownConfigFormat(path.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_extension() {
        assert!(matches!(
            load_config("arm.toml"),
            Err(SimError::UnknownConfigFormat(_))
        ));
    }

    #[test]
    fn reports_missing_file() {
        assert!(matches!(
            load_config("does/not/exist.yaml"),
            Err(SimError::ConfigError(ConfigError::IoError(_)))
        ));
    }
}
