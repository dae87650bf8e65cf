//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct matching the lumen.yml schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LumenConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Passes allowed per `render_roots` call before the loop guard trips
    #[serde(default = "default_max_reflush_passes")]
    pub max_reflush_passes: usize,
}

fn default_max_reflush_passes() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_reflush_passes: default_max_reflush_passes(),
        }
    }
}

impl LumenConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text; an empty document yields defaults
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LumenConfig = if contents.trim().is_empty() {
            LumenConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_reflush_passes == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_reflush_passes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
