//! Bridge configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `SCRIPTDEV_`
//!
//! ```toml
//! script_path = "demos/microscope.rhai"
//! runtime_path = "demos"
//! log_level = "debug"
//! ```
//!
//! ```text
//! SCRIPTDEV_SCRIPT_PATH=/lab/scripts/stage.py
//! SCRIPTDEV_LOG_LEVEL=trace
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "scriptdev.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or merging a configuration source failed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// A value was read but is not acceptable.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Settings for a script hub and the process it runs in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Device script to load.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
    /// Runtime location (Python executable, or Rhai module directory).
    /// Unset means "use the running or discovered runtime".
    #[serde(default)]
    pub runtime_path: Option<PathBuf>,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            script_path: None,
            runtime_path: None,
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from [`DEFAULT_CONFIG_FILE`] and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    ///
    /// Precedence, highest first: `SCRIPTDEV_` environment variables, the file,
    /// built-in defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCRIPTDEV_"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Paths, when given, are not empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        for (name, path) in [
            ("script_path", &self.script_path),
            ("runtime_path", &self.runtime_path),
        ] {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "'{}' cannot be empty; leave it out instead",
                    name
                )));
            }
        }

        Ok(())
    }
}
