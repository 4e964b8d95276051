// Configuration module for channel-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
///
/// A missing file is not an error: defaults are used and then overridden
/// from the environment.
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = if path.as_ref().exists() {
        load_config(path)?
    } else {
        RecorderConfig::default()
    };

    ConfigLoader::apply_env_overrides(&mut config)?;
    ConfigLoader::validate(&config).context("Invalid configuration after environment overrides")?;

    Ok(config)
}
