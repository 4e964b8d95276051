// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse YAML content after substituting environment variables
    pub fn parse(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content);

        let config: RecorderConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${STREAM_QUALITY:-best} -> best (if STREAM_QUALITY not set)
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").unwrap();

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        })
        .to_string()
    }

    /// Apply the flat environment variables the recorder has always honored
    pub fn apply_env_overrides(config: &mut RecorderConfig) -> Result<()> {
        if let Ok(value) = std::env::var("CHANNELS_FILE") {
            config.registry.channels_file = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("RECORDINGS_DIR") {
            config.recordings.dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("FILE_EXTENSION") {
            config.recordings.file_extension = value;
        }
        if let Ok(value) = std::env::var("FILENAME_FORMAT") {
            config.recordings.filename_format = value;
        }
        if let Ok(value) = std::env::var("STREAM_QUALITY") {
            config.capture.quality = value;
        }
        if let Ok(value) = std::env::var("CHECK_INTERVAL") {
            config.scheduler.interval_seconds = value
                .trim()
                .parse()
                .context("CHECK_INTERVAL must be a number of seconds")?;
        }
        if let Ok(value) = std::env::var("PORT") {
            config.control.port = value.trim().parse().context("PORT must be a port number")?;
        }
        if let Ok(value) = std::env::var("MAX_FILE_SIZE") {
            // Accept "1932735283" as well as "1932735283.2"
            let bytes: f64 = value
                .trim()
                .parse()
                .context("MAX_FILE_SIZE must be a size in bytes")?;
            if !bytes.is_finite() || bytes < 0.0 {
                bail!("MAX_FILE_SIZE must be a positive size in bytes");
            }
            config.recordings.max_segment_bytes = bytes as u64;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(config: &RecorderConfig) -> Result<()> {
        if config.recordings.max_segment_bytes == 0 {
            bail!("recordings.max_segment_bytes must be > 0");
        }

        if !config.recordings.filename_format.contains("{index}") {
            bail!("recordings.filename_format must contain {{index}} so segments get distinct paths");
        }

        if config.scheduler.interval_seconds == 0 {
            bail!("scheduler.interval_seconds must be > 0");
        }

        if config.capture.size_poll_interval_ms == 0
            || config.capture.size_poll_interval() >= config.scheduler.interval()
        {
            bail!("capture.size_poll_interval_ms must be > 0 and shorter than the scheduler interval");
        }

        if config.probe.max_concurrent == 0 {
            bail!("probe.max_concurrent must be > 0");
        }

        if config.probe.timeout_seconds == 0 {
            bail!("probe.timeout_seconds must be > 0");
        }

        if config.capture.program.is_empty() {
            bail!("capture.program cannot be empty");
        }

        if !config.capture.url_template.contains("{channel}") {
            bail!("capture.url_template must contain {{channel}}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("CR_TEST_VAR", "test_value");

        let input = "quality: ${CR_TEST_VAR}";
        let output = ConfigLoader::substitute_env_vars(input);
        assert_eq!(output, "quality: test_value");

        std::env::remove_var("CR_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("CR_TEST_VAR2");

        let input = "quality: ${CR_TEST_VAR2:-720p}";
        let output = ConfigLoader::substitute_env_vars(input);
        assert_eq!(output, "quality: 720p");
    }

    #[test]
    fn test_validation_invalid_segment_size() {
        let mut config = RecorderConfig::default();
        config.recordings.max_segment_bytes = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_segment_bytes"));
    }

    #[test]
    fn test_validation_filename_without_index() {
        let mut config = RecorderConfig::default();
        config.recordings.filename_format = "{name}_{timestamp}{ext}".to_string();

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("{index}"));
    }

    #[test]
    fn test_validation_poll_slower_than_tick() {
        let mut config = RecorderConfig::default();
        config.scheduler.interval_seconds = 5;
        config.capture.size_poll_interval_ms = 5000;

        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigLoader::validate(&RecorderConfig::default()).is_ok());
    }
}
