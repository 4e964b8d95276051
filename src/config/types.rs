// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for channel-recorder

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub recordings: RecordingsConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Channel registry persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_channels_file")]
    pub channels_file: PathBuf,

    /// Extra write attempts before the registry is flagged as degraded
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channels_file: default_channels_file(),
            persist_retries: default_persist_retries(),
        }
    }
}

/// Where and how segments are written
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingsConfig {
    #[serde(default = "default_recordings_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_file_extension")]
    pub file_extension: String, // ".ts"

    /// Placeholders: {name}, {timestamp}, {index}, {ext}
    #[serde(default = "default_filename_format")]
    pub filename_format: String,

    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: u64,
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            dir: default_recordings_dir(),
            file_extension: default_file_extension(),
            filename_format: default_filename_format(),
            max_segment_bytes: default_max_segment_bytes(),
        }
    }
}

/// External capture tool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default = "default_program")]
    pub program: String,

    /// `{channel}` is replaced with the channel name
    #[serde(default = "default_url_template")]
    pub url_template: String,

    #[serde(default = "default_quality")]
    pub quality: String, // "best", "720p", ...

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,

    #[serde(default = "default_size_poll_interval")]
    pub size_poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            url_template: default_url_template(),
            quality: default_quality(),
            extra_args: Vec::new(),
            stop_grace_seconds: default_stop_grace(),
            size_poll_interval_ms: default_size_poll_interval(),
        }
    }
}

impl CaptureConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn size_poll_interval(&self) -> Duration {
        Duration::from_millis(self.size_poll_interval_ms)
    }

    pub fn channel_url(&self, channel: &str) -> String {
        self.url_template.replace("{channel}", channel)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Consecutive failures logged at warn before dropping to debug
    #[serde(default = "default_failure_log_threshold")]
    pub failure_log_threshold: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout(),
            max_concurrent: default_max_concurrent(),
            failure_log_threshold: default_failure_log_threshold(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl ControlConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_channels_file() -> PathBuf { PathBuf::from("channels.json") }
fn default_persist_retries() -> u32 { 3 }
fn default_recordings_dir() -> PathBuf { PathBuf::from("recordings") }
fn default_file_extension() -> String { ".ts".to_string() }
fn default_filename_format() -> String { "{name}_{timestamp}_{index}{ext}".to_string() }
fn default_max_segment_bytes() -> u64 { 1_932_735_283 } // 1.8 GiB
fn default_program() -> String { "streamlink".to_string() }
fn default_url_template() -> String { "https://twitch.tv/{channel}".to_string() }
fn default_quality() -> String { "best".to_string() }
fn default_stop_grace() -> u64 { 5 }
fn default_size_poll_interval() -> u64 { 5000 }
fn default_probe_timeout() -> u64 { 10 }
fn default_max_concurrent() -> usize { 4 }
fn default_failure_log_threshold() -> u32 { 3 }
fn default_interval() -> u64 { 60 }
fn default_bind_address() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_log_level() -> String { "info".to_string() }
