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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RecorderError, RecorderResult};

/// Command types for channel control
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelCommand {
    Add,
    Remove,
    Pause,
    Resume,
    List,
    Get,
    Segments,
}

/// Channel status
///
/// `Online` is transient: a channel found online is promoted to `Recording`
/// in the same transition, and only stays `Online` when the capture process
/// could not be spawned. `Stopped` is only ever reported for a removed channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Idle,
    Online,
    Recording,
    Paused,
    Stopped,
}

impl ChannelStatus {
    /// Whether the scheduler should probe a channel in this status.
    pub fn is_pollable(self) -> bool {
        !matches!(self, ChannelStatus::Paused | ChannelStatus::Stopped)
    }
}

/// Persisted channel record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub status: ChannelStatus,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub segment_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_recording_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_online_at: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(name: String) -> Self {
        Self {
            name,
            status: ChannelStatus::Idle,
            paused: false,
            segment_index: 0,
            current_recording_path: None,
            session_id: None,
            session_started_at: None,
            last_online_at: None,
            added_at: Utc::now(),
        }
    }

    /// Normalize a record loaded from disk.
    ///
    /// Nothing is capturing at startup, so an in-progress recording becomes
    /// `Idle` and its last segment is left sealed as-is.
    pub fn recovered(mut self) -> Self {
        self.status = if self.paused {
            ChannelStatus::Paused
        } else {
            ChannelStatus::Idle
        };
        self.current_recording_path = None;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.status == ChannelStatus::Recording
    }
}

/// Segment status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Active,
    Sealed,
}

/// One output file of a recording session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub status: SegmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Request message for channel control operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub command: ChannelCommand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl ChannelRequest {
    pub fn new(command: ChannelCommand, channel: Option<&str>) -> Self {
        Self {
            command,
            channel: channel.map(str::to_string),
        }
    }
}

/// Response message for channel control operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub degraded_persistence: bool,
    /// Bytes free in the recordings directory (`list` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_space_bytes: Option<u64>,
}

impl ChannelResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            channel: None,
            channels: vec![],
            segments: vec![],
            degraded_persistence: false,
            free_space_bytes: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(message)
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_free_space(mut self, free_space_bytes: Option<u64>) -> Self {
        self.free_space_bytes = free_space_bytes;
        self
    }
}

/// Trim and lowercase a channel name, rejecting anything that is not a
/// single safe path component.
pub fn normalize_channel_name(raw: &str) -> RecorderResult<String> {
    let name = raw.trim().to_lowercase();
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(name)
    } else {
        Err(RecorderError::InvalidChannelName(raw.to_string()))
    }
}
