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

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the recorder core.
///
/// Command-level errors (`DuplicateChannel`, `NotFound`, `InvalidChannelName`,
/// `SegmentActive`) go straight back to the caller. The rest are produced by
/// background work and are logged rather than propagated out of the loops.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("channel '{0}' is already registered")]
    DuplicateChannel(String),

    #[error("channel '{0}' not found")]
    NotFound(String),

    #[error("invalid channel name '{0}'")]
    InvalidChannelName(String),

    #[error("liveness probe for '{channel}' failed: {reason}")]
    ProbeFailed { channel: String, reason: String },

    #[error("capture process for '{channel}' exited unexpectedly (code {code:?})")]
    CaptureCrashed { channel: String, code: Option<i32> },

    #[error("failed to spawn capture process for '{channel}': {source}")]
    CaptureSpawn {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("channel '{0}' already has an active capture process")]
    AlreadyCapturing(String),

    #[error("segment {0} is still being written")]
    SegmentActive(PathBuf),

    #[error("failed to persist registry to {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// True for errors caused by the caller's request rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            RecorderError::DuplicateChannel(_)
                | RecorderError::NotFound(_)
                | RecorderError::InvalidChannelName(_)
                | RecorderError::SegmentActive(_)
        )
    }
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
