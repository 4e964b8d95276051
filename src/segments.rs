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

// Segment path layout and listing

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::config::RecordingsConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::protocol::{Segment, SegmentStatus};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Maps (channel, session start, index) to a segment file path
#[derive(Debug, Clone)]
pub struct SegmentLayout {
    base_path: PathBuf,
    filename_format: String,
    file_extension: String,
}

impl SegmentLayout {
    pub fn new(config: &RecordingsConfig) -> Self {
        Self {
            base_path: config.dir.clone(),
            filename_format: config.filename_format.clone(),
            file_extension: config.file_extension.clone(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Ensure the recordings directory exists
    pub async fn ensure_base_directory(&self) -> RecorderResult<()> {
        if !fs::try_exists(&self.base_path).await? {
            info!("Creating recordings directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    /// Bytes available to this process on the recordings filesystem
    pub async fn free_space(&self) -> RecorderResult<u64> {
        let base_path = self.base_path.clone();
        let available = tokio::task::spawn_blocking(move || fs2::available_space(base_path))
            .await
            .map_err(std::io::Error::other)??;
        Ok(available)
    }

    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        self.base_path.join(channel)
    }

    pub fn segment_path(&self, channel: &str, session_start: DateTime<Utc>, index: u32) -> PathBuf {
        let timestamp = session_start.format(TIMESTAMP_FORMAT).to_string();
        let filename = self
            .filename_format
            .replace("{name}", channel)
            .replace("{timestamp}", &timestamp)
            .replace("{index}", &index.to_string())
            .replace("{ext}", &self.file_extension);
        self.channel_dir(channel).join(filename)
    }

    /// List the files of a channel, oldest first.
    ///
    /// `active` is the path currently being written, if any.
    pub async fn list_segments(
        &self,
        channel: &str,
        active: Option<&Path>,
    ) -> RecorderResult<Vec<Segment>> {
        let dir = self.channel_dir(channel);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            let status = if active == Some(path.as_path()) {
                SegmentStatus::Active
            } else {
                SegmentStatus::Sealed
            };
            segments.push(Segment {
                file_name: entry.file_name().to_string_lossy().to_string(),
                size_bytes: metadata.len(),
                modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
                status,
                path,
            });
        }

        segments.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        debug!("Found {} segment(s) for '{}'", segments.len(), channel);

        Ok(segments)
    }

    /// Resolve a sealed segment for download.
    pub async fn sealed_segment(
        &self,
        channel: &str,
        file_name: &str,
        active: Option<&Path>,
    ) -> RecorderResult<PathBuf> {
        let is_plain_name = !file_name.is_empty()
            && Path::new(file_name).file_name().map(|n| n == file_name).unwrap_or(false);
        if !is_plain_name {
            return Err(RecorderError::NotFound(format!("{}/{}", channel, file_name)));
        }

        let path = self.channel_dir(channel).join(file_name);
        if active == Some(path.as_path()) {
            return Err(RecorderError::SegmentActive(path));
        }

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => Err(RecorderError::NotFound(format!("{}/{}", channel, file_name))),
        }
    }
}

/// Current size of a segment file; zero until the capture tool creates it
pub async fn segment_size(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
