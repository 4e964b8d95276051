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

// Durable channel registry
//
// The in-memory channel list is the single shared mutable resource of the
// recorder. Every mutation rewrites the full snapshot to disk while holding
// the registry lock, so snapshot writes are serialized and an observer that
// sees a successful call also sees the matching on-disk document.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::protocol::{normalize_channel_name, Channel};

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk document
#[derive(Debug, Serialize, Deserialize)]
struct RegistrySnapshot {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    channels: Vec<Channel>,
}

pub struct ChannelRegistry {
    path: PathBuf,
    persist_retries: u32,
    channels: Mutex<Vec<Channel>>,
    degraded: AtomicBool,
}

impl ChannelRegistry {
    /// Load the registry from `path`.
    ///
    /// A missing or unreadable document yields an empty registry. Records are
    /// normalized with [`Channel::recovered`].
    pub async fn open(path: impl Into<PathBuf>, persist_retries: u32) -> Self {
        let path = path.into();
        let channels = Self::load(&path).await;

        info!(
            "Loaded {} channel(s) from {}",
            channels.len(),
            path.display()
        );

        Self {
            path,
            persist_retries,
            channels: Mutex::new(channels),
            degraded: AtomicBool::new(false),
        }
    }

    async fn load(path: &Path) -> Vec<Channel> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No registry at {}, starting empty", path.display());
                return Vec::new();
            }
            Err(e) => {
                warn!("Cannot read registry {}: {}, starting empty", path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_slice::<RegistrySnapshot>(&content) {
            Ok(snapshot) => {
                let mut channels: Vec<Channel> = Vec::with_capacity(snapshot.channels.len());
                for channel in snapshot.channels {
                    if channels.iter().any(|c| c.name == channel.name) {
                        warn!("Dropping duplicate registry entry '{}'", channel.name);
                        continue;
                    }
                    channels.push(channel.recovered());
                }
                channels
            }
            Err(e) => {
                let aside = path.with_extension("corrupt");
                warn!(
                    "Registry {} is corrupt ({}), moving it to {} and starting empty",
                    path.display(),
                    e,
                    aside.display()
                );
                if let Err(e) = fs::rename(path, &aside).await {
                    warn!("Failed to move corrupt registry aside: {}", e);
                }
                Vec::new()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the last persist attempt exhausted its retries.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Register a new channel in `Idle`.
    pub async fn add(&self, raw_name: &str) -> RecorderResult<Channel> {
        let name = normalize_channel_name(raw_name)?;
        let mut channels = self.channels.lock().await;

        if channels.iter().any(|c| c.name == name) {
            return Err(RecorderError::DuplicateChannel(name));
        }

        let channel = Channel::new(name);
        channels.push(channel.clone());
        self.persist(&channels).await;

        Ok(channel)
    }

    /// Delete a channel entry.
    ///
    /// Callers must stop any active capture for the channel first; the
    /// manager does this under the channel's exclusive lock.
    pub async fn remove(&self, name: &str) -> RecorderResult<Channel> {
        let mut channels = self.channels.lock().await;

        let index = channels
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| RecorderError::NotFound(name.to_string()))?;
        let channel = channels.remove(index);
        self.persist(&channels).await;

        Ok(channel)
    }

    pub async fn get(&self, name: &str) -> Option<Channel> {
        let channels = self.channels.lock().await;
        channels.iter().find(|c| c.name == name).cloned()
    }

    pub async fn list(&self) -> Vec<Channel> {
        self.channels.lock().await.clone()
    }

    /// Apply `mutation` to one channel and persist the result.
    pub async fn update<F>(&self, name: &str, mutation: F) -> RecorderResult<Channel>
    where
        F: FnOnce(&mut Channel),
    {
        let mut channels = self.channels.lock().await;

        let channel = channels
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RecorderError::NotFound(name.to_string()))?;
        let before = channel.clone();
        mutation(channel);
        // Names are the registry key
        channel.name = before.name.clone();
        let updated = channel.clone();

        if updated != before {
            self.persist(&channels).await;
        }

        Ok(updated)
    }

    /// Rewrite the snapshot, retrying with backoff.
    ///
    /// Failure is not returned to the caller: the in-memory state stays
    /// authoritative and the degraded flag is raised instead.
    async fn persist(&self, channels: &[Channel]) {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(100);

        loop {
            match self.write_snapshot(channels).await {
                Ok(()) => {
                    if self.degraded.swap(false, Ordering::AcqRel) {
                        info!("Registry persistence recovered at {}", self.path.display());
                    } else if attempt > 0 {
                        info!("Registry persisted after {} retries", attempt);
                    }
                    return;
                }
                Err(e) if attempt < self.persist_retries => {
                    warn!(
                        "Registry persist failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempt + 1,
                        self.persist_retries,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Registry persist failed after {} attempts, running with degraded persistence: {}",
                        attempt + 1,
                        e
                    );
                    self.degraded.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }

    async fn write_snapshot(&self, channels: &[Channel]) -> RecorderResult<()> {
        let to_persistence = |source: std::io::Error| RecorderError::Persistence {
            path: self.path.clone(),
            source,
        };

        let snapshot = RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            channels: channels.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| to_persistence(std::io::Error::other(e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(to_persistence)?;
        }

        // Write-then-rename so a crash never leaves a truncated document
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await.map_err(to_persistence)?;
        file.write_all(&json).await.map_err(to_persistence)?;
        file.sync_all().await.map_err(to_persistence)?;
        drop(file);
        fs::rename(&tmp, &self.path).await.map_err(to_persistence)?;

        debug!(
            "Persisted {} channel(s) to {}",
            channels.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChannelStatus;
    use tempfile::TempDir;

    async fn create_test_registry() -> (ChannelRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let registry = ChannelRegistry::open(temp_dir.path().join("channels.json"), 0).await;
        (registry, temp_dir)
    }

    #[tokio::test]
    async fn test_add_normalizes_and_persists() {
        let (registry, _temp_dir) = create_test_registry().await;

        let channel = registry.add(" Alice ").await.unwrap();
        assert_eq!(channel.name, "alice");
        assert_eq!(channel.status, ChannelStatus::Idle);
        assert!(registry.path().exists());

        let content = std::fs::read_to_string(registry.path()).unwrap();
        assert!(content.contains("\"alice\""));
    }

    #[tokio::test]
    async fn test_add_duplicate() {
        let (registry, _temp_dir) = create_test_registry().await;
        registry.add("alice").await.unwrap();

        let result = registry.add("ALICE").await;
        assert!(matches!(result, Err(RecorderError::DuplicateChannel(name)) if name == "alice"));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing() {
        let (registry, _temp_dir) = create_test_registry().await;
        let result = registry.remove("nobody").await;
        assert!(matches!(result, Err(RecorderError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_cannot_rename() {
        let (registry, _temp_dir) = create_test_registry().await;
        registry.add("alice").await.unwrap();

        let updated = registry
            .update("alice", |c| {
                c.name = "mallory".to_string();
                c.segment_index = 2;
            })
            .await
            .unwrap();
        assert_eq!(updated.name, "alice");
        assert_eq!(updated.segment_index, 2);
        assert!(registry.get("mallory").await.is_none());
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let (registry, _temp_dir) = create_test_registry().await;
        for name in ["zed", "alice", "mike"] {
            registry.add(name).await.unwrap();
        }
        let names: Vec<String> = registry.list().await.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["zed", "alice", "mike"]);
    }

    #[tokio::test]
    async fn test_unwritable_path_sets_degraded() {
        let temp_dir = TempDir::new().unwrap();
        // A directory in place of the snapshot file makes the rename fail
        let path = temp_dir.path().join("channels.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let registry = ChannelRegistry::open(&path, 1).await;
        let channel = registry.add("alice").await.unwrap();

        assert_eq!(channel.name, "alice");
        assert!(registry.is_degraded());
        assert!(registry.get("alice").await.is_some());
    }

    #[tokio::test]
    async fn test_degraded_clears_after_successful_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("channels.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let registry = ChannelRegistry::open(&path, 0).await;
        registry.add("alice").await.unwrap();
        assert!(registry.is_degraded());

        // Storage comes back
        std::fs::remove_dir_all(&path).unwrap();
        registry.add("bob").await.unwrap();
        assert!(!registry.is_degraded());

        // Nothing written while degraded was lost
        let reopened = ChannelRegistry::open(&path, 0).await;
        let names: Vec<String> = reopened.list().await.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }
}
