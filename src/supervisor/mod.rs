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

// Capture process supervisor
//
// Owns one external capture process per recording channel plus a monitor
// task that samples the output size and the process exit status. The
// monitor never acts on its own: it reports `CaptureEvent`s and the channel
// manager applies them under the channel's exclusive lock.

mod process;

pub use process::{CaptureBackend, CaptureProcess, ProcessExit, StreamlinkBackend};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, RecordingsConfig};
use crate::error::{RecorderError, RecorderResult};
use crate::segments::segment_size;

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub max_segment_bytes: u64,
    pub size_poll_interval: Duration,
    pub stop_grace: Duration,
}

impl SupervisorSettings {
    pub fn from_config(capture: &CaptureConfig, recordings: &RecordingsConfig) -> Self {
        Self {
            max_segment_bytes: recordings.max_segment_bytes,
            size_poll_interval: capture.size_poll_interval(),
            stop_grace: capture.stop_grace(),
        }
    }
}

/// Something the monitor observed about a capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEventKind {
    /// The active segment reached the configured maximum
    SizeLimitReached { bytes: u64 },
    /// The process exited without being asked to
    Exited(ProcessExit),
}

#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub capture_id: u64,
    pub channel: String,
    pub kind: CaptureEventKind,
}

/// A segment whose writer has fully exited
#[derive(Debug, Clone)]
pub struct SealedSegment {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub exit: ProcessExit,
}

/// One supervised capture process
///
/// Not `Clone`: whoever holds the handle is the only one able to stop it.
pub struct CaptureHandle {
    id: u64,
    channel: String,
    output_path: PathBuf,
    started_at: DateTime<Utc>,
    process: Arc<Mutex<Box<dyn CaptureProcess>>>,
    monitor: Option<JoinHandle<()>>,
    stop_monitor: Option<oneshot::Sender<()>>,
}

impl CaptureHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

pub struct CaptureSupervisor {
    backend: Arc<dyn CaptureBackend>,
    settings: SupervisorSettings,
    events: mpsc::UnboundedSender<CaptureEvent>,
    next_id: AtomicU64,
    // channel -> capture id
    active: DashMap<String, u64>,
}

impl CaptureSupervisor {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        settings: SupervisorSettings,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        Self {
            backend,
            settings,
            events,
            next_id: AtomicU64::new(1),
            active: DashMap::new(),
        }
    }

    /// Number of capture processes currently owned
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_capturing(&self, channel: &str) -> bool {
        self.active.contains_key(channel)
    }

    /// Launch a capture process writing `output_path`.
    pub async fn start(&self, channel: &str, output_path: PathBuf) -> RecorderResult<CaptureHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Reserve the channel before spawning so two starts cannot race
        match self.active.entry(channel.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RecorderError::AlreadyCapturing(channel.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let process = match self.spawn_process(channel, &output_path).await {
            Ok(process) => process,
            Err(e) => {
                self.active.remove(channel);
                return Err(e);
            }
        };

        info!(
            "Capture {} started for '{}' (pid {:?}) -> {}",
            id,
            channel,
            process.pid(),
            output_path.display()
        );

        let process = Arc::new(Mutex::new(process));
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_capture(
            id,
            channel.to_string(),
            output_path.clone(),
            process.clone(),
            self.settings.clone(),
            stop_rx,
            self.events.clone(),
        ));

        Ok(CaptureHandle {
            id,
            channel: channel.to_string(),
            output_path,
            started_at: Utc::now(),
            process,
            monitor: Some(monitor),
            stop_monitor: Some(stop_tx),
        })
    }

    async fn spawn_process(
        &self,
        channel: &str,
        output_path: &Path,
    ) -> RecorderResult<Box<dyn CaptureProcess>> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.backend.spawn(channel, output_path).await
    }

    /// Stop a capture and seal its segment.
    ///
    /// Returns only after the process has exited, so the file is closed and
    /// a follow-up segment can be opened without overlap. If termination
    /// itself fails the process is still killed when the handle drops.
    pub async fn stop(&self, mut handle: CaptureHandle) -> RecorderResult<SealedSegment> {
        if let Some(stop) = handle.stop_monitor.take() {
            let _ = stop.send(());
        }
        if let Some(monitor) = handle.monitor.take() {
            if let Err(e) = monitor.await {
                warn!("Monitor for capture {} ended abnormally: {}", handle.id, e);
            }
        }

        let result = {
            let mut process = handle.process.lock().await;
            process.terminate(self.settings.stop_grace).await
        };

        self.active
            .remove_if(&handle.channel, |_, id| *id == handle.id);

        let exit = result?;
        let size_bytes = segment_size(&handle.output_path).await;
        info!(
            "Capture {} for '{}' stopped (exit {:?}), sealed {} ({} bytes)",
            handle.id,
            handle.channel,
            exit.code,
            handle.output_path.display(),
            size_bytes
        );

        Ok(SealedSegment {
            path: handle.output_path.clone(),
            size_bytes,
            exit,
        })
    }

    /// Current size of the handle's active segment
    pub async fn poll_size(&self, handle: &CaptureHandle) -> u64 {
        segment_size(&handle.output_path).await
    }
}

/// Sample the capture until it exits, outgrows its segment, or is told to stop.
///
/// Reports at most one event, then ends; a new monitor is started with the
/// next segment's process.
async fn monitor_capture(
    capture_id: u64,
    channel: String,
    output_path: PathBuf,
    process: Arc<Mutex<Box<dyn CaptureProcess>>>,
    settings: SupervisorSettings,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<CaptureEvent>,
) {
    let mut ticker = tokio::time::interval(settings.size_poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop => return,
            _ = ticker.tick() => {}
        }

        let exited = {
            let mut process = process.lock().await;
            process.try_wait()
        };

        let kind = match exited {
            Ok(Some(exit)) => CaptureEventKind::Exited(exit),
            Ok(None) => {
                let bytes = segment_size(&output_path).await;
                if bytes < settings.max_segment_bytes {
                    continue;
                }
                debug!(
                    "Segment {} reached {} bytes (limit {})",
                    output_path.display(),
                    bytes,
                    settings.max_segment_bytes
                );
                CaptureEventKind::SizeLimitReached { bytes }
            }
            Err(e) => {
                warn!(
                    "Cannot check capture {} for '{}': {}",
                    capture_id, channel, e
                );
                continue;
            }
        };

        let event = CaptureEvent {
            capture_id,
            channel,
            kind,
        };
        if events.send(event).is_err() {
            debug!("Capture event receiver dropped, monitor exiting");
        }
        return;
    }
}
