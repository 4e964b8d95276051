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

// Per-channel recording state machine
//
// Every transition for a channel runs while holding that channel's slot
// lock: probe results, capture events and user commands. Probes themselves
// run unlocked; a user command bumps the slot epoch, which makes any probe
// that started before it discard its result.

use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RecorderConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::probe::LivenessProber;
use crate::protocol::{normalize_channel_name, Channel, ChannelStatus, Segment};
use crate::registry::ChannelRegistry;
use crate::segments::SegmentLayout;
use crate::supervisor::{
    CaptureBackend, CaptureEvent, CaptureEventKind, CaptureHandle, CaptureSupervisor,
    SealedSegment, SupervisorSettings,
};

/// Settings for [`ChannelManager`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub layout: SegmentLayout,
    pub supervisor: SupervisorSettings,
    pub failure_log_threshold: u32,
}

impl ManagerSettings {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            layout: SegmentLayout::new(&config.recordings),
            supervisor: SupervisorSettings::from_config(&config.capture, &config.recordings),
            failure_log_threshold: config.probe.failure_log_threshold,
        }
    }
}

/// What a probe result did to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idle/Online -> Recording
    Started,
    /// Recording -> Idle
    Stopped,
    Unchanged,
    /// Probe failed, previous status kept
    ProbeFailed,
    /// Online but the capture process could not be spawned
    StartFailed,
    /// A user command ran while the probe was in flight
    Superseded,
    /// Channel paused, removed or shutting down
    Skipped,
}

#[derive(Default)]
struct ChannelSlot {
    capture: Option<CaptureHandle>,
    epoch: u64,
    removed: bool,
    probe_failures: u32,
}

/// Manages channels and their recordings
pub struct ChannelManager {
    registry: Arc<ChannelRegistry>,
    prober: Arc<dyn LivenessProber>,
    supervisor: CaptureSupervisor,
    layout: SegmentLayout,
    failure_log_threshold: u32,
    slots: DashMap<String, Arc<Mutex<ChannelSlot>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<CaptureEvent>>>,
    shutting_down: AtomicBool,
}

impl ChannelManager {
    pub async fn new(
        registry: Arc<ChannelRegistry>,
        prober: Arc<dyn LivenessProber>,
        backend: Arc<dyn CaptureBackend>,
        settings: ManagerSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let slots = DashMap::new();
        for channel in registry.list().await {
            slots.insert(channel.name, Arc::new(Mutex::new(ChannelSlot::default())));
        }

        info!(
            "Channel manager ready with {} channel(s), prober: {}, capture backend: {}",
            slots.len(),
            prober.prober_type(),
            backend.backend_type()
        );

        Self {
            registry,
            prober,
            supervisor: CaptureSupervisor::new(backend, settings.supervisor, events_tx),
            layout: settings.layout,
            failure_log_threshold: settings.failure_log_threshold,
            slots,
            events: Mutex::new(Some(events_rx)),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn slot(&self, name: &str) -> Option<Arc<Mutex<ChannelSlot>>> {
        self.slots.get(name).map(|entry| entry.value().clone())
    }

    pub fn is_persistence_degraded(&self) -> bool {
        self.registry.is_degraded()
    }

    /// Number of running capture processes across all channels
    pub fn active_capture_count(&self) -> usize {
        self.supervisor.active_count()
    }

    pub fn is_capturing(&self, name: &str) -> bool {
        self.supervisor.is_capturing(name)
    }

    /// Free space in the recordings directory; `None` if it cannot be read
    pub async fn free_space_bytes(&self) -> Option<u64> {
        match self.layout.free_space().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(
                    "Cannot read free space of {}: {}",
                    self.layout.base_path().display(),
                    e
                );
                None
            }
        }
    }

    /// Consecutive failed probes for a channel since its last answer
    pub async fn consecutive_probe_failures(&self, name: &str) -> Option<u32> {
        let slot = self.slot(name)?;
        let guard = slot.lock().await;
        Some(guard.probe_failures)
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.registry.list().await
    }

    pub async fn get_channel(&self, name: &str) -> RecorderResult<Channel> {
        let name = normalize_channel_name(name)?;
        self.registry
            .get(&name)
            .await
            .ok_or(RecorderError::NotFound(name))
    }

    pub async fn add_channel(&self, name: &str) -> RecorderResult<Channel> {
        let channel = self.registry.add(name).await?;
        self.slots.insert(
            channel.name.clone(),
            Arc::new(Mutex::new(ChannelSlot::default())),
        );
        info!("Channel '{}' added, waiting for it to go live", channel.name);
        Ok(channel)
    }

    /// Remove a channel. Any capture is stopped before the entry is deleted.
    pub async fn remove_channel(&self, name: &str) -> RecorderResult<Channel> {
        let name = normalize_channel_name(name)?;
        let slot = self
            .slot(&name)
            .ok_or_else(|| RecorderError::NotFound(name.clone()))?;

        let mut channel = {
            let mut guard = slot.lock().await;
            if guard.removed {
                return Err(RecorderError::NotFound(name));
            }
            guard.epoch += 1;

            if let Some(handle) = guard.capture.take() {
                self.seal(handle).await;
            }
            let channel = self.registry.remove(&name).await?;
            guard.removed = true;
            channel
        };

        self.slots
            .remove_if(&name, |_, current| Arc::ptr_eq(current, &slot));

        channel.status = ChannelStatus::Stopped;
        channel.current_recording_path = None;
        info!("Channel '{}' removed", name);
        Ok(channel)
    }

    /// Pause a channel, sealing any running recording. Pausing a paused
    /// channel changes nothing.
    pub async fn pause_channel(&self, name: &str) -> RecorderResult<Channel> {
        let name = normalize_channel_name(name)?;
        let slot = self
            .slot(&name)
            .ok_or_else(|| RecorderError::NotFound(name.clone()))?;

        let mut guard = slot.lock().await;
        if guard.removed {
            return Err(RecorderError::NotFound(name));
        }
        guard.epoch += 1;

        let channel = self
            .registry
            .get(&name)
            .await
            .ok_or_else(|| RecorderError::NotFound(name.clone()))?;
        if channel.paused {
            debug!("Channel '{}' already paused", name);
            return Ok(channel);
        }

        if let Some(handle) = guard.capture.take() {
            self.seal(handle).await;
        }

        let channel = self
            .registry
            .update(&name, |c| {
                c.paused = true;
                c.status = ChannelStatus::Paused;
                c.current_recording_path = None;
            })
            .await?;
        info!("Channel '{}' paused", name);
        Ok(channel)
    }

    /// Resume a paused channel. It goes back to `Idle` and a later probe
    /// starts a fresh session.
    pub async fn resume_channel(&self, name: &str) -> RecorderResult<Channel> {
        let name = normalize_channel_name(name)?;
        let slot = self
            .slot(&name)
            .ok_or_else(|| RecorderError::NotFound(name.clone()))?;

        let mut guard = slot.lock().await;
        if guard.removed {
            return Err(RecorderError::NotFound(name));
        }
        guard.epoch += 1;
        guard.probe_failures = 0;

        let channel = self
            .registry
            .update(&name, |c| {
                if c.paused {
                    c.paused = false;
                    c.status = ChannelStatus::Idle;
                }
            })
            .await?;
        info!("Channel '{}' resumed, waiting for next probe", name);
        Ok(channel)
    }

    /// Files recorded for a channel, with the one being written marked active
    pub async fn list_segments(&self, name: &str) -> RecorderResult<Vec<Segment>> {
        let channel = self.get_channel(name).await?;
        self.layout
            .list_segments(&channel.name, channel.current_recording_path.as_deref())
            .await
    }

    /// Path of a sealed segment, safe to serve for download
    pub async fn sealed_segment(&self, name: &str, file_name: &str) -> RecorderResult<PathBuf> {
        let channel = self.get_channel(name).await?;
        self.layout
            .sealed_segment(
                &channel.name,
                file_name,
                channel.current_recording_path.as_deref(),
            )
            .await
    }

    /// Probe one channel and apply the result.
    pub async fn probe_channel(&self, name: &str) -> Transition {
        if self.shutting_down.load(Ordering::Acquire) {
            return Transition::Skipped;
        }
        let Some(slot) = self.slot(name) else {
            return Transition::Skipped;
        };

        let epoch = {
            let guard = slot.lock().await;
            if guard.removed {
                return Transition::Skipped;
            }
            guard.epoch
        };

        match self.registry.get(name).await {
            Some(channel) if channel.status.is_pollable() => {}
            _ => return Transition::Skipped,
        }

        let result = self.prober.is_online(name).await;

        let mut guard = slot.lock().await;
        if guard.removed || guard.epoch != epoch {
            debug!("Discarding stale probe result for '{}'", name);
            return Transition::Superseded;
        }
        if self.shutting_down.load(Ordering::Acquire) {
            return Transition::Skipped;
        }

        self.apply_probe(name, &mut guard, result).await
    }

    async fn apply_probe(
        &self,
        name: &str,
        slot: &mut ChannelSlot,
        result: RecorderResult<bool>,
    ) -> Transition {
        let Some(channel) = self.registry.get(name).await else {
            return Transition::Skipped;
        };
        if !channel.status.is_pollable() {
            return Transition::Skipped;
        }

        let online = match result {
            Ok(online) => online,
            Err(e) => {
                slot.probe_failures += 1;
                let failures = slot.probe_failures;
                if failures < self.failure_log_threshold {
                    warn!("{} (keeping status {:?})", e, channel.status);
                } else if failures == self.failure_log_threshold {
                    warn!(
                        "{} ({} consecutive failures, further failures logged at debug)",
                        e, failures
                    );
                } else {
                    debug!("{} ({} consecutive failures)", e, failures);
                }
                return Transition::ProbeFailed;
            }
        };

        if slot.probe_failures > 0 {
            info!(
                "Probe for '{}' recovered after {} failure(s)",
                name, slot.probe_failures
            );
            slot.probe_failures = 0;
        }

        match (online, slot.capture.take()) {
            (true, Some(handle)) => {
                slot.capture = Some(handle);
                Transition::Unchanged
            }
            (true, None) => self.start_session(name, slot).await,
            (false, Some(handle)) => {
                info!("Channel '{}' went offline, stopping recording", name);
                self.seal(handle).await;
                self.record(name, |c| {
                    c.status = ChannelStatus::Idle;
                    c.current_recording_path = None;
                    c.last_online_at = Some(Utc::now());
                })
                .await;
                Transition::Stopped
            }
            (false, None) => {
                if channel.status != ChannelStatus::Idle {
                    self.record(name, |c| {
                        c.status = ChannelStatus::Idle;
                        c.current_recording_path = None;
                    })
                    .await;
                }
                Transition::Unchanged
            }
        }
    }

    /// Allocate a new session at segment 0 and start capturing.
    async fn start_session(&self, name: &str, slot: &mut ChannelSlot) -> Transition {
        let mut started_at = Utc::now();
        let mut path = self.layout.segment_path(name, started_at, 0);
        // Sealed segments are immutable; a session started within the same
        // second as the previous one must not reuse its path
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            started_at += chrono::Duration::seconds(1);
            path = self.layout.segment_path(name, started_at, 0);
        }

        match self.supervisor.start(name, path.clone()).await {
            Ok(handle) => {
                slot.capture = Some(handle);
                let session_id = Uuid::new_v4().to_string();
                info!("Channel '{}' is live, recording session {}", name, session_id);
                self.record(name, |c| {
                    c.status = ChannelStatus::Recording;
                    c.segment_index = 0;
                    c.current_recording_path = Some(path);
                    c.session_id = Some(session_id);
                    c.session_started_at = Some(started_at);
                    c.last_online_at = Some(started_at);
                })
                .await;
                Transition::Started
            }
            Err(e) => {
                error!("Channel '{}' is live but capture failed to start: {}", name, e);
                self.record(name, |c| {
                    c.status = ChannelStatus::Online;
                    c.current_recording_path = None;
                    c.last_online_at = Some(started_at);
                })
                .await;
                Transition::StartFailed
            }
        }
    }

    /// Apply events reported by capture monitors until the manager is dropped.
    pub async fn run_event_loop(self: Arc<Self>) {
        let Some(mut events) = self.events.lock().await.take() else {
            warn!("Capture event loop is already running");
            return;
        };

        while let Some(event) = events.recv().await {
            let manager = self.clone();
            tokio::spawn(async move { manager.handle_capture_event(event).await });
        }
    }

    pub async fn handle_capture_event(&self, event: CaptureEvent) {
        let Some(slot) = self.slot(&event.channel) else {
            return;
        };
        let mut guard = slot.lock().await;
        if guard.removed {
            return;
        }

        let is_current = guard
            .capture
            .as_ref()
            .map(|handle| handle.id() == event.capture_id)
            .unwrap_or(false);
        if !is_current {
            debug!(
                "Ignoring event for capture {} of '{}', no longer active",
                event.capture_id, event.channel
            );
            return;
        }
        let Some(handle) = guard.capture.take() else {
            return;
        };

        match event.kind {
            CaptureEventKind::SizeLimitReached { bytes } => {
                self.rotate(&event.channel, &mut guard, handle, bytes).await;
            }
            CaptureEventKind::Exited(exit) => {
                // A probe already in flight must not restart the capture;
                // the next tick decides
                guard.epoch += 1;
                self.seal(handle).await;
                if exit.success() {
                    info!(
                        "Capture for '{}' ended on its own, segment sealed",
                        event.channel
                    );
                } else {
                    let crash = RecorderError::CaptureCrashed {
                        channel: event.channel.clone(),
                        code: exit.code,
                    };
                    warn!("{}; segment sealed, next probe decides on restart", crash);
                }
                self.record(&event.channel, |c| {
                    c.status = ChannelStatus::Idle;
                    c.current_recording_path = None;
                })
                .await;
            }
        }
    }

    /// Seal the current segment and continue the session in the next one.
    ///
    /// The old process has fully exited before the new one is spawned, and
    /// the two write distinct paths.
    async fn rotate(&self, name: &str, slot: &mut ChannelSlot, handle: CaptureHandle, bytes: u64) {
        let Some(channel) = self.registry.get(name).await else {
            self.seal(handle).await;
            return;
        };
        let session_start = channel.session_started_at.unwrap_or(handle.started_at());
        let next_index = channel.segment_index + 1;

        info!(
            "Segment {} of '{}' reached {} bytes, rotating to segment {}",
            channel.segment_index, name, bytes, next_index
        );
        self.seal(handle).await;

        let path = self.layout.segment_path(name, session_start, next_index);
        match self.supervisor.start(name, path.clone()).await {
            Ok(handle) => {
                slot.capture = Some(handle);
                self.record(name, |c| {
                    c.segment_index = next_index;
                    c.current_recording_path = Some(path);
                })
                .await;
            }
            Err(e) => {
                error!("Failed to start segment {} for '{}': {}", next_index, name, e);
                self.record(name, |c| {
                    c.status = ChannelStatus::Online;
                    c.current_recording_path = None;
                })
                .await;
            }
        }
    }

    async fn seal(&self, handle: CaptureHandle) -> Option<SealedSegment> {
        let channel = handle.channel().to_string();
        match self.supervisor.stop(handle).await {
            Ok(sealed) => Some(sealed),
            Err(e) => {
                error!("Failed to stop capture for '{}' cleanly: {}", channel, e);
                None
            }
        }
    }

    /// Registry update from inside a transition; the slot lock guarantees
    /// the entry exists, so failures are only logged.
    async fn record<F>(&self, name: &str, mutation: F)
    where
        F: FnOnce(&mut Channel),
    {
        if let Err(e) = self.registry.update(name, mutation).await {
            error!("Failed to update channel '{}': {}", name, e);
        }
    }

    /// Stop every capture and leave all channels idle.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);

        let slots: Vec<(String, Arc<Mutex<ChannelSlot>>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (name, slot) in slots {
            let mut guard = slot.lock().await;
            guard.epoch += 1;
            if let Some(handle) = guard.capture.take() {
                self.seal(handle).await;
                self.record(&name, |c| {
                    c.status = ChannelStatus::Idle;
                    c.current_recording_path = None;
                })
                .await;
            }
        }

        info!("All captures stopped");
    }
}
