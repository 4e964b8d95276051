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

// Shared fakes for the prober and the capture backend

#![allow(dead_code)]

use async_trait::async_trait;
use channel_recorder::config::RecordingsConfig;
use channel_recorder::{
    CaptureBackend, CaptureProcess, Channel, ChannelManager, ChannelRegistry, ManagerSettings,
    ProcessExit, RecorderError, RecorderResult, SegmentLayout, SupervisorSettings,
    LivenessProber,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

pub const MAX_SEGMENT_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Liveness {
    Online,
    Offline,
    Fail,
}

/// Blocks a probe until the test releases it
#[derive(Default)]
pub struct ProbeGate {
    pub entered: Notify,
    pub release: Notify,
}

/// Scripted liveness answers per channel (offline by default)
#[derive(Default)]
pub struct FakeProber {
    answers: Mutex<HashMap<String, Liveness>>,
    gates: Mutex<HashMap<String, Arc<ProbeGate>>>,
    delay: Mutex<Option<Duration>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeProber {
    pub fn set(&self, channel: &str, liveness: Liveness) {
        self.answers
            .lock()
            .unwrap()
            .insert(channel.to_string(), liveness);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// The next probe of `channel` waits for `gate.release`
    pub fn gate(&self, channel: &str) -> Arc<ProbeGate> {
        let gate = Arc::new(ProbeGate::default());
        self.gates
            .lock()
            .unwrap()
            .insert(channel.to_string(), gate.clone());
        gate
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LivenessProber for FakeProber {
    async fn is_online(&self, channel: &str) -> RecorderResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().remove(channel);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let answer = self
            .answers
            .lock()
            .unwrap()
            .get(channel)
            .copied()
            .unwrap_or(Liveness::Offline);
        match answer {
            Liveness::Online => Ok(true),
            Liveness::Offline => Ok(false),
            Liveness::Fail => Err(RecorderError::ProbeFailed {
                channel: channel.to_string(),
                reason: "scripted failure".to_string(),
            }),
        }
    }

    fn prober_type(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
struct BackendState {
    running: HashMap<String, usize>,
    max_running: HashMap<String, usize>,
    spawned: Vec<PathBuf>,
    // latest process exit slot per channel
    exits: HashMap<String, Arc<Mutex<Option<ProcessExit>>>>,
}

/// In-process capture backend that creates the output file and tracks how
/// many processes run per channel
#[derive(Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
    pub fail_spawn: std::sync::atomic::AtomicBool,
}

impl FakeBackend {
    pub fn running(&self, channel: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.running.get(channel).copied().unwrap_or(0)
    }

    pub fn max_running(&self, channel: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.max_running.get(channel).copied().unwrap_or(0)
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().spawned.clone()
    }

    /// Make the latest process of `channel` exit on its own
    pub fn exit(&self, channel: &str, code: Option<i32>) {
        let state = self.state.lock().unwrap();
        if let Some(slot) = state.exits.get(channel) {
            *slot.lock().unwrap() = Some(ProcessExit { code });
        }
    }
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    async fn spawn(&self, channel: &str, output: &Path) -> RecorderResult<Box<dyn CaptureProcess>> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(RecorderError::CaptureSpawn {
                channel: channel.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no capture tool"),
            });
        }

        std::fs::write(output, b"")?;
        let exit = Arc::new(Mutex::new(None));
        {
            let mut state = self.state.lock().unwrap();
            let running = state.running.entry(channel.to_string()).or_insert(0);
            *running += 1;
            let now = *running;
            let max = state.max_running.entry(channel.to_string()).or_insert(0);
            *max = (*max).max(now);
            state.spawned.push(output.to_path_buf());
            state.exits.insert(channel.to_string(), exit.clone());
        }

        Ok(Box::new(FakeProcess {
            channel: channel.to_string(),
            state: self.state.clone(),
            exit,
            finished: false,
        }))
    }

    fn backend_type(&self) -> &str {
        "fake"
    }
}

struct FakeProcess {
    channel: String,
    state: Arc<Mutex<BackendState>>,
    exit: Arc<Mutex<Option<ProcessExit>>>,
    finished: bool,
}

impl FakeProcess {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            let mut state = self.state.lock().unwrap();
            if let Some(running) = state.running.get_mut(&self.channel) {
                *running -= 1;
            }
        }
    }
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ProcessExit>> {
        let exit = *self.exit.lock().unwrap();
        if exit.is_some() {
            self.finish();
        }
        Ok(exit)
    }

    async fn terminate(&mut self, _grace: Duration) -> std::io::Result<ProcessExit> {
        let exit = {
            let mut slot = self.exit.lock().unwrap();
            *slot.get_or_insert(ProcessExit { code: Some(0) })
        };
        self.finish();
        Ok(exit)
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.finish();
    }
}

pub struct TestRecorder {
    pub manager: Arc<ChannelManager>,
    pub prober: Arc<FakeProber>,
    pub backend: Arc<FakeBackend>,
    pub temp_dir: TempDir,
}

impl TestRecorder {
    pub fn registry_path(&self) -> PathBuf {
        self.temp_dir.path().join("channels.json")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.temp_dir.path().join("recordings")
    }
}

pub fn test_settings(temp_dir: &Path) -> ManagerSettings {
    let recordings = RecordingsConfig {
        dir: temp_dir.join("recordings"),
        max_segment_bytes: MAX_SEGMENT_BYTES,
        ..RecordingsConfig::default()
    };
    ManagerSettings {
        layout: SegmentLayout::new(&recordings),
        supervisor: SupervisorSettings {
            max_segment_bytes: MAX_SEGMENT_BYTES,
            size_poll_interval: Duration::from_millis(10),
            stop_grace: Duration::from_secs(1),
        },
        failure_log_threshold: 3,
    }
}

pub async fn create_test_recorder() -> TestRecorder {
    let temp_dir = TempDir::new().unwrap();
    create_test_recorder_in(temp_dir).await
}

/// Build a recorder over an existing directory, e.g. to simulate a restart
pub async fn create_test_recorder_in(temp_dir: TempDir) -> TestRecorder {
    let registry = Arc::new(ChannelRegistry::open(temp_dir.path().join("channels.json"), 0).await);
    let prober = Arc::new(FakeProber::default());
    let backend = Arc::new(FakeBackend::default());
    let manager = Arc::new(
        ChannelManager::new(
            registry,
            prober.clone(),
            backend.clone(),
            test_settings(temp_dir.path()),
        )
        .await,
    );

    TestRecorder {
        manager,
        prober,
        backend,
        temp_dir,
    }
}

/// Poll a channel until `predicate` holds or two seconds pass
pub async fn wait_for_channel<P>(manager: &ChannelManager, name: &str, predicate: P) -> bool
where
    P: Fn(&Channel) -> bool,
{
    for _ in 0..200 {
        if let Ok(channel) = manager.get_channel(name).await {
            if predicate(&channel) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
