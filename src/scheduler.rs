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

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::RecorderConfig;
use crate::recorder::{ChannelManager, Transition};

/// Counts of what one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub probed: usize,
    pub started: usize,
    pub stopped: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TickSummary {
    fn record(&mut self, transition: Transition) {
        match transition {
            Transition::Started => self.started += 1,
            Transition::Stopped => self.stopped += 1,
            Transition::ProbeFailed | Transition::StartFailed => self.failed += 1,
            Transition::Superseded | Transition::Skipped => {
                self.skipped += 1;
                return;
            }
            Transition::Unchanged => {}
        }
        self.probed += 1;
    }
}

/// Periodic liveness loop over all registered channels
pub struct Scheduler {
    manager: Arc<ChannelManager>,
    interval: Duration,
    probe_permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(manager: Arc<ChannelManager>, interval: Duration, max_concurrent_probes: usize) -> Self {
        Self {
            manager,
            interval,
            probe_permits: Arc::new(Semaphore::new(max_concurrent_probes.max(1))),
        }
    }

    pub fn from_config(manager: Arc<ChannelManager>, config: &RecorderConfig) -> Self {
        Self::new(
            manager,
            config.scheduler.interval(),
            config.probe.max_concurrent,
        )
    }

    /// Tick until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Scheduler started, checking channels every {:?}", self.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let summary = self.tick().await;
                    debug!("Tick finished: {:?}", summary);
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Probe every pollable channel once, at most `max_concurrent_probes`
    /// at a time. Each probe carries its own timeout, so one slow channel
    /// delays the tick by at most that timeout.
    pub async fn tick(&self) -> TickSummary {
        let channels = self.manager.list_channels().await;
        let mut summary = TickSummary::default();
        let mut probes = JoinSet::new();

        for channel in channels {
            if !channel.status.is_pollable() {
                summary.skipped += 1;
                continue;
            }

            let permit = match self.probe_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let manager = self.manager.clone();
            probes.spawn(async move {
                let _permit = permit;
                manager.probe_channel(&channel.name).await
            });
        }

        while let Some(result) = probes.join_next().await {
            match result {
                Ok(transition) => summary.record(transition),
                Err(e) => error!("Probe task failed: {}", e),
            }
        }

        summary
    }
}
