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

// Automatic live channel recorder
//
// Watches a set of streaming channels and records each one while it is live:
// - Polls channel liveness on a fixed interval with bounded concurrency
// - Runs one external capture process per live channel
// - Rotates output into a new segment when a size limit is reached
// - Persists channel state and recovers cleanly after a crash
// - Accepts add/remove/pause/resume commands over a JSON control socket

pub mod config;
pub mod control;
pub mod error;
pub mod probe;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod segments;
pub mod supervisor;

// Re-export main types
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use control::ControlInterface;
pub use error::{RecorderError, RecorderResult};
pub use probe::{LivenessProber, StreamlinkProber};
pub use protocol::{
    Channel, ChannelCommand, ChannelRequest, ChannelResponse, ChannelStatus, Segment,
    SegmentStatus,
};
pub use recorder::{ChannelManager, ManagerSettings, Transition};
pub use registry::ChannelRegistry;
pub use scheduler::{Scheduler, TickSummary};
pub use segments::SegmentLayout;
pub use supervisor::{
    CaptureBackend, CaptureEvent, CaptureEventKind, CaptureHandle, CaptureProcess,
    CaptureSupervisor, ProcessExit, StreamlinkBackend, SupervisorSettings,
};
