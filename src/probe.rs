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

// Liveness probing
//
// A probe answers "is this channel streaming right now". Transient failures
// are reported as `ProbeFailed` and never as "offline", so callers can keep
// the previous status instead of tearing down a recording.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::{CaptureConfig, ProbeConfig};
use crate::error::{RecorderError, RecorderResult};

#[async_trait]
pub trait LivenessProber: Send + Sync {
    /// Returns `Ok(true)` when online, `Ok(false)` when offline and
    /// `Err(RecorderError::ProbeFailed)` when the answer is unknown.
    async fn is_online(&self, channel: &str) -> RecorderResult<bool>;

    fn prober_type(&self) -> &str;
}

/// Probes through `streamlink <url> --json`
pub struct StreamlinkProber {
    program: String,
    url_template: String,
    timeout: Duration,
}

impl StreamlinkProber {
    pub fn new(program: String, url_template: String, timeout: Duration) -> Self {
        Self {
            program,
            url_template,
            timeout,
        }
    }

    pub fn from_config(capture: &CaptureConfig, probe: &ProbeConfig) -> Self {
        Self::new(
            capture.program.clone(),
            capture.url_template.clone(),
            probe.timeout(),
        )
    }
}

#[async_trait]
impl LivenessProber for StreamlinkProber {
    async fn is_online(&self, channel: &str) -> RecorderResult<bool> {
        let url = self.url_template.replace("{channel}", channel);
        let failed = |reason: String| RecorderError::ProbeFailed {
            channel: channel.to_string(),
            reason,
        };

        let output = Command::new(&self.program)
            .arg(&url)
            .arg("--json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // Dropping the future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(format!("failed to run {}: {}", self.program, e))),
            Err(_) => return Err(failed(format!("timed out after {:?}", self.timeout))),
        };

        debug!(
            "Probe for '{}' exited with {:?} ({} bytes of output)",
            channel,
            output.status.code(),
            output.stdout.len()
        );

        parse_probe_output(output.status.success(), &output.stdout).map_err(failed)
    }

    fn prober_type(&self) -> &str {
        "streamlink"
    }
}

/// Errors streamlink reports when a channel simply is not live
const OFFLINE_ERRORS: &[&str] = &["No playable streams found"];

/// Interpret streamlink's `--json` output.
///
/// A non-empty `streams` object from a successful run means online. An
/// `error` object means offline only when it is one of the known "not live"
/// messages; network and plugin errors are reported the same way and must
/// not tear down a recording, so they are unknown answers.
pub fn parse_probe_output(success: bool, stdout: &[u8]) -> Result<bool, String> {
    let value: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| format!("unparseable probe output: {}", e))?;

    if let Some(streams) = value.get("streams") {
        let has_streams = streams.as_object().map(|s| !s.is_empty()).unwrap_or(false);
        if !has_streams {
            return Ok(false);
        }
        if !success {
            return Err("probe listed streams but exited unsuccessfully".to_string());
        }
        return Ok(true);
    }

    if let Some(error) = value.get("error") {
        let message = error.as_str().unwrap_or_default();
        if OFFLINE_ERRORS.iter().any(|known| message.starts_with(known)) {
            return Ok(false);
        }
        return Err(format!("streamlink error: {}", error));
    }

    Err(format!(
        "probe exited with success={} and no streams or error field",
        success
    ))
}
