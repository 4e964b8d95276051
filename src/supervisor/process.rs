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

// Capture process capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::error::{RecorderError, RecorderResult};

/// How a capture process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    /// `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running external capture process
#[async_trait]
pub trait CaptureProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check
    fn try_wait(&mut self) -> std::io::Result<Option<ProcessExit>>;

    /// Ask the process to finish its file and exit, force-killing it once
    /// `grace` elapses. Returns once the process is gone.
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<ProcessExit>;
}

/// Launches capture processes
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn spawn(&self, channel: &str, output: &Path) -> RecorderResult<Box<dyn CaptureProcess>>;

    fn backend_type(&self) -> &str;
}

/// Runs `streamlink <url> <quality> -o <output>`
pub struct StreamlinkBackend {
    config: CaptureConfig,
}

impl StreamlinkBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CaptureBackend for StreamlinkBackend {
    async fn spawn(&self, channel: &str, output: &Path) -> RecorderResult<Box<dyn CaptureProcess>> {
        let mut child = Command::new(&self.config.program)
            .arg(self.config.channel_url(channel))
            .arg(&self.config.quality)
            .arg("-o")
            .arg(output)
            .args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RecorderError::CaptureSpawn {
                channel: channel.to_string(),
                source,
            })?;

        if let Some(stderr) = child.stderr.take() {
            let channel = channel.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{}] {}", channel, line);
                }
            });
        }

        debug!(
            "Spawned {} for '{}' (pid {:?}) writing {}",
            self.config.program,
            channel,
            child.id(),
            output.display()
        );

        Ok(Box::new(StreamlinkProcess { child }))
    }

    fn backend_type(&self) -> &str {
        "streamlink"
    }
}

struct StreamlinkProcess {
    child: Child,
}

impl StreamlinkProcess {
    /// SIGTERM lets streamlink close the output file cleanly
    fn request_stop(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: plain kill(2) on a pid we own and have not reaped yet
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                return Ok(());
            }
            return Err(std::io::Error::last_os_error());
        }

        self.child.start_kill()
    }
}

#[async_trait]
impl CaptureProcess for StreamlinkProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }

    async fn terminate(&mut self, grace: Duration) -> std::io::Result<ProcessExit> {
        if let Some(exit) = self.try_wait()? {
            return Ok(exit);
        }

        if let Err(e) = self.request_stop() {
            warn!("Graceful stop request failed: {}", e);
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(ProcessExit {
                code: status?.code(),
            }),
            Err(_) => {
                warn!(
                    "Capture process {:?} ignored stop request for {:?}, killing",
                    self.child.id(),
                    grace
                );
                self.child.kill().await?;
                let status = self.child.wait().await?;
                Ok(ProcessExit {
                    code: status.code(),
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell_backend(script: &str) -> StreamlinkBackend {
        // `sh -c <script> <url> <quality> -o <output>`
        StreamlinkBackend::new(CaptureConfig {
            program: "sh".to_string(),
            url_template: "-c".to_string(),
            quality: script.to_string(),
            ..CaptureConfig::default()
        })
    }

    #[tokio::test]
    async fn test_terminate_running_process() {
        let temp_dir = TempDir::new().unwrap();
        let backend = shell_backend("sleep 30");
        let mut process = backend
            .spawn("alice", &temp_dir.path().join("out.ts"))
            .await
            .unwrap();

        assert!(process.try_wait().unwrap().is_none());
        let exit = process.terminate(Duration::from_secs(2)).await.unwrap();
        // Killed by SIGTERM
        assert!(!exit.success());
        assert!(process.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exited_process_reports_code() {
        let temp_dir = TempDir::new().unwrap();
        let backend = shell_backend("exit 3");
        let mut process = backend
            .spawn("alice", &temp_dir.path().join("out.ts"))
            .await
            .unwrap();

        let mut exit = None;
        for _ in 0..100 {
            exit = process.try_wait().unwrap();
            if exit.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(exit, Some(ProcessExit { code: Some(3) }));
        // Terminating an exited process just reports the exit
        let exit = process.terminate(Duration::from_secs(2)).await.unwrap();
        assert_eq!(exit.code, Some(3));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let backend = StreamlinkBackend::new(CaptureConfig {
            program: "/nonexistent/capture-tool".to_string(),
            ..CaptureConfig::default()
        });
        let result = backend.spawn("alice", Path::new("/tmp/out.ts")).await;
        assert!(matches!(result, Err(RecorderError::CaptureSpawn { .. })));
    }
}
