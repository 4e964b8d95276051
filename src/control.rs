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

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::RecorderResult;
use crate::protocol::{Channel, ChannelCommand, ChannelRequest, ChannelResponse};
use crate::recorder::ChannelManager;

/// Control interface for channel commands
///
/// Speaks newline-delimited JSON: one `ChannelRequest` per line in, one
/// `ChannelResponse` per line out.
pub struct ControlInterface {
    manager: Arc<ChannelManager>,
}

impl ControlInterface {
    pub fn new(manager: Arc<ChannelManager>) -> Self {
        Self { manager }
    }

    /// Serve connections from `listener` (blocks until the task is dropped)
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        info!("Control interface listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Control connection from {}", peer);
            let manager = self.manager.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, manager).await {
                    error!("Error handling control connection from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(stream: TcpStream, manager: Arc<ChannelManager>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<ChannelRequest>(&line) {
                Ok(request) => Self::handle_request(&manager, request).await,
                Err(e) => {
                    warn!("Malformed control request: {}", e);
                    ChannelResponse::error(format!("Malformed request: {}", e))
                }
            };

            let mut response_bytes = serde_json::to_vec(&response)?;
            response_bytes.push(b'\n');
            writer.write_all(&response_bytes).await?;
        }

        Ok(())
    }

    /// Dispatch one request to the channel manager
    pub async fn handle_request(manager: &ChannelManager, request: ChannelRequest) -> ChannelResponse {
        info!("Processing command: {:?} {:?}", request.command, request.channel);

        let response = match (request.command, request.channel.as_deref()) {
            (ChannelCommand::List, _) => {
                let channels = manager.list_channels().await;
                let free_space = manager.free_space_bytes().await;
                let message = match free_space {
                    Some(bytes) => format!(
                        "{} channel(s), {} GB free",
                        channels.len(),
                        bytes / (1024 * 1024 * 1024)
                    ),
                    None => format!("{} channel(s)", channels.len()),
                };
                ChannelResponse::success(message)
                    .with_channels(channels)
                    .with_free_space(free_space)
            }
            (_, None) => ChannelResponse::error("Missing channel name"),
            (ChannelCommand::Add, Some(name)) => {
                Self::channel_response(manager.add_channel(name).await, "added, waiting to go live")
            }
            (ChannelCommand::Remove, Some(name)) => {
                Self::channel_response(manager.remove_channel(name).await, "removed")
            }
            (ChannelCommand::Pause, Some(name)) => {
                Self::channel_response(manager.pause_channel(name).await, "paused")
            }
            (ChannelCommand::Resume, Some(name)) => Self::channel_response(
                manager.resume_channel(name).await,
                "resumed, recording starts when it is live",
            ),
            (ChannelCommand::Get, Some(name)) => {
                Self::channel_response(manager.get_channel(name).await, "found")
            }
            (ChannelCommand::Segments, Some(name)) => match manager.list_segments(name).await {
                Ok(segments) => ChannelResponse::success(format!("{} segment(s)", segments.len()))
                    .with_segments(segments),
                Err(e) => ChannelResponse::error(e.to_string()),
            },
        };

        ChannelResponse {
            degraded_persistence: manager.is_persistence_degraded(),
            ..response
        }
    }

    fn channel_response(result: RecorderResult<Channel>, action: &str) -> ChannelResponse {
        match result {
            Ok(channel) => {
                ChannelResponse::success(format!("Channel {} {}", channel.name, action))
                    .with_channel(channel)
            }
            Err(e) => {
                if !e.is_user_error() {
                    error!("Channel command failed: {}", e);
                }
                ChannelResponse::error(e.to_string())
            }
        }
    }
}
