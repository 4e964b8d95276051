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

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use channel_recorder::config::load_config_with_env;
use channel_recorder::{
    ChannelManager, ChannelRegistry, ControlInterface, ManagerSettings, Scheduler,
    StreamlinkBackend, StreamlinkProber,
};

/// Channel Recorder - Record live channels while they are online
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Control port (overrides config file and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Recordings directory (overrides config file and RECORDINGS_DIR)
    #[arg(short, long)]
    recordings_dir: Option<PathBuf>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file and environment
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.control.port = port;
    }
    if let Some(dir) = args.recordings_dir {
        config.recordings.dir = dir;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Channel Recorder");
    info!("Configuration: {:?}", args.config);
    info!("Channels file: {}", config.registry.channels_file.display());
    info!("Recordings directory: {}", config.recordings.dir.display());
    info!(
        "Quality: {}, max segment size: {} bytes",
        config.capture.quality, config.recordings.max_segment_bytes
    );

    let settings = ManagerSettings::from_config(&config);
    settings
        .layout
        .ensure_base_directory()
        .await
        .context("Failed to create recordings directory")?;

    let registry = Arc::new(
        ChannelRegistry::open(
            config.registry.channels_file.clone(),
            config.registry.persist_retries,
        )
        .await,
    );
    let prober = Arc::new(StreamlinkProber::from_config(&config.capture, &config.probe));
    let backend = Arc::new(StreamlinkBackend::new(config.capture.clone()));

    let manager = Arc::new(ChannelManager::new(registry, prober, backend, settings).await);

    // Capture events (rotation, crashes)
    let events = tokio::spawn(manager.clone().run_event_loop());

    // Liveness loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::from_config(manager.clone(), &config);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    // Control interface
    let listener = TcpListener::bind(config.control.listen_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.control.listen_addr()))?;
    let control_interface = ControlInterface::new(manager.clone());

    // Run until Ctrl+C
    tokio::select! {
        result = control_interface.run(listener) => {
            if let Err(e) = result {
                error!("Control interface error: {}", e);
            }
            info!("Control interface stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // Cleanup
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    manager.shutdown().await;
    events.abort();
    info!("Channel Recorder shut down successfully");

    Ok(())
}
