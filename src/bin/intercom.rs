//! Intercom Application
//!
//! Full-duplex point-to-point audio over UDP: captures the local
//! microphone, streams it to the peer, and plays the peer's audio
//! through the jitter buffer.

use anyhow::Result;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_audio_intercom::{
    audio::list_devices,
    config::IntercomConfig,
    Intercom, SessionState,
};

const CONFIG_FILE: &str = "intercom.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Audio Intercom");

    // Load config if present, then let the command line override the peer
    let mut config = if Path::new(CONFIG_FILE).exists() {
        tracing::info!("Loading configuration from {}", CONFIG_FILE);
        IntercomConfig::load(Path::new(CONFIG_FILE))?
    } else {
        IntercomConfig::default()
    };

    if let Some(peer) = std::env::args().nth(1) {
        config.network.peer = peer.parse().map_err(|e| {
            anyhow::anyhow!("invalid peer address '{}': {}", peer, e)
        })?;
    }

    // List available devices
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();

    tracing::info!("Peer: {}", config.network.peer);
    tracing::info!("Listening on UDP port {}", config.network.listen_port);

    let mut intercom = Intercom::start(&config)?;
    tracing::info!("Press Ctrl+C to quit");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_stats = Instant::now();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("SIGINT received");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if let Ok(e) = intercom.fatal_errors().try_recv() {
                    tracing::error!("Fatal network error: {}", e);
                    break;
                }
                if let Some(e) = intercom.check_audio_errors() {
                    tracing::error!("Audio error: {}", e);
                    break;
                }
                if last_stats.elapsed() >= Duration::from_secs(5) {
                    last_stats = Instant::now();
                    let stats = intercom.receive_stats();
                    tracing::info!(
                        "state: {:?}, occupancy: {}/{}, received: {} packets ({} bytes), {} malformed",
                        intercom.state(),
                        intercom.occupancy(),
                        intercom.params().cells_in_buffer,
                        stats.packets_received,
                        stats.bytes_received,
                        stats.malformed_packets,
                    );
                    if intercom.state() == SessionState::Seeding {
                        tracing::info!("Waiting for the first chunk from the peer...");
                    }
                }
            }
        }
    }

    intercom.close();
    Ok(())
}
