//! Configuration surface
//!
//! All values are immutable once a session is constructed. The derived
//! [`StreamParams`] carry the buffer sizing every subsystem agrees on.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration, loadable from TOML
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IntercomConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub buffering: BufferingConfig,
    pub telemetry: TelemetryConfig,
    pub transform: TransformConfig,
}

impl IntercomConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Network endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local UDP port to bind
    pub listen_port: u16,
    /// Peer address datagrams are sent to
    pub peer: SocketAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_UDP_PORT,
            peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_UDP_PORT),
        }
    }
}

/// Audio device and format configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Hardware period length in frames; one chunk per period
    pub frames_per_period: u32,
    /// Input device name; `None` selects the default device
    pub input_device: Option<String>,
    /// Output device name; `None` selects the default device
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frames_per_period: DEFAULT_FRAMES_PER_PERIOD,
            input_device: None,
            output_device: None,
        }
    }
}

/// Jitter buffering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Target latency in milliseconds; values below 1 are coerced to 1
    pub target_latency_ms: i64,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            target_latency_ms: DEFAULT_BUFFERING_MS as i64,
        }
    }
}

/// Occupancy telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sampling interval in seconds
    pub interval_secs: u64,
    /// Optional CSV file to append occupancy samples to
    pub csv_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_TELEMETRY_INTERVAL_SECS,
            csv_path: None,
        }
    }
}

/// Capture-side transform selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    /// Pass captured audio through unchanged
    #[default]
    None,
    /// Normalized LMS echo cancellation
    EchoCancel {
        #[serde(default = "default_taps")]
        taps: usize,
        #[serde(default = "default_mu")]
        mu: f32,
        #[serde(default = "default_eps")]
        eps: f32,
        /// Chunks between filter weight updates
        #[serde(default = "default_adapt_interval")]
        adapt_interval: u32,
    },
}

fn default_taps() -> usize {
    4
}

fn default_mu() -> f32 {
    0.5
}

fn default_eps() -> f32 {
    1.0
}

fn default_adapt_interval() -> u32 {
    50
}

/// Derived per-stream parameters, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_period: u32,
    /// Duration of one chunk in seconds
    pub chunk_time: f64,
    /// Chunks held back before playback starts (the target occupancy)
    pub chunks_to_buffer: usize,
    /// Ring capacity: twice the target occupancy
    pub cells_in_buffer: usize,
}

impl StreamParams {
    /// Derive buffer sizing from the audio format and target latency.
    ///
    /// A non-positive latency is coerced to 1 ms; zero-valued format
    /// fields are fatal.
    pub fn derive(audio: &AudioConfig, buffering: &BufferingConfig) -> Result<Self> {
        if audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".into()));
        }
        if audio.channels == 0 {
            return Err(Error::Config("channels must be positive".into()));
        }
        if audio.frames_per_period == 0 {
            return Err(Error::Config("frames_per_period must be positive".into()));
        }

        let mut latency_ms = buffering.target_latency_ms;
        if latency_ms <= 0 {
            tracing::warn!(
                "target_latency_ms = {} is not positive, coercing to 1 ms",
                latency_ms
            );
            latency_ms = 1;
        }

        let chunk_time = audio.frames_per_period as f64 / audio.sample_rate as f64;
        let chunks_to_buffer = ((latency_ms as f64 / 1000.0) / chunk_time).ceil().max(1.0) as usize;
        let cells_in_buffer = chunks_to_buffer * 2;

        tracing::info!(
            "buffering_time = {} ms, chunks_to_buffer = {}, cells_in_buffer = {}",
            latency_ms,
            chunks_to_buffer,
            cells_in_buffer
        );

        Ok(Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            frames_per_period: audio.frames_per_period,
            chunk_time,
            chunks_to_buffer,
            cells_in_buffer,
        })
    }

    /// Interleaved samples per chunk
    pub fn samples_per_chunk(&self) -> usize {
        self.frames_per_period as usize * self.channels as usize
    }
}
