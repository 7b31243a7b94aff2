//! # LAN Audio Intercom
//!
//! Low-latency point-to-point full-duplex audio intercom over UDP.
//!
//! Each peer captures audio from its microphone, sends it as sequenced
//! datagrams, and plays back what the other peer sends through a
//! jitter-absorbing ring buffer with an adaptive playback-rate controller.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            LOCAL PEER                            │
//! │                                                                  │
//! │   ┌────────────┐  capture   ┌──────────────────────────────┐     │
//! │   │ Microphone ├───────────►│        PeriodDriver          │     │
//! │   └────────────┘            │  (audio callback, 1/period)  │     │
//! │   ┌────────────┐  playback  │                              │     │
//! │   │  Speakers  │◄───────────┤ capture ─► transform ─► send │     │
//! │   └────────────┘            │ occupancy ─► RateController  │     │
//! │                             │ read_next ─► render          │     │
//! │                             └───────┬──────────▲───────────┘     │
//! │                                     │          │ read_next       │
//! │                                send │   ┌──────┴───────┐         │
//! │                                     │   │  JitterRing  │         │
//! │                                     │   │ (seq-indexed │         │
//! │                                     │   │  slot array) │         │
//! │                                     │   └──────▲───────┘         │
//! │                                     │          │ write(seq, ..)  │
//! │                             ┌───────▼──────────┴───────────┐     │
//! │                             │ UdpTransport │  ReceiveLoop  │     │
//! │                             └───────┬──────────▲───────────┘     │
//! └─────────────────────────────────────┼──────────┼─────────────────┘
//!                                       │   UDP    │
//!                                       ▼          │
//!                                    REMOTE PEER (same layout)
//! ```
//!
//! The wire format is deliberately minimal: a 2-byte big-endian sequence
//! number followed by raw little-endian int16 PCM, one chunk per datagram.
//! Loss is never retransmitted; the ring buffer plays silence through the
//! gap and the rate controller trades playback fidelity for occupancy
//! recovery.

pub mod audio;
pub mod codec;
pub mod config;
pub mod dsp;
pub mod error;
pub mod network;
pub mod session;
pub mod telemetry;

pub use error::{Error, Result};
pub use session::{Intercom, SessionState};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default frames per period (one chunk)
    pub const DEFAULT_FRAMES_PER_PERIOD: u32 = 1024;

    /// Default buffering time in milliseconds
    pub const DEFAULT_BUFFERING_MS: u32 = 150;

    /// Default UDP port for the intercom
    pub const DEFAULT_UDP_PORT: u16 = 4444;

    /// Receive buffer size; one datagram carries exactly one chunk,
    /// this is the UDP payload ceiling
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Capacity of the capture→playback handoff queue, in chunks
    pub const CAPTURE_QUEUE_CHUNKS: usize = 8;

    /// Default telemetry sampling interval in seconds
    pub const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 1;
}
