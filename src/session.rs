//! Intercom session
//!
//! [`PeriodDriver`] is the real-time half: invoked once per hardware
//! period, it transmits the captured chunk and renders the next buffered
//! chunk, never blocking beyond a fire-and-forget send. [`Intercom`]
//! wires the driver to the audio device, the receive loop, and the
//! telemetry sampler, and owns the idempotent teardown.

use bytes::BytesMut;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::{Chunk, JitterRing};
use crate::audio::duplex::DuplexAudio;
use crate::audio::rate::RateController;
use crate::codec;
use crate::config::{IntercomConfig, StreamParams};
use crate::dsp::{self, ChunkTransform};
use crate::error::{NetworkError, Result};
use crate::network::receiver::{ReceiveLoop, ReceiveStats};
use crate::network::transport::UdpTransport;
use crate::telemetry::{CsvSink, LogSink, OccupancySampler, TelemetrySink};

/// Externally observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No datagram received yet; playing silence at target latency
    Seeding,
    /// Steady state: capture/send and buffered playback
    Streaming,
    /// Terminal; reached only through `close()`
    Closed,
}

const STATE_SEEDING: u8 = 0;
const STATE_STREAMING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Shared session state cell
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(STATE_SEEDING))
    }

    fn load(&self) -> SessionState {
        match self.0.load(Ordering::Acquire) {
            STATE_SEEDING => SessionState::Seeding,
            STATE_STREAMING => SessionState::Streaming,
            _ => SessionState::Closed,
        }
    }

    /// Seeding → Streaming; a closed session stays closed
    fn begin_streaming(&self) {
        let _ = self.0.compare_exchange(
            STATE_SEEDING,
            STATE_STREAMING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn close(&self) {
        self.0.store(STATE_CLOSED, Ordering::Release);
    }
}

/// Real-time per-period driver.
///
/// Each invocation: bump the production counter, transform and transmit
/// the captured chunk, evaluate the rate controller, and render the
/// next buffered chunk. A transmit failure is logged and must never
/// prevent the render step; playback continuity wins over send success.
pub struct PeriodDriver {
    ring: Arc<JitterRing>,
    transport: Arc<UdpTransport>,
    controller: RateController,
    /// Send-path state, locked once per period by the callback thread
    tx: Mutex<TxScratch>,
    /// Local production counter; wrapping 16-bit to match the wire field
    next_seq: AtomicU16,
    channels: usize,
    state: Arc<StateCell>,
}

/// Transform state plus reusable buffers; after the first period the
/// send path does not allocate.
struct TxScratch {
    transform: Box<dyn ChunkTransform>,
    samples: Vec<i16>,
    packet: BytesMut,
}

impl PeriodDriver {
    fn new(
        ring: Arc<JitterRing>,
        transport: Arc<UdpTransport>,
        transform: Box<dyn ChunkTransform>,
        channels: usize,
        state: Arc<StateCell>,
    ) -> Self {
        let controller = RateController::new(ring.chunks_to_buffer());
        Self {
            ring,
            transport,
            controller,
            tx: Mutex::new(TxScratch {
                transform,
                samples: Vec::new(),
                packet: BytesMut::new(),
            }),
            next_seq: AtomicU16::new(0),
            channels,
            state,
        }
    }

    /// One hardware period: capture out, playback in.
    pub fn process_period(&self, capture: &[i16], playback: &mut [i16]) {
        if self.state.load() == SessionState::Closed {
            playback.fill(0);
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        {
            let mut tx = self.tx.lock();
            let tx = &mut *tx;
            tx.samples.clear();
            tx.samples.extend_from_slice(capture);
            tx.transform.process(&mut tx.samples);
            codec::encode_into(&mut tx.packet, seq, &tx.samples);
            match self.transport.send(&tx.packet) {
                Ok(()) => {}
                // Transient while the peer is down; the receive loop
                // already logs it once.
                Err(NetworkError::PeerUnreachable(_)) => {
                    tracing::trace!("chunk {} undeliverable, peer down", seq);
                }
                Err(e) => tracing::warn!("send failed for chunk {}: {}", seq, e),
            }
        }

        let ratio = self.controller.ratio(self.ring.occupancy());
        let chunk = self.ring.read_next();
        self.render(&chunk, ratio, playback);
    }

    /// Copy `round(frames × ratio)` frames of the chunk into the output
    /// period (clamped to the device's allotment) and zero-fill the rest.
    fn render(&self, chunk: &Chunk, ratio: f32, playback: &mut [i16]) {
        let frame_count = playback.len() / self.channels;
        let frames = RateController::frames_to_copy(frame_count, ratio);
        let n = (frames * self.channels).min(chunk.len()).min(playback.len());
        playback[..n].copy_from_slice(&chunk.samples()[..n]);
        playback[n..].fill(0);
    }

    pub fn occupancy(&self) -> usize {
        self.ring.occupancy()
    }
}

/// Shuts the transport down on drop unless disarmed.
///
/// Used during session construction: once the receive loop exists, an
/// early error return drops it, and its `Drop` joins a thread parked in
/// `receive`. The transport must be shut down first or that join never
/// finishes.
struct TransportGuard {
    transport: Arc<UdpTransport>,
    armed: bool,
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        if self.armed {
            self.transport.shutdown();
        }
    }
}

/// A running intercom session
pub struct Intercom {
    params: StreamParams,
    ring: Arc<JitterRing>,
    transport: Arc<UdpTransport>,
    state: Arc<StateCell>,
    duplex: DuplexAudio,
    receive_loop: ReceiveLoop,
    sampler: OccupancySampler,
    fatal_rx: Receiver<NetworkError>,
    closed: AtomicBool,
}

impl Intercom {
    /// Build and start a full session: transport, receive loop,
    /// telemetry, and the duplex audio streams.
    pub fn start(config: &IntercomConfig) -> Result<Self> {
        let params = StreamParams::derive(&config.audio, &config.buffering)?;

        let ring = Arc::new(JitterRing::new(
            params.cells_in_buffer,
            params.chunks_to_buffer,
            params.samples_per_chunk(),
        ));
        let transport = Arc::new(UdpTransport::bind(
            config.network.listen_port,
            config.network.peer,
        )?);
        tracing::info!(
            "intercom bound to {:?}, peer {}",
            transport.local_addr().ok(),
            transport.peer_addr()
        );

        let state = Arc::new(StateCell::new());
        let driver = Arc::new(PeriodDriver::new(
            ring.clone(),
            transport.clone(),
            dsp::from_config(&config.transform),
            params.channels as usize,
            state.clone(),
        ));

        let (fatal_tx, fatal_rx) = crossbeam_channel::bounded(1);
        let streaming_state = state.clone();
        let receive_loop = ReceiveLoop::spawn(
            transport.clone(),
            ring.clone(),
            move |_| streaming_state.begin_streaming(),
            fatal_tx,
        )?;
        // Guard declared after the receive loop so it drops first on an
        // error return, unblocking the loop's join.
        let mut transport_guard = TransportGuard {
            transport: transport.clone(),
            armed: true,
        };

        let mut sinks: Vec<Box<dyn TelemetrySink>> = vec![Box::new(LogSink)];
        if let Some(path) = &config.telemetry.csv_path {
            sinks.push(Box::new(CsvSink::create(path)?));
        }
        let sampler = OccupancySampler::spawn(
            ring.clone(),
            sinks,
            Duration::from_secs(config.telemetry.interval_secs.max(1)),
        )?;

        let period_driver = driver.clone();
        let duplex = DuplexAudio::start(
            params,
            config.audio.input_device.clone(),
            config.audio.output_device.clone(),
            Arc::new(move |capture: &[i16], playback: &mut [i16]| {
                period_driver.process_period(capture, playback);
            }),
        )?;

        transport_guard.armed = false;
        Ok(Self {
            params,
            ring,
            transport,
            state,
            duplex,
            receive_loop,
            sampler,
            fatal_rx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    pub fn occupancy(&self) -> usize {
        self.ring.occupancy()
    }

    pub fn receive_stats(&self) -> ReceiveStats {
        self.receive_loop.stats()
    }

    /// Pop a pending audio stream error, if any
    pub fn check_audio_errors(&self) -> Option<crate::error::AudioError> {
        self.duplex.check_errors()
    }

    /// Channel that carries a fatal receive failure; the owner should
    /// call [`Intercom::close`] when it fires.
    pub fn fatal_errors(&self) -> &Receiver<NetworkError> {
        &self.fatal_rx
    }

    /// Tear the session down: stop scheduling the driver, unblock and
    /// join the receive loop, stop telemetry, release the transport.
    /// Idempotent; the session cannot be restarted afterwards.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("closing intercom session");
        self.state.close();
        self.duplex.stop();
        self.transport.shutdown();
        self.receive_loop.join();
        self.sampler.stop();
    }
}

impl Drop for Intercom {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::Identity;
    use std::net::UdpSocket;

    const CHANNELS: usize = 2;
    const FRAMES: usize = 4;
    const SAMPLES: usize = FRAMES * CHANNELS;

    struct Fixture {
        driver: PeriodDriver,
        ring: Arc<JitterRing>,
        remote: UdpSocket,
        state: Arc<StateCell>,
    }

    fn fixture(cells: usize, target: usize) -> Fixture {
        let remote = UdpSocket::bind("127.0.0.1:0").unwrap();
        remote
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let transport =
            Arc::new(UdpTransport::bind(0, remote.local_addr().unwrap()).unwrap());
        let ring = Arc::new(JitterRing::new(cells, target, SAMPLES));
        let state = Arc::new(StateCell::new());
        let driver = PeriodDriver::new(
            ring.clone(),
            transport,
            Box::new(Identity),
            CHANNELS,
            state.clone(),
        );
        Fixture {
            driver,
            ring,
            remote,
            state,
        }
    }

    #[test]
    fn test_period_sends_captured_chunk() {
        let f = fixture(10, 5);
        let capture = [7i16; SAMPLES];
        let mut playback = [0i16; SAMPLES];

        f.driver.process_period(&capture, &mut playback);

        let mut buf = [0u8; 64];
        let (n, _) = f.remote.recv_from(&mut buf).unwrap();
        let (seq, samples) = codec::decode(&buf[..n]).unwrap();
        assert_eq!(seq, 1); // counter bumps before packing
        assert_eq!(samples, vec![7i16; SAMPLES]);
    }

    #[test]
    fn test_sequence_counter_wraps_at_wire_modulus() {
        let f = fixture(10, 5);
        f.driver.next_seq.store(u16::MAX, Ordering::Relaxed);
        let capture = [1i16; SAMPLES];
        let mut playback = [0i16; SAMPLES];

        // MAX -> 0 -> 1 over two periods
        f.driver.process_period(&capture, &mut playback);
        f.driver.process_period(&capture, &mut playback);

        let mut buf = [0u8; 64];
        let (n, _) = f.remote.recv_from(&mut buf).unwrap();
        assert_eq!(codec::decode(&buf[..n]).unwrap().0, 0);
        let (n, _) = f.remote.recv_from(&mut buf).unwrap();
        assert_eq!(codec::decode(&buf[..n]).unwrap().0, 1);
    }

    #[test]
    fn test_period_renders_buffered_chunk() {
        let f = fixture(10, 5);
        // Healthy occupancy: write five chunks ahead of the cursor.
        for seq in 0..5u16 {
            f.ring
                .write(seq, Chunk::from_samples(vec![seq as i16 + 1; SAMPLES]));
        }
        let capture = [0i16; SAMPLES];
        let mut playback = [99i16; SAMPLES];

        f.driver.process_period(&capture, &mut playback);
        // Play cursor started at 0: slot 0 holds chunk seq 0.
        assert_eq!(playback, [1i16; SAMPLES]);

        f.driver.process_period(&capture, &mut playback);
        assert_eq!(playback, [2i16; SAMPLES]);
    }

    #[test]
    fn test_low_occupancy_truncates_and_zero_fills() {
        let f = fixture(20, 10);
        // occupancy 2 → ratio 0.80 → 3 of 4 frames copied
        f.ring
            .write(0, Chunk::from_samples(vec![5i16; SAMPLES]));
        f.ring.write(2, Chunk::silence(SAMPLES));

        let capture = [0i16; SAMPLES];
        let mut playback = [99i16; SAMPLES];
        f.driver.process_period(&capture, &mut playback);

        // round(4 * 0.8) = 3 frames = 6 samples copied, tail zeroed
        assert_eq!(&playback[..6], &[5i16; 6]);
        assert_eq!(&playback[6..], &[0i16; 2]);
    }

    #[test]
    fn test_send_failure_does_not_stop_playback() {
        let f = fixture(10, 5);
        // Force transmit failure by closing the transport side the
        // driver sends through.
        f.driver.transport.shutdown();
        f.ring
            .write(0, Chunk::from_samples(vec![3i16; SAMPLES]));
        f.ring.write(4, Chunk::silence(SAMPLES));

        let capture = [1i16; SAMPLES];
        let mut playback = [0i16; SAMPLES];
        f.state.begin_streaming();
        f.driver.process_period(&capture, &mut playback);

        // Step 4 still completed for this period.
        assert_eq!(playback, [3i16; SAMPLES]);
    }

    #[test]
    fn test_closed_driver_outputs_silence() {
        let f = fixture(10, 5);
        f.ring
            .write(0, Chunk::from_samples(vec![3i16; SAMPLES]));
        f.state.close();

        let capture = [1i16; SAMPLES];
        let mut playback = [9i16; SAMPLES];
        f.driver.process_period(&capture, &mut playback);
        assert_eq!(playback, [0i16; SAMPLES]);
        // Nothing was transmitted either.
        f.remote
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 64];
        assert!(f.remote.recv_from(&mut buf).is_err());
    }

    #[test]
    fn test_state_transitions() {
        let state = StateCell::new();
        assert_eq!(state.load(), SessionState::Seeding);
        state.begin_streaming();
        assert_eq!(state.load(), SessionState::Streaming);
        state.close();
        assert_eq!(state.load(), SessionState::Closed);
        // Terminal: no way back to streaming.
        state.begin_streaming();
        assert_eq!(state.load(), SessionState::Closed);
    }

    #[test]
    fn test_intercom_close_is_idempotent() {
        let mut config = IntercomConfig::default();
        config.network.listen_port = 0; // ephemeral
        config.network.peer = "127.0.0.1:9".parse().unwrap();

        let mut intercom = Intercom::start(&config).unwrap();
        assert_eq!(intercom.state(), SessionState::Seeding);
        assert_eq!(intercom.occupancy(), 0);

        intercom.close();
        assert_eq!(intercom.state(), SessionState::Closed);
        // A second close must not fault.
        intercom.close();
        assert_eq!(intercom.state(), SessionState::Closed);
    }

    #[test]
    fn test_start_with_bad_csv_path_fails_promptly() {
        let mut config = IntercomConfig::default();
        config.network.listen_port = 0; // ephemeral
        config.network.peer = "127.0.0.1:9".parse().unwrap();
        // A CSV path in a directory that does not exist fails after the
        // receive loop has already been spawned.
        config.telemetry.csv_path = Some(
            std::env::temp_dir()
                .join(format!("intercom-no-such-dir-{}", std::process::id()))
                .join("telemetry.csv"),
        );

        let started = std::time::Instant::now();
        assert!(Intercom::start(&config).is_err());
        // The error path must unblock and join the receive loop rather
        // than hang on it.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_steady_state_occupancy_holds_near_target() {
        // Simulate symmetric production: one write per period, starting
        // seeded at the target. Occupancy must stay pinned.
        let f = fixture(10, 5);
        f.ring.write(100, Chunk::silence(SAMPLES));
        f.ring.seed(100);
        let capture = [0i16; SAMPLES];
        let mut playback = [0i16; SAMPLES];

        for i in 1..50u16 {
            f.ring.write(100u16.wrapping_add(i), Chunk::silence(SAMPLES));
            f.driver.process_period(&capture, &mut playback);
            assert_eq!(f.ring.occupancy(), 5);
        }
    }
}
