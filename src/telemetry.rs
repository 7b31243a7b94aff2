//! Occupancy telemetry
//!
//! A low-priority sampler thread reads the jitter ring's occupancy on a
//! fixed wall-clock interval and forwards `(timestamp, occupancy)` to
//! the configured sinks. Sampling may be delayed or skipped without
//! affecting correctness; the value it reads is eventually-consistent
//! by design.

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::JitterRing;

/// Destination for occupancy samples
pub trait TelemetrySink: Send {
    fn record(&mut self, timestamp: DateTime<Utc>, occupancy: usize);
}

/// Sink that emits occupancy through the log
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&mut self, _timestamp: DateTime<Utc>, occupancy: usize) {
        tracing::info!(occupancy, "chunks in buffer");
    }
}

/// Sink that appends occupancy samples to a CSV file
pub struct CsvSink {
    writer: BufWriter<File>,
}

impl CsvSink {
    /// Create (truncating) the CSV file and write its header
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "timestamp,chunks_in_buffer")?;
        writer.flush()?;
        tracing::info!("logging buffer status to {}", path.display());
        Ok(Self { writer })
    }
}

impl TelemetrySink for CsvSink {
    fn record(&mut self, timestamp: DateTime<Utc>, occupancy: usize) {
        // One row per second; flushing every row keeps the file useful
        // if the process is killed.
        let _ = writeln!(self.writer, "{},{}", timestamp.to_rfc3339(), occupancy);
        let _ = self.writer.flush();
    }
}

/// Periodic occupancy sampler thread
pub struct OccupancySampler {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OccupancySampler {
    pub fn spawn(
        ring: Arc<JitterRing>,
        mut sinks: Vec<Box<dyn TelemetrySink>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || loop {
                let now = Utc::now();
                let occupancy = ring.occupancy();
                for sink in sinks.iter_mut() {
                    sink.record(now, occupancy);
                }
                // Waiting on the shutdown channel rather than sleeping
                // lets `stop` interrupt a long interval immediately.
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            })?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the sampler and join its thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OccupancySampler {
    fn drop(&mut self) {
        self.stop();
    }
}
