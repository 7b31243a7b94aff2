//! Duplex audio stream driver
//!
//! Owns a paired cpal input and output stream and invokes a single
//! periodic callback once per hardware period with the just-captured
//! chunk and the output frame to fill. Captured chunks cross from the
//! input callback to the output callback through a small lock-free
//! queue; when capture falls behind, the callback runs with silence so
//! playback never stalls. Chunk buffers are recycled through a free
//! list so neither callback allocates once warm.
//!
//! The streams live on a dedicated thread because cpal streams are not
//! `Send` on every backend.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{find_input_device, find_output_device};
use crate::config::StreamParams;
use crate::constants::CAPTURE_QUEUE_CHUNKS;
use crate::error::AudioError;

/// Callback invoked once per hardware period.
///
/// Arguments are the captured interleaved int16 frame and the playback
/// frame to fill. The callback must return within one period.
pub type PeriodCallback = Arc<dyn Fn(&[i16], &mut [i16]) + Send + Sync>;

/// Paired capture/playback streams driving a [`PeriodCallback`]
pub struct DuplexAudio {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
    capture_overflows: Arc<AtomicUsize>,
}

impl DuplexAudio {
    /// Open the input and output devices and start the period callback.
    ///
    /// Stream construction happens on the driver thread; build failures
    /// surface through [`DuplexAudio::check_errors`].
    pub fn start(
        params: StreamParams,
        input_device: Option<String>,
        output_device: Option<String>,
        callback: PeriodCallback,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let capture_overflows = Arc::new(AtomicUsize::new(0));

        let config = StreamConfig {
            channels: params.channels,
            sample_rate: SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(params.frames_per_period),
        };
        let samples_per_chunk = params.samples_per_chunk();

        let running_thread = running.clone();
        let overflows = capture_overflows.clone();

        let handle = thread::Builder::new()
            .name("audio-duplex".to_string())
            .spawn(move || {
                let input = match find_input_device(input_device.as_deref()) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("Input device unavailable: {}", e);
                        let _ = error_tx.try_send(e);
                        return;
                    }
                };
                let output = match find_output_device(output_device.as_deref()) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("Output device unavailable: {}", e);
                        let _ = error_tx.try_send(e);
                        return;
                    }
                };

                let capture_queue: Arc<ArrayQueue<Vec<i16>>> =
                    Arc::new(ArrayQueue::new(CAPTURE_QUEUE_CHUNKS));
                // Free list feeding the input callback; sized so every
                // queue slot plus one in-flight buffer per side has a
                // home, keeping both callbacks allocation-free.
                let buffer_pool: Arc<ArrayQueue<Vec<i16>>> =
                    Arc::new(ArrayQueue::new(CAPTURE_QUEUE_CHUNKS + 2));
                for _ in 0..CAPTURE_QUEUE_CHUNKS + 2 {
                    let _ = buffer_pool.push(Vec::with_capacity(samples_per_chunk));
                }

                let queue_in = capture_queue.clone();
                let pool_in = buffer_pool.clone();
                let running_in = running_thread.clone();
                let in_error_tx = error_tx.clone();
                let input_stream = input.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if !running_in.load(Ordering::Relaxed) {
                            return;
                        }
                        let mut chunk = pool_in.pop().unwrap_or_default();
                        chunk.clear();
                        chunk.extend_from_slice(data);
                        // Drop the oldest chunk when the playback side
                        // falls behind; late capture is worthless.
                        if let Err(chunk) = queue_in.push(chunk) {
                            overflows.fetch_add(1, Ordering::Relaxed);
                            if let Some(stale) = queue_in.pop() {
                                let _ = pool_in.push(stale);
                            }
                            let _ = queue_in.push(chunk);
                        }
                    },
                    move |err| {
                        let _ = in_error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let queue_out = capture_queue;
                let pool_out = buffer_pool;
                let running_out = running_thread.clone();
                let out_error_tx = error_tx.clone();
                let silence = vec![0i16; samples_per_chunk];
                let output_stream = output.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        if !running_out.load(Ordering::Relaxed) {
                            data.fill(0);
                            return;
                        }
                        match queue_out.pop() {
                            Some(captured) => {
                                callback(&captured, data);
                                let _ = pool_out.push(captured);
                            }
                            None => callback(&silence, data),
                        }
                    },
                    move |err| {
                        let _ = out_error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let (input_stream, output_stream) = match (input_stream, output_stream) {
                    (Ok(i), Ok(o)) => (i, o),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!("Failed to build audio stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                        return;
                    }
                };

                if let Err(e) = input_stream.play().and_then(|_| output_stream.play()) {
                    tracing::error!("Failed to start audio streams: {}", e);
                    let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    return;
                }

                tracing::info!("Duplex audio running");
                while running_thread.load(Ordering::Relaxed) {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
                // Streams are dropped here, stopping the callbacks.
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            running,
            thread_handle: Some(handle),
            error_rx,
            capture_overflows,
        })
    }

    /// Stop both streams and join the driver thread. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.thread_handle.is_some()
    }

    /// Chunks dropped because playback fell behind capture
    pub fn capture_overflows(&self) -> usize {
        self.capture_overflows.load(Ordering::Relaxed)
    }

    /// Pop a pending stream error, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for DuplexAudio {
    fn drop(&mut self) {
        self.stop();
    }
}
