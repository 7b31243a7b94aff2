//! Capture-side transforms
//!
//! An optional transform applied to each captured chunk before it is
//! encoded and transmitted. Transforms are injected by configuration
//! and are deliberately outside the buffering engine: swapping one in
//! or out changes nothing about sequencing, buffering, or playback.

use crate::config::TransformConfig;

/// In-place transform over one captured chunk.
///
/// Implementations must preserve the chunk length and must be fast
/// enough to run inside the real-time period callback.
pub trait ChunkTransform: Send {
    fn process(&mut self, samples: &mut [i16]);
}

/// Pass-through transform
pub struct Identity;

impl ChunkTransform for Identity {
    fn process(&mut self, _samples: &mut [i16]) {}
}

/// Normalized least-mean-square echo canceller.
///
/// A short adaptive linear predictor over the capture signal: each
/// sample's predicted echo component (a weighted sum of the preceding
/// `taps` samples) is subtracted, and the weights adapt toward the
/// prediction error every `adapt_interval` chunks.
pub struct NlmsEchoCanceller {
    weights: Vec<f32>,
    mu: f32,
    eps: f32,
    adapt_interval: u32,
    chunk_counter: u32,
}

impl NlmsEchoCanceller {
    pub fn new(taps: usize, mu: f32, eps: f32, adapt_interval: u32) -> Self {
        Self {
            weights: vec![0.0; taps.max(1)],
            mu,
            eps,
            adapt_interval: adapt_interval.max(1),
            chunk_counter: 0,
        }
    }

    fn taps(&self) -> usize {
        self.weights.len()
    }

    fn predict(&self, window: &[f32]) -> f32 {
        self.weights.iter().zip(window).map(|(w, x)| w * x).sum()
    }

    fn adapt(&mut self, error: f32, window: &[f32]) {
        let energy: f32 = window.iter().map(|x| x * x).sum();
        let step = self.mu / (self.eps + energy);
        for (w, x) in self.weights.iter_mut().zip(window) {
            *w += step * error * x;
        }
    }
}

impl ChunkTransform for NlmsEchoCanceller {
    fn process(&mut self, samples: &mut [i16]) {
        let taps = self.taps();
        if samples.len() <= taps {
            return;
        }

        // Weight update is throttled to one window per interval to keep
        // the per-period cost bounded.
        self.chunk_counter += 1;
        if self.chunk_counter >= self.adapt_interval {
            self.chunk_counter = 0;
            let window: Vec<f32> = samples[..taps].iter().map(|&s| s as f32).collect();
            let target = samples[taps] as f32;
            let error = target - self.predict(&window);
            self.adapt(error, &window);
        }

        let history: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
        for i in taps..samples.len() {
            let predicted = self.predict(&history[i - taps..i]);
            let cleaned = history[i] - predicted;
            samples[i] = cleaned.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
}

/// Build the configured transform
pub fn from_config(config: &TransformConfig) -> Box<dyn ChunkTransform> {
    match *config {
        TransformConfig::None => Box::new(Identity),
        TransformConfig::EchoCancel {
            taps,
            mu,
            eps,
            adapt_interval,
        } => {
            tracing::info!(
                "echo cancellation enabled: {} taps, mu = {}, eps = {}",
                taps,
                mu,
                eps
            );
            Box::new(NlmsEchoCanceller::new(taps, mu, eps, adapt_interval))
        }
    }
}
