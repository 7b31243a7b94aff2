//! Adaptive playback-rate controller
//!
//! Maps the jitter ring's occupancy to a fill ratio, evaluated once per
//! playback period. The ratio never changes how many ring slots are
//! consumed; it only decides how much of the due chunk reaches the
//! device, trading playback fidelity for occupancy recovery when the
//! buffer runs low. Ratios above 1.0 are clamped to a full-chunk copy
//! at render time, so the cursor advance stays one slot per period.

/// Pure occupancy → fill-ratio mapping
#[derive(Debug, Clone, Copy)]
pub struct RateController {
    /// Steady-state target occupancy (`chunks_to_buffer`)
    target: usize,
}

impl RateController {
    pub fn new(target: usize) -> Self {
        Self { target }
    }

    /// Fill ratio for the current buffer occupancy.
    ///
    /// Total over all occupancy values. The healthy-buffer branch is
    /// checked first, so for small targets it shadows the low-water
    /// branches below it.
    pub fn ratio(&self, occupancy: usize) -> f32 {
        if occupancy + 2 >= self.target {
            1.05
        } else if occupancy == 3 {
            0.95
        } else if occupancy == 2 {
            0.80
        } else if occupancy == 1 {
            0.60
        } else {
            1.0
        }
    }

    /// Frames of the due chunk to copy into a `frame_count`-frame
    /// period, clamped so the device's allotment is never exceeded.
    pub fn frames_to_copy(frame_count: usize, ratio: f32) -> usize {
        ((frame_count as f32 * ratio).round() as usize).min(frame_count)
    }

    pub fn target(&self) -> usize {
        self.target
    }
}
