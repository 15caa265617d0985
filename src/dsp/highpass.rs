//! One-pole highpass filter.
//!
//! Removes DC offset and sub-audio rumble from the synthesizer output. Each
//! channel of an interleaved buffer keeps its own state.

use std::f32::consts::TAU;

/// Maximum number of interleaved channels the filter tracks.
const MAX_CHANNELS: usize = 8;

/// RC-style highpass: `y[n] = a * (y[n-1] + x[n] - x[n-1])`.
#[derive(Debug, Clone)]
pub struct HighPass {
    cutoff_hz: f32,
    sample_rate: f32,
    /// Feedback coefficient. Zero when bypassed.
    alpha: f32,
    prev_in: [f32; MAX_CHANNELS],
    prev_out: [f32; MAX_CHANNELS],
}

impl HighPass {
    /// Creates a filter. A cutoff of 0 Hz bypasses it.
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let mut filter = Self {
            cutoff_hz: 0.0,
            sample_rate,
            alpha: 0.0,
            prev_in: [0.0; MAX_CHANNELS],
            prev_out: [0.0; MAX_CHANNELS],
        };
        filter.set_cutoff(cutoff_hz);
        filter
    }

    /// Changes the cutoff. Filter state is kept so the change is click-free.
    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        self.cutoff_hz = cutoff_hz.max(0.0);
        self.alpha = if self.cutoff_hz > 0.0 && self.sample_rate > 0.0 {
            let rc = 1.0 / (TAU * self.cutoff_hz);
            let dt = 1.0 / self.sample_rate;
            rc / (rc + dt)
        } else {
            0.0
        };
    }

    #[cfg(test)]
    fn cutoff(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn is_bypassed(&self) -> bool {
        self.cutoff_hz <= 0.0
    }

    /// Clears the filter history.
    pub fn reset(&mut self) {
        self.prev_in = [0.0; MAX_CHANNELS];
        self.prev_out = [0.0; MAX_CHANNELS];
    }

    /// Filters an interleaved buffer in place.
    pub fn process(&mut self, buffer: &mut [f32], channels: usize) {
        if self.is_bypassed() || channels == 0 {
            return;
        }
        let channels = channels.min(MAX_CHANNELS);
        for frame in buffer.chunks_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let x = *sample;
                let y = self.alpha * (self.prev_out[ch] + x - self.prev_in[ch]);
                self.prev_in[ch] = x;
                self.prev_out[ch] = y;
                *sample = y;
            }
        }
    }
}
