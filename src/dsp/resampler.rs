//! Streaming sample-rate converter.
//!
//! Converts interleaved frames from the internal synthesis rate to the device rate.
//! The converter keeps a short history of input frames so blocks can be fed one at
//! a time with no discontinuity at block boundaries.
//!
//! Position bookkeeping: the history always starts one frame before the frame that
//! contains the read position, so every interpolator can see frames `i - 1 ..= i + 2`.
//! A single zero frame is primed at the front of a fresh stream, which makes the
//! first output sample coincide with the first input frame.
//!
//! Interpolation alone does not band-limit. When [`Quality::Cubic`] downsamples,
//! input first passes a linear-phase windowed-sinc lowpass below the output
//! Nyquist frequency; its fixed delay is folded into the read position so output
//! stays aligned with input. Nearest and linear conversion skip the filter and
//! alias content above the output Nyquist frequency.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Conversion quality / latency trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Nearest input frame. No filtering.
    Nearest,
    /// Linear interpolation between neighbouring frames.
    Linear,
    /// Four-point Catmull-Rom interpolation, with an anti-alias lowpass when
    /// downsampling.
    #[default]
    Cubic,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Nearest => write!(f, "nearest"),
            Quality::Linear => write!(f, "linear"),
            Quality::Cubic => write!(f, "cubic"),
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "fast" => Ok(Quality::Nearest),
            "linear" => Ok(Quality::Linear),
            "cubic" | "best" => Ok(Quality::Cubic),
            other => Err(format!("unknown resampler quality '{}'", other)),
        }
    }
}

/// Anti-alias filter length. Odd, so the delay is a whole number of frames.
const ANTI_ALIAS_TAPS: usize = 63;

/// Anti-alias cutoff as a fraction of the output Nyquist frequency.
const ANTI_ALIAS_CUTOFF: f64 = 0.9;

/// Blackman-windowed sinc lowpass over interleaved frames.
#[derive(Debug, Clone)]
struct AntiAlias {
    taps: Vec<f32>,
    /// Raw input: the last `taps.len() - 1` frames, then anything not yet filtered.
    tail: Vec<f32>,
}

impl AntiAlias {
    /// `cutoff` is in cycles per input frame.
    fn new(cutoff: f64, channels: usize) -> Self {
        let order = ANTI_ALIAS_TAPS - 1;
        let center = order as f64 / 2.0;
        let raw: Vec<f64> = (0..ANTI_ALIAS_TAPS)
            .map(|i| {
                let x = i as f64 - center;
                let sinc = if x == 0.0 {
                    2.0 * cutoff
                } else {
                    (TAU * cutoff * x).sin() / (PI * x)
                };
                let phase = TAU * i as f64 / order as f64;
                sinc * (0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos())
            })
            .collect();
        let dc: f64 = raw.iter().sum();
        Self {
            taps: raw.iter().map(|h| (h / dc) as f32).collect(),
            tail: vec![0.0; order * channels],
        }
    }

    /// Frames of delay the filter adds.
    fn delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    /// Filters `input` and appends one output frame per input frame to `out`.
    fn process(&mut self, input: &[f32], channels: usize, out: &mut Vec<f32>) {
        let order = self.taps.len() - 1;
        self.tail.extend_from_slice(input);
        let frames = self.tail.len() / channels;
        for n in order..frames {
            for ch in 0..channels {
                let sample: f32 = self
                    .taps
                    .iter()
                    .enumerate()
                    .map(|(k, h)| h * self.tail[(n - k) * channels + ch])
                    .sum();
                out.push(sample);
            }
        }
        self.tail.drain(..(frames - order) * channels);
    }
}

/// Streaming resampler over interleaved `f32` frames.
#[derive(Debug, Clone)]
pub struct Resampler {
    quality: Quality,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    /// Input frames advanced per output frame.
    step: f64,
    /// Read position in frames, relative to the start of `history`.
    pos: f64,
    /// Interleaved input frames not yet fully consumed.
    history: Vec<f32>,
    anti_alias: Option<AntiAlias>,
}

impl Resampler {
    /// Creates a resampler for `channels`-channel audio.
    pub fn new(quality: Quality, channels: usize, input_rate: u32, output_rate: u32) -> Self {
        let channels = channels.max(1);
        let mut resampler = Self {
            quality,
            channels,
            input_rate: input_rate.max(1),
            output_rate: output_rate.max(1),
            step: 1.0,
            pos: 1.0,
            history: Vec::new(),
            anti_alias: None,
        };
        resampler.reset();
        resampler
    }

    /// Discards history and restarts the stream.
    pub fn reset(&mut self) {
        self.step = self.input_rate as f64 / self.output_rate as f64;
        self.anti_alias = (self.quality == Quality::Cubic && self.output_rate < self.input_rate)
            .then(|| {
                let nyquist = 0.5 * self.output_rate as f64 / self.input_rate as f64;
                AntiAlias::new(ANTI_ALIAS_CUTOFF * nyquist, self.channels)
            });
        self.pos = 1.0 + self.filter_delay() as f64;
        self.history.clear();
        self.history.resize(self.channels, 0.0);
    }

    /// Frames of delay added by the anti-alias filter, if any.
    pub fn filter_delay(&self) -> usize {
        self.anti_alias.as_ref().map_or(0, AntiAlias::delay)
    }

    /// Changes the output rate. Resets the stream.
    pub fn set_output_rate(&mut self, output_rate: u32) {
        self.output_rate = output_rate.max(1);
        self.reset();
    }

    /// Changes the channel count. Resets the stream.
    pub fn set_channels(&mut self, channels: usize) {
        self.channels = channels.max(1);
        self.reset();
    }

    /// Output/input rate ratio.
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Upper bound on output frames produced from `input_frames` new input frames.
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        (input_frames as f64 * self.ratio()).ceil() as usize + 2
    }

    fn frames(&self) -> usize {
        self.history.len() / self.channels
    }

    /// Feeds interleaved input frames and appends converted frames to `out`.
    /// Returns the number of frames appended.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> usize {
        debug_assert_eq!(input.len() % self.channels, 0);
        self.feed(input);
        self.drain(out)
    }

    /// Emits what is left in the history by padding it with silence.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> usize {
        let pad = vec![0.0; (3 + self.filter_delay()) * self.channels];
        self.feed(&pad);
        let produced = self.drain(out);
        self.reset();
        produced
    }

    fn feed(&mut self, input: &[f32]) {
        match self.anti_alias.as_mut() {
            Some(filter) => filter.process(input, self.channels, &mut self.history),
            None => self.history.extend_from_slice(input),
        }
    }

    fn drain(&mut self, out: &mut Vec<f32>) -> usize {
        let channels = self.channels;
        let frames = self.frames();
        let mut produced = 0;

        loop {
            let index = self.pos.floor() as usize;
            if index + 2 >= frames {
                break;
            }
            let t = (self.pos - index as f64) as f32;
            for ch in 0..channels {
                let at = |i: usize| self.history[i * channels + ch];
                let sample = match self.quality {
                    Quality::Nearest => {
                        if t < 0.5 {
                            at(index)
                        } else {
                            at(index + 1)
                        }
                    }
                    Quality::Linear => {
                        let a = at(index);
                        a + (at(index + 1) - a) * t
                    }
                    Quality::Cubic => {
                        catmull_rom(at(index - 1), at(index), at(index + 1), at(index + 2), t)
                    }
                };
                out.push(sample);
            }
            produced += 1;
            self.pos += self.step;
        }

        // Keep one frame of look-behind before the read position.
        let keep_from = (self.pos.floor() as usize).saturating_sub(1).min(frames);
        if keep_from > 0 {
            self.history.drain(..keep_from * channels);
            self.pos -= keep_from as f64;
        }

        produced
    }
}

#[inline]
fn catmull_rom(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    p1 + 0.5
        * t
        * (p2 - p0 + t * (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3 + t * (3.0 * (p1 - p2) + p3 - p0)))
}
