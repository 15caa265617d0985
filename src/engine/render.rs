//! Rendering Pipeline
//!
//! Synthesis always runs at [`INTERNAL_SAMPLE_RATE`] in blocks of
//! [`INTERNAL_BLOCK_FRAMES`]. Each block goes through the output stage (gain and
//! highpass), is downmixed when the output is mono, and is converted to the output
//! rate. Converted frames wait in an accumulation buffer until the caller pulls
//! them, so callers may ask for any number of frames, including less than one
//! block.
//!
//! The accumulation buffer is only refilled once it is empty, so it never holds
//! more than one block's worth of converted frames.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::sequencer::{PlaybackState, Sequencer, SequencerError};
use super::{
    INTERNAL_BLOCK_FRAMES, INTERNAL_SAMPLE_RATE, MAX_OUTPUT_RATE, MIN_OUTPUT_RATE,
    OUTPUT_MARGIN_FRAMES,
};
use crate::dsp::{HighPass, Quality, Resampler, SmoothedValue};
use crate::sequence::Sequence;
use crate::synth::Synth;

/// Tail rendered after the end of a sequence when no cap is given.
pub const DEFAULT_MAX_TAIL: Duration = Duration::from_secs(5);

/// Consecutive silent internal frames that end the tail (0.1 s).
pub const TAIL_SILENCE_FRAMES: u64 = INTERNAL_SAMPLE_RATE as u64 / 10;

/// One 16-bit quantization step.
pub const TAIL_SILENCE_THRESHOLD: f32 = 1.0 / 32768.0;

/// Default highpass cutoff.
pub const DEFAULT_FILTER_HZ: f32 = 5.0;

/// Errors from pipeline setup and bulk rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unsupported output sample rate {0} Hz")]
    InvalidSampleRate(u32),

    #[error("unsupported channel count {0} (expected 1 or 2)")]
    UnsupportedChannels(u16),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error("output write failed: {0}")]
    Sink(String),
}

/// Receives interleaved 16-bit PCM from a bulk render.
pub trait PcmSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), RenderError>;
}

impl PcmSink for Vec<i16> {
    fn write(&mut self, samples: &[i16]) -> Result<(), RenderError> {
        self.extend_from_slice(samples);
        Ok(())
    }
}

/// Outcome of [`TailDetector::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailDecision {
    Continue,
    /// Stop after the first `keep_frames` frames of the observed block.
    Stop { keep_frames: usize, trimmed: bool },
}

/// Decides when the tail after a sequence's end has decayed to silence.
///
/// Counts consecutive frames whose every sample is below the threshold; a loud
/// frame restarts the count. Once the count reaches the window the trailing
/// silence is cut. The tail also stops unconditionally at the cap.
#[derive(Debug, Clone)]
pub struct TailDetector {
    threshold: f32,
    window: u64,
    max_frames: u64,
    silent_run: u64,
    elapsed: u64,
}

impl TailDetector {
    pub fn new(max_frames: u64) -> Self {
        Self {
            threshold: TAIL_SILENCE_THRESHOLD,
            window: TAIL_SILENCE_FRAMES,
            max_frames,
            silent_run: 0,
            elapsed: 0,
        }
    }

    #[cfg(test)]
    fn with_window(mut self, window: u64) -> Self {
        self.window = window.max(1);
        self
    }

    /// Frames observed so far.
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Observes an interleaved block of `channels`-channel frames.
    pub fn observe(&mut self, block: &[f32], channels: usize) -> TailDecision {
        for (i, frame) in block.chunks(channels.max(1)).enumerate() {
            if self.elapsed >= self.max_frames {
                return TailDecision::Stop {
                    keep_frames: i,
                    trimmed: false,
                };
            }
            self.elapsed += 1;
            if frame.iter().all(|s| s.abs() < self.threshold) {
                self.silent_run += 1;
            } else {
                self.silent_run = 0;
            }
            if self.silent_run >= self.window {
                // Silent frames of this block are dropped; earlier ones are already out.
                let in_block = (self.silent_run as usize).min(i + 1);
                return TailDecision::Stop {
                    keep_frames: i + 1 - in_block,
                    trimmed: true,
                };
            }
        }
        TailDecision::Continue
    }
}

/// Totals from [`RenderPipeline::render_bulk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkSummary {
    /// Output frames written.
    pub frames: u64,
    /// Internal frames rendered after the sequence ended.
    pub tail_frames: u64,
    /// The tail was cut at detected silence rather than at the cap.
    pub trimmed: bool,
}

/// Sequencer, synth, and output stage, pulled at the output rate.
pub struct RenderPipeline<S: Synth> {
    synth: S,
    sequencer: Sequencer,
    gain: SmoothedValue,
    highpass: HighPass,
    resampler: Resampler,
    /// One internal block, interleaved stereo.
    block: Vec<f32>,
    /// Mono downmix of `block`.
    mono: Vec<f32>,
    /// Converted frames not yet pulled.
    pending: Vec<f32>,
    pending_pos: usize,
    output_rate: u32,
    channels: u16,
}

fn check_rate(rate: u32) -> Result<u32, RenderError> {
    if (MIN_OUTPUT_RATE..=MAX_OUTPUT_RATE).contains(&rate) {
        Ok(rate)
    } else {
        Err(RenderError::InvalidSampleRate(rate))
    }
}

impl<S: Synth> RenderPipeline<S> {
    /// Creates a pipeline producing `channels` (1 or 2) channels at `output_rate`.
    pub fn new(mut synth: S, output_rate: u32, channels: u16, quality: Quality) -> Result<Self, RenderError> {
        let output_rate = check_rate(output_rate)?;
        if !(1..=2).contains(&channels) {
            return Err(RenderError::UnsupportedChannels(channels));
        }
        synth.set_sample_rate(INTERNAL_SAMPLE_RATE);
        synth.set_stereo(channels == 2);

        let resampler = Resampler::new(quality, channels as usize, INTERNAL_SAMPLE_RATE, output_rate);
        let mut pipeline = Self {
            synth,
            sequencer: Sequencer::new(INTERNAL_SAMPLE_RATE),
            gain: SmoothedValue::new(
                1.0,
                SmoothedValue::DEFAULT_TIME_CONSTANT_MS,
                INTERNAL_SAMPLE_RATE as f32,
            ),
            highpass: HighPass::new(DEFAULT_FILTER_HZ, INTERNAL_SAMPLE_RATE as f32),
            resampler,
            block: vec![0.0; INTERNAL_BLOCK_FRAMES * 2],
            mono: Vec::with_capacity(INTERNAL_BLOCK_FRAMES),
            pending: Vec::new(),
            pending_pos: 0,
            output_rate,
            channels,
        };
        pipeline.reserve_pending();
        Ok(pipeline)
    }

    /// Capacity bound of the accumulation buffer, in frames.
    pub fn accumulation_capacity(&self) -> usize {
        self.block_output_frames() + OUTPUT_MARGIN_FRAMES
    }

    fn reserve_pending(&mut self) {
        let samples = self.accumulation_capacity() * self.channels as usize;
        self.pending = Vec::with_capacity(samples);
        self.pending_pos = 0;
    }

    /// Installs a sequence and starts playing it.
    pub fn load(&mut self, sequence: Box<dyn Sequence>) -> Result<(), RenderError> {
        self.sequencer.load(sequence, &mut self.synth);
        self.sequencer.play(&mut self.synth)?;
        self.discard_pending();
        Ok(())
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    #[cfg(test)]
    pub fn synth(&self) -> &S {
        &self.synth
    }

    /// Borrows the sequencer and synth together, for control operations.
    pub fn parts_mut(&mut self) -> (&mut Sequencer, &mut S) {
        (&mut self.sequencer, &mut self.synth)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames waiting in the accumulation buffer.
    #[cfg(test)]
    fn buffered_frames(&self) -> usize {
        (self.pending.len() - self.pending_pos) / self.channels as usize
    }

    /// Converted frames produced by one internal block, at most.
    pub fn block_output_frames(&self) -> usize {
        self.resampler.max_output_frames(INTERNAL_BLOCK_FRAMES)
    }

    /// Switches between mono and stereo output. Buffered output is discarded.
    pub fn set_channels(&mut self, channels: u16) -> Result<(), RenderError> {
        if !(1..=2).contains(&channels) {
            return Err(RenderError::UnsupportedChannels(channels));
        }
        self.channels = channels;
        self.synth.set_stereo(channels == 2);
        self.resampler.set_channels(channels as usize);
        self.reserve_pending();
        Ok(())
    }

    /// Changes the output rate. Buffered output is discarded.
    pub fn set_output_rate(&mut self, output_rate: u32) -> Result<(), RenderError> {
        self.output_rate = check_rate(output_rate)?;
        self.resampler.set_output_rate(output_rate);
        self.reserve_pending();
        debug!(output_rate, "output rate changed");
        Ok(())
    }

    /// Sets the linear output gain. Changes are smoothed.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain.set_target(gain.max(0.0));
    }

    /// Sets the highpass cutoff in Hz (0 disables the filter).
    pub fn set_filter(&mut self, cutoff_hz: f32) {
        self.highpass.set_cutoff(cutoff_hz);
    }

    /// Drops buffered output and restarts the converter.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_pos = 0;
        self.resampler.reset();
    }

    /// Fills `out` with interleaved frames at the output rate.
    pub fn render(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() {
                self.refill();
                continue;
            }
            let n = (self.pending.len() - self.pending_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }
    }

    /// Renders one internal block into `self.block` and applies the output stage.
    fn render_block(&mut self) {
        self.sequencer.render(&mut self.synth, &mut self.block);
        self.gain.apply(&mut self.block, 2);
        self.highpass.process(&mut self.block, 2);
    }

    fn refill(&mut self) {
        self.render_block();
        self.pending.clear();
        self.pending_pos = 0;
        let input: &[f32] = if self.channels == 1 {
            downmix(&self.block, &mut self.mono);
            &self.mono
        } else {
            &self.block
        };
        let frames = self.resampler.process(input, &mut self.pending);
        debug_assert!(frames <= self.accumulation_capacity());
    }

    /// Renders the whole sequence into `sink` as 16-bit PCM.
    ///
    /// Looping is turned off for the render. After the sequence ends, rendering
    /// continues until the output has been silent for [`TAIL_SILENCE_FRAMES`] or
    /// `max_tail` elapses, whichever comes first.
    pub fn render_bulk(
        &mut self,
        sink: &mut dyn PcmSink,
        max_tail: Option<Duration>,
    ) -> Result<BulkSummary, RenderError> {
        if self.sequencer.sequence().is_none() {
            return Err(SequencerError::NoSequence.into());
        }
        self.sequencer.set_looping(false);
        if self.sequencer.state() != PlaybackState::Playing {
            self.sequencer.play(&mut self.synth)?;
        }
        self.discard_pending();

        let max_tail = max_tail.unwrap_or(DEFAULT_MAX_TAIL);
        let max_tail_frames = (max_tail.as_secs_f64() * INTERNAL_SAMPLE_RATE as f64) as u64;
        let mut tail = TailDetector::new(max_tail_frames);
        let channels = self.channels as usize;
        let mut converted = Vec::with_capacity(self.accumulation_capacity() * channels);
        let mut pcm = Vec::with_capacity(converted.capacity());
        let mut summary = BulkSummary::default();

        loop {
            self.render_block();
            let decision = if self.sequencer.at_end() {
                tail.observe(&self.block, 2)
            } else {
                TailDecision::Continue
            };
            let keep = match decision {
                TailDecision::Continue => INTERNAL_BLOCK_FRAMES,
                TailDecision::Stop { keep_frames, trimmed } => {
                    summary.trimmed = trimmed;
                    keep_frames
                }
            };

            converted.clear();
            let block = &self.block[..keep * 2];
            let input: &[f32] = if channels == 1 {
                downmix(block, &mut self.mono);
                &self.mono
            } else {
                block
            };
            self.resampler.process(input, &mut converted);
            summary.frames += write_pcm(sink, &converted, &mut pcm, channels)?;

            if decision != TailDecision::Continue {
                break;
            }
        }

        converted.clear();
        self.resampler.flush(&mut converted);
        summary.frames += write_pcm(sink, &converted, &mut pcm, channels)?;
        summary.tail_frames = tail.elapsed();

        info!(
            frames = summary.frames,
            tail_frames = summary.tail_frames,
            trimmed = summary.trimmed,
            "bulk render finished"
        );
        Ok(summary)
    }
}

fn downmix(stereo: &[f32], mono: &mut Vec<f32>) {
    mono.clear();
    mono.extend(stereo.chunks(2).map(|frame| (frame[0] + frame[1]) * 0.5));
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Converts and writes; returns frames written.
fn write_pcm(
    sink: &mut dyn PcmSink,
    samples: &[f32],
    scratch: &mut Vec<i16>,
    channels: usize,
) -> Result<u64, RenderError> {
    if samples.is_empty() {
        return Ok(0);
    }
    scratch.clear();
    scratch.extend(samples.iter().copied().map(to_i16));
    sink.write(scratch)?;
    Ok((samples.len() / channels) as u64)
}
