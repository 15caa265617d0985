//! Sequencer Driver
//!
//! Owns the active sequence and paces it against the sample clock: it counts down
//! the delay returned by the last [`Sequence::advance`] while the synth renders,
//! and advances again when the delay runs out.
//!
//! State machine: `Stopped -> Playing -> {Paused, Ended}`. `Ended` returns to
//! `Playing` on an explicit reset or a song change; a looping sequence never
//! reaches it. While paused, sequence time does not move and no audio is rendered.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::INTERNAL_BLOCK_FRAMES;
use crate::queue::WakeSignal;
use crate::sequence::{Advance, Sequence};
use crate::synth::Synth;

/// Consecutive zero-length delays tolerated before forcing one block of time.
pub const MAX_ZERO_DELAYS: u32 = 4096;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Ended,
}

/// Errors from sequencer control operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("no sequence loaded")]
    NoSequence,
    #[error("cannot switch songs while {0:?}")]
    InvalidState(PlaybackState),
}

/// The sequencer driver.
pub struct Sequencer {
    sequence: Option<Box<dyn Sequence>>,
    state: PlaybackState,
    sample_rate: u32,
    looping: bool,
    /// Samples left before the next advance.
    pending: u32,
    /// The pending wait came from an idle result and may be cut short by input.
    idle: bool,
    asleep: bool,
    zero_delays: u32,
}

impl Sequencer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sequence: None,
            state: PlaybackState::Stopped,
            sample_rate,
            looping: false,
            pending: 0,
            idle: false,
            asleep: false,
            zero_delays: 0,
        }
    }

    /// Installs a sequence, rewound to its start, and silences the synth.
    /// The sequencer is left `Stopped`.
    pub fn load(&mut self, mut sequence: Box<dyn Sequence>, synth: &mut dyn Synth) {
        sequence.set_sample_rate(self.sample_rate);
        sequence.set_looping(self.looping);
        sequence.reset();
        synth.reset_voices();
        info!(
            format = %sequence.format(),
            songs = sequence.song_count(),
            "sequence installed"
        );
        self.sequence = Some(sequence);
        self.state = PlaybackState::Stopped;
        self.clear_timing();
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn sequence(&self) -> Option<&dyn Sequence> {
        self.sequence.as_deref()
    }

    /// Starts playback. From `Ended` this rewinds first.
    pub fn play(&mut self, synth: &mut dyn Synth) -> Result<(), SequencerError> {
        if self.sequence.is_none() {
            return Err(SequencerError::NoSequence);
        }
        if self.state == PlaybackState::Ended {
            return self.reset(synth);
        }
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Suspends playback. Only meaningful while playing.
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
        }
    }

    /// Rewinds the current song and starts playing it.
    pub fn reset(&mut self, synth: &mut dyn Synth) -> Result<(), SequencerError> {
        let sequence = self.sequence.as_mut().ok_or(SequencerError::NoSequence)?;
        sequence.reset();
        synth.reset_voices();
        self.clear_timing();
        self.state = PlaybackState::Playing;
        debug!("sequence reset");
        Ok(())
    }

    /// Selects a song (clamped to the valid range) and rewinds to its start.
    /// Returns the selected index.
    pub fn set_song(&mut self, index: usize, synth: &mut dyn Synth) -> Result<usize, SequencerError> {
        if self.state == PlaybackState::Stopped {
            return Err(SequencerError::InvalidState(self.state));
        }
        let sequence = self.sequence.as_mut().ok_or(SequencerError::NoSequence)?;
        let songs = sequence.song_count();
        let index = index.min(songs.saturating_sub(1));
        sequence.select_song(index);
        synth.reset_voices();
        self.clear_timing();
        if self.state == PlaybackState::Ended {
            self.state = PlaybackState::Playing;
        }
        info!(song = index, songs, "song selected");
        Ok(index)
    }

    pub fn song_count(&self) -> usize {
        self.sequence.as_ref().map_or(0, |s| s.song_count())
    }

    pub fn song_index(&self) -> usize {
        self.sequence.as_ref().map_or(0, |s| s.song_index())
    }

    pub fn at_end(&self) -> bool {
        self.state == PlaybackState::Ended
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Changes the rate delays are expressed in. The pending delay is rescaled so
    /// the next event keeps its place in time.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == 0 || sample_rate == self.sample_rate {
            return;
        }
        self.pending = (self.pending as u64 * sample_rate as u64 / self.sample_rate as u64) as u32;
        self.sample_rate = sample_rate;
        if let Some(sequence) = self.sequence.as_mut() {
            sequence.set_sample_rate(sample_rate);
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        if looping != self.looping {
            self.looping = looping;
            if let Some(sequence) = self.sequence.as_mut() {
                sequence.set_looping(looping);
            }
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// The sequence reported prolonged input silence.
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// Leaves the asleep state and advances on the next render.
    pub fn wake(&mut self) {
        if self.asleep {
            self.asleep = false;
            self.pending = 0;
            debug!("sequencer woken");
        }
    }

    /// Signal that fires when a sleeping sequence gets new input.
    pub fn wake_signal(&self) -> Option<Arc<WakeSignal>> {
        self.sequence.as_ref().and_then(|s| s.wake_signal())
    }

    /// Renders `out.len() / 2` interleaved stereo frames, dispatching sequence
    /// events at their sample positions.
    ///
    /// Paused output is silent and the synth is not run. Stopped and ended
    /// sequencers keep running the synth so releases decay naturally.
    pub fn render(&mut self, synth: &mut dyn Synth, out: &mut [f32]) {
        match self.state {
            PlaybackState::Paused => {
                out.fill(0.0);
                return;
            }
            PlaybackState::Stopped | PlaybackState::Ended => {
                synth.generate(out);
                return;
            }
            PlaybackState::Playing => {}
        }

        let frames = out.len() / 2;
        let mut done = 0;
        while done < frames {
            if self.idle && self.pending > 0 && self.has_pending_input() {
                self.pending = 0;
            }
            if self.pending == 0 {
                self.step(synth);
                if self.state != PlaybackState::Playing {
                    synth.generate(&mut out[done * 2..]);
                    return;
                }
                if self.pending == 0 {
                    continue;
                }
            }
            let n = (self.pending as usize).min(frames - done);
            synth.generate(&mut out[done * 2..(done + n) * 2]);
            self.pending -= n as u32;
            done += n;
        }
    }

    fn has_pending_input(&self) -> bool {
        self.sequence.as_ref().is_some_and(|s| s.has_pending_input())
    }

    fn step(&mut self, synth: &mut dyn Synth) {
        let Some(sequence) = self.sequence.as_mut() else {
            self.pending = INTERNAL_BLOCK_FRAMES as u32;
            return;
        };
        self.idle = false;
        match sequence.advance(synth) {
            Advance::Delay(0) => {
                self.zero_delays += 1;
                if self.zero_delays > MAX_ZERO_DELAYS {
                    warn!("sequence made no progress, forcing a block of time");
                    self.zero_delays = 0;
                    self.pending = INTERNAL_BLOCK_FRAMES as u32;
                }
            }
            Advance::Delay(samples) => {
                self.zero_delays = 0;
                self.asleep = false;
                self.pending = samples;
            }
            Advance::Idle(samples) => {
                self.zero_delays = 0;
                self.asleep = false;
                self.idle = true;
                self.pending = samples.max(1);
            }
            Advance::Sleep => {
                self.zero_delays = 0;
                if !self.asleep {
                    debug!("sequencer asleep");
                }
                self.asleep = true;
                self.idle = true;
                self.pending = INTERNAL_BLOCK_FRAMES as u32;
            }
            Advance::End => {
                self.zero_delays = 0;
                self.state = PlaybackState::Ended;
                info!("sequence ended");
            }
        }
    }

    fn clear_timing(&mut self) {
        self.pending = 0;
        self.idle = false;
        self.asleep = false;
        self.zero_delays = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::fixtures::smf;
    use crate::sequence::{mid, LiveInputSequence, LoopbackPort, SequenceFormat};
    use crate::synth::testing::{Dispatch, RecordingSynth};

    const RATE: u32 = 50_000;

    /// A sequence that always returns the same result.
    struct Constant(Advance);

    impl Sequence for Constant {
        fn format(&self) -> SequenceFormat {
            SequenceFormat::Mid
        }
        fn reset(&mut self) {}
        fn advance(&mut self, _synth: &mut dyn Synth) -> Advance {
            self.0
        }
        fn set_sample_rate(&mut self, _sample_rate: u32) {}
        fn set_looping(&mut self, _looping: bool) {}
    }

    fn two_songs() -> Box<dyn Sequence> {
        // 96 ticks per beat at 120 BPM: 1 tick = 260.4 samples
        Box::new(mid::load(&smf(
            2,
            96,
            &[
                vec![0x00, 0xC0, 0x01, 0x00, 0x90, 60, 100, 0x60, 0x80, 60, 0],
                vec![0x00, 0xC0, 0x02, 0x00, 0x90, 62, 100, 0x60, 0x80, 62, 0],
            ],
        )))
    }

    fn render_frames(seq: &mut Sequencer, synth: &mut RecordingSynth, frames: usize) {
        let mut out = vec![0.0; frames * 2];
        seq.render(synth, &mut out);
    }

    #[test]
    fn test_state_transitions() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.play(&mut synth), Err(SequencerError::NoSequence));

        seq.load(two_songs(), &mut synth);
        assert_eq!(seq.state(), PlaybackState::Stopped);
        seq.play(&mut synth).unwrap();
        assert_eq!(seq.state(), PlaybackState::Playing);
        seq.pause();
        assert_eq!(seq.state(), PlaybackState::Paused);
        seq.resume();
        assert_eq!(seq.state(), PlaybackState::Playing);

        render_frames(&mut seq, &mut synth, RATE as usize);
        assert!(seq.at_end());
        seq.play(&mut synth).unwrap();
        assert_eq!(seq.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_events_land_on_sample_positions() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(two_songs(), &mut synth);
        seq.play(&mut synth).unwrap();

        // Render in uneven chunks; the note-off must still land at 96 ticks
        for chunk in [100, 7000, 333, 20000] {
            render_frames(&mut seq, &mut synth, chunk);
        }
        let off = synth
            .events
            .iter()
            .find(|r| r.dispatch == Dispatch::Channel { status: 0x80, data1: 60, data2: 0 })
            .unwrap();
        assert_eq!(off.at_frame, 25_000);
    }

    #[test]
    fn test_paused_time_does_not_advance() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(two_songs(), &mut synth);
        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 1000);
        seq.pause();
        let mut out = vec![1.0; 2 * RATE as usize];
        seq.render(&mut synth, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(synth.frames, 1000);
        assert_eq!(synth.channel_events().len(), 2);
    }

    #[test]
    fn test_song_switch() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(two_songs(), &mut synth);
        assert_eq!(
            seq.set_song(1, &mut synth),
            Err(SequencerError::InvalidState(PlaybackState::Stopped))
        );

        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 100);
        assert_eq!(seq.song_count(), 2);
        assert_eq!(seq.set_song(1, &mut synth), Ok(1));
        assert_eq!(seq.song_index(), 1);
        synth.events.clear();

        seq.reset(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 100);
        let programs: Vec<_> = synth
            .channel_events()
            .into_iter()
            .filter(|e| e.0 & 0xF0 == 0xC0)
            .collect();
        assert_eq!(programs, vec![(0xC0, 2, 0)]);
    }

    #[test]
    fn test_song_index_clamped() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(two_songs(), &mut synth);
        seq.play(&mut synth).unwrap();
        assert_eq!(seq.set_song(7, &mut synth), Ok(1));
    }

    #[test]
    fn test_song_switch_from_ended_plays() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(two_songs(), &mut synth);
        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, RATE as usize);
        assert!(seq.at_end());
        seq.set_song(0, &mut synth).unwrap();
        assert_eq!(seq.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_looping_never_ends() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.set_looping(true);
        seq.load(two_songs(), &mut synth);
        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 10 * RATE as usize);
        assert!(!seq.at_end());
        assert!(synth.note_ons().len() >= 10);
    }

    #[test]
    fn test_zero_delay_guard() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(Box::new(Constant(Advance::Delay(0))), &mut synth);
        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 2048);
        assert_eq!(synth.frames, 2048);
    }

    #[test]
    fn test_sleep_and_wake() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(Box::new(Constant(Advance::Sleep)), &mut synth);
        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 10);
        assert!(seq.is_asleep());
        seq.wake();
        assert!(!seq.is_asleep());
    }

    #[test]
    fn test_pending_input_cuts_idle_short() {
        let (port, sender) = LoopbackPort::new();
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(Box::new(LiveInputSequence::new(Box::new(port), 0, 64)), &mut synth);
        seq.play(&mut synth).unwrap();

        // Build up a long idle wait
        render_frames(&mut seq, &mut synth, 5 * RATE as usize);
        assert!(seq.wake_signal().is_some());
        sender.send(0, &[0x90, 60, 100]);
        render_frames(&mut seq, &mut synth, 1);
        assert_eq!(synth.note_ons().len(), 1);
    }

    #[test]
    fn test_sample_rate_change_rescales_pending() {
        let mut seq = Sequencer::new(RATE);
        let mut synth = RecordingSynth::new();
        seq.load(Box::new(Constant(Advance::Delay(1000))), &mut synth);
        seq.play(&mut synth).unwrap();
        render_frames(&mut seq, &mut synth, 500);
        seq.set_sample_rate(RATE * 2);
        assert_eq!(seq.pending, 1000);
        assert_eq!(seq.sample_rate(), RATE * 2);
    }
}
