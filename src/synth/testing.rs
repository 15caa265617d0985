//! Test double that records everything dispatched to it.

use super::Synth;

/// A dispatched synth call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Channel { status: u8, data1: u8, data2: u8 },
    SysEx(Vec<u8>),
    Reset,
}

/// A dispatched call and the number of frames generated before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub at_frame: u64,
    pub dispatch: Dispatch,
}

/// Records dispatches and renders a deterministic tone.
///
/// While any note is held the output is a ±0.5 square wave. Once all notes are
/// released the level is multiplied by `decay` every frame (0 = instant silence).
pub struct RecordingSynth {
    pub events: Vec<Recorded>,
    pub decay: f32,
    pub sample_rate: u32,
    pub stereo: bool,
    pub frames: u64,
    held: Vec<(u8, u8)>,
    level: f32,
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            decay: 0.0,
            sample_rate: 50_000,
            stereo: true,
            frames: 0,
            held: Vec::new(),
            level: 0.0,
        }
    }

    pub fn with_decay(decay: f32) -> Self {
        Self {
            decay,
            ..Self::new()
        }
    }

    /// Channel messages only, as `(status, data1, data2)`.
    pub fn channel_events(&self) -> Vec<(u8, u8, u8)> {
        self.events
            .iter()
            .filter_map(|r| match r.dispatch {
                Dispatch::Channel {
                    status,
                    data1,
                    data2,
                } => Some((status, data1, data2)),
                _ => None,
            })
            .collect()
    }

    /// Note-on events with non-zero velocity, as `(frame, channel, note)`.
    pub fn note_ons(&self) -> Vec<(u64, u8, u8)> {
        self.events
            .iter()
            .filter_map(|r| match r.dispatch {
                Dispatch::Channel {
                    status,
                    data1,
                    data2,
                } if status & 0xF0 == 0x90 && data2 > 0 => Some((r.at_frame, status & 0x0F, data1)),
                _ => None,
            })
            .collect()
    }

    pub fn held_notes(&self) -> usize {
        self.held.len()
    }

    fn record(&mut self, dispatch: Dispatch) {
        self.events.push(Recorded {
            at_frame: self.frames,
            dispatch,
        });
    }
}

impl Default for RecordingSynth {
    fn default() -> Self {
        Self::new()
    }
}

impl Synth for RecordingSynth {
    fn channel_event(&mut self, status: u8, data1: u8, data2: u8) {
        self.record(Dispatch::Channel {
            status,
            data1,
            data2,
        });
        let channel = status & 0x0F;
        match status & 0xF0 {
            0x90 if data2 > 0 => self.held.push((channel, data1)),
            0x80 | 0x90 => self.held.retain(|&(c, n)| !(c == channel && n == data1)),
            0xB0 if data1 == 120 || data1 == 123 => self.held.retain(|&(c, _)| c != channel),
            _ => {}
        }
    }

    fn system_exclusive(&mut self, data: &[u8]) {
        self.record(Dispatch::SysEx(data.to_vec()));
    }

    fn reset_voices(&mut self) {
        self.record(Dispatch::Reset);
        self.held.clear();
        self.level = 0.0;
    }

    fn generate(&mut self, out: &mut [f32]) {
        for frame in out.chunks_mut(2) {
            if self.held.is_empty() {
                self.level *= self.decay;
            } else {
                self.level = 0.5;
            }
            let sign = if self.frames % 2 == 0 { 1.0 } else { -1.0 };
            frame.iter_mut().for_each(|s| *s = self.level * sign);
            self.frames += 1;
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    fn set_stereo(&mut self, stereo: bool) {
        self.stereo = stereo;
    }
}
