//! DMX MUS scores.
//!
//! MUS is a compact single-track encoding running at a fixed 140 ticks per
//! second. Each event byte packs a "last event before a delay" flag, a 3-bit
//! event type and a 4-bit channel; MUS channel 15 is percussion and maps to MIDI
//! channel 9, with MUS channels 9..=14 shifted up by one to make room.
//! Controllers use a private numbering that is translated to MIDI controllers on
//! dispatch.

use tracing::debug;

use super::timing::TickClock;
use super::{Advance, Sequence, SequenceFormat, FALLBACK_DELAY_SAMPLES};
use crate::engine::INTERNAL_SAMPLE_RATE;
use crate::midi::ByteReader;
use crate::synth::Synth;

const SIGNATURE: &[u8; 4] = b"MUS\x1A";

/// Fixed tick rate.
pub const MUS_TICKS_PER_SECOND: u32 = 140;

/// Note velocity until a channel's first volume-bearing note.
const DEFAULT_VOLUME: u8 = 127;

/// MUS controller numbers 1..=9 as MIDI controllers. Controller 0 is a program
/// change.
const CONTROLLER_MAP: [u8; 9] = [0, 1, 7, 10, 11, 91, 93, 64, 67];

/// MUS system events 10..=14 as MIDI controllers.
const SYSTEM_MAP: [u8; 5] = [120, 123, 126, 127, 121];

const EVENT_RELEASE: u8 = 0;
const EVENT_PLAY: u8 = 1;
const EVENT_PITCH_WHEEL: u8 = 2;
const EVENT_SYSTEM: u8 = 3;
const EVENT_CONTROLLER: u8 = 4;
const EVENT_MEASURE_END: u8 = 5;
const EVENT_SCORE_END: u8 = 6;

pub fn recognize(data: &[u8]) -> bool {
    data.starts_with(SIGNATURE)
}

fn midi_channel(mus_channel: u8) -> u8 {
    match mus_channel {
        15 => 9,
        9..=14 => mus_channel + 1,
        c => c,
    }
}

/// Decoded MUS score with its playback cursor.
pub struct MusSequence {
    data: Vec<u8>,
    start: usize,
    end: usize,
    pos: usize,
    clock: TickClock,
    volumes: [u8; 16],
    looping: bool,
    progressed: bool,
}

impl MusSequence {
    /// Wraps a MUS lump. The score bounds come from the header and are clipped to
    /// the data.
    pub fn new(data: Vec<u8>) -> Self {
        let mut r = ByteReader::new(&data, SIGNATURE.len());
        let (len, start) = match (r.u16_le(), r.u16_le()) {
            (Some(len), Some(start)) => (len as usize, start as usize),
            _ => (0, data.len()),
        };
        let start = start.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        debug!(score_start = start, score_len = end - start, "parsed MUS header");

        Self {
            data,
            start,
            end,
            pos: start,
            clock: TickClock::fixed(MUS_TICKS_PER_SECOND, INTERNAL_SAMPLE_RATE),
            volumes: [DEFAULT_VOLUME; 16],
            looping: false,
            progressed: false,
        }
    }

    fn rewind(&mut self) {
        self.pos = self.start;
        self.volumes = [DEFAULT_VOLUME; 16];
        self.clock.reset();
        self.progressed = false;
    }

    /// Dispatches events until one carries a delay. Returns the delay in ticks, or
    /// `None` at the end of the score.
    fn play_until_delay(&mut self, synth: &mut dyn Synth) -> Option<u32> {
        let mut r = ByteReader::new(&self.data[..self.end], self.pos);
        let result = loop {
            let Some(desc) = r.u8() else {
                break None;
            };
            let channel = midi_channel(desc & 0x0F);
            let dispatched = match (desc >> 4) & 0x07 {
                EVENT_RELEASE => r.u8().map(|note| {
                    synth.channel_event(0x80 | channel, note & 0x7F, 0);
                }),
                EVENT_PLAY => r.u8().and_then(|note| {
                    if note & 0x80 != 0 {
                        self.volumes[channel as usize] = r.u8()? & 0x7F;
                    }
                    synth.channel_event(0x90 | channel, note & 0x7F, self.volumes[channel as usize]);
                    Some(())
                }),
                EVENT_PITCH_WHEEL => r.u8().map(|value| {
                    let bend = (value as u16) << 6;
                    synth.channel_event(0xE0 | channel, (bend & 0x7F) as u8, (bend >> 7) as u8);
                }),
                EVENT_SYSTEM => r.u8().map(|number| {
                    if let Some(&cc) = SYSTEM_MAP.get((number as usize).wrapping_sub(10)) {
                        synth.channel_event(0xB0 | channel, cc, 0);
                    }
                }),
                EVENT_CONTROLLER => r.u8().zip(r.u8()).map(|(number, value)| {
                    let value = value.min(127);
                    match number {
                        0 => synth.channel_event(0xC0 | channel, value, 0),
                        1..=9 => synth.channel_event(
                            0xB0 | channel,
                            CONTROLLER_MAP[number as usize - 1],
                            value,
                        ),
                        _ => {}
                    }
                }),
                EVENT_MEASURE_END => Some(()),
                // Score end, and the unused type 7
                _ => None,
            };
            if dispatched.is_none() {
                break None;
            }

            if desc & 0x80 != 0 {
                match r.vlq() {
                    Some(0) => {}
                    Some(delay) => break Some(delay),
                    None => break None,
                }
            }
        };
        self.pos = r.pos();
        result
    }

    fn silence(synth: &mut dyn Synth) {
        for channel in 0..16u8 {
            synth.channel_event(0xB0 | channel, 123, 0);
        }
    }
}

impl Sequence for MusSequence {
    fn format(&self) -> SequenceFormat {
        SequenceFormat::Mus
    }

    fn reset(&mut self) {
        self.rewind();
    }

    fn advance(&mut self, synth: &mut dyn Synth) -> Advance {
        if let Some(ticks) = self.play_until_delay(synth) {
            self.progressed = true;
            return Advance::Delay(self.clock.ticks_to_samples(ticks));
        }

        Self::silence(synth);
        if !self.looping {
            return Advance::End;
        }
        let progressed = self.progressed;
        self.rewind();
        debug!("MUS score looped");
        if !progressed {
            return Advance::Delay(FALLBACK_DELAY_SAMPLES);
        }
        match self.play_until_delay(synth) {
            Some(ticks) => {
                self.progressed = true;
                Advance::Delay(self.clock.ticks_to_samples(ticks))
            }
            None => Advance::Delay(FALLBACK_DELAY_SAMPLES),
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.clock.set_sample_rate(sample_rate);
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }
}

/// Decodes a MUS lump.
pub fn load(data: &[u8]) -> MusSequence {
    MusSequence::new(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::fixtures::mus;
    use crate::synth::testing::RecordingSynth;

    fn seq(score: &[u8]) -> MusSequence {
        let mut seq = load(&mus(score));
        seq.set_sample_rate(MUS_TICKS_PER_SECOND);
        seq
    }

    #[test]
    fn test_play_and_release_with_delay() {
        let mut seq = seq(&[
            0x90, 0x80 | 60, 100, 0x05, // play ch0 note 60 vol 100, last, delay 5
            0x00, 60, // release
            0x60, // score end
        ]);
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::Delay(5));
        assert_eq!(synth.channel_events(), vec![(0x90, 60, 100)]);
        assert_eq!(seq.advance(&mut synth), Advance::End);
        assert_eq!(synth.channel_events()[1], (0x80, 60, 0));
    }

    #[test]
    fn test_volume_persists_per_channel() {
        let mut seq = seq(&[0x10, 0x80 | 60, 90, 0x10, 62, 0x11, 64, 0x60]);
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        assert_eq!(
            synth.channel_events()[..3],
            [(0x90, 60, 90), (0x90, 62, 90), (0x91, 64, DEFAULT_VOLUME)]
        );
    }

    #[test]
    fn test_channel_mapping() {
        assert_eq!(midi_channel(0), 0);
        assert_eq!(midi_channel(8), 8);
        assert_eq!(midi_channel(9), 10);
        assert_eq!(midi_channel(14), 15);
        assert_eq!(midi_channel(15), 9);
    }

    #[test]
    fn test_controllers_and_program() {
        let mut seq = seq(&[
            0x40, 0, 30, // program 30
            0x40, 3, 200, // volume, clamped
            0x40, 8, 127, // sustain pedal
            0x30, 11, // all notes off
            0x20, 0x80, // pitch wheel centre
            0x60,
        ]);
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        assert_eq!(
            synth.channel_events()[..5],
            [
                (0xC0, 30, 0),
                (0xB0, 7, 127),
                (0xB0, 64, 127),
                (0xB0, 123, 0),
                (0xE0, 0, 64)
            ]
        );
    }

    #[test]
    fn test_looping_replays_score() {
        let mut seq = seq(&[0x90, 60, 0x0A, 0x00, 60, 0x60]);
        seq.set_looping(true);
        let mut synth = RecordingSynth::new();
        for _ in 0..6 {
            assert_eq!(seq.advance(&mut synth), Advance::Delay(10));
        }
        assert_eq!(synth.note_ons().len(), 6);
    }

    #[test]
    fn test_loop_without_delay_falls_back() {
        let mut seq = seq(&[0x10, 60, 0x60]);
        seq.set_looping(true);
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::Delay(FALLBACK_DELAY_SAMPLES));
    }

    #[test]
    fn test_truncated_score_ends() {
        let mut seq = seq(&[0x90, 0x80 | 60]);
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::End);
        assert!(synth.note_ons().is_empty());
    }

    #[test]
    fn test_header_length_clipped() {
        let mut data = mus(&[0x10, 60]);
        data[4..6].copy_from_slice(&0xFFFFu16.to_le_bytes());
        let mut seq = load(&data);
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::End);
        assert_eq!(synth.note_ons().len(), 1);
    }
}
