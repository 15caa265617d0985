//! Reference synthesizer.
//!
//! A small polyphonic General-MIDI-flavoured synth so the player produces sound
//! without an external backend. Channel 10 (index 9) plays noise percussion.

use super::voice::{Voice, Waveform};
use super::Synth;

/// Maximum simultaneous voices. The oldest voice is stolen beyond this.
pub const MAX_VOICES: usize = 32;

/// Pitch bend range in semitones.
const BEND_RANGE: f32 = 2.0;

/// Output level of a single full-velocity voice.
const VOICE_LEVEL: f32 = 0.2;

const PERCUSSION_CHANNEL: u8 = 9;

/// Controller state for one MIDI channel.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ChannelState {
    program: u8,
    volume: u8,
    expression: u8,
    pan: u8,
    sustain: bool,
    /// Current bend in semitones.
    bend: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            program: 0,
            volume: 100,
            expression: 127,
            pan: 64,
            sustain: false,
            bend: 0.0,
        }
    }
}

impl ChannelState {
    fn reset_controllers(&mut self) {
        self.expression = 127;
        self.sustain = false;
        self.bend = 0.0;
    }

    /// Equal-power pan gains for (left, right).
    fn pan_gains(&self, stereo: bool) -> (f32, f32) {
        if !stereo {
            return (std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2);
        }
        let p = self.pan as f32 / 127.0 * std::f32::consts::FRAC_PI_2;
        (p.cos(), p.sin())
    }

    fn gain(&self) -> f32 {
        (self.volume as f32 / 127.0) * (self.expression as f32 / 127.0)
    }
}

/// Polyphonic oscillator synth.
pub struct ToneSynth {
    sample_rate: f32,
    stereo: bool,
    channels: [ChannelState; 16],
    voices: Vec<Voice>,
    next_age: u64,
}

impl ToneSynth {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            stereo: true,
            channels: [ChannelState::default(); 16],
            voices: Vec::with_capacity(MAX_VOICES),
            next_age: 0,
        }
    }

    /// Number of voices currently sounding.
    #[cfg(test)]
    fn active_voices(&self) -> usize {
        self.voices.len()
    }

    #[cfg(test)]
    fn program(&self, channel: u8) -> u8 {
        self.channels[(channel & 0x0F) as usize].program
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        // Retriggering a held note reuses its voice.
        if let Some(voice) = self
            .voices
            .iter_mut()
            .find(|v| v.channel == channel && v.note == note)
        {
            voice.kill();
        }
        self.voices.retain(|v| v.is_active());

        if self.voices.len() >= MAX_VOICES {
            if let Some((oldest, _)) = self.voices.iter().enumerate().min_by_key(|(_, v)| v.age) {
                self.voices.swap_remove(oldest);
            }
        }

        let state = &self.channels[channel as usize];
        let waveform = if channel == PERCUSSION_CHANNEL {
            Waveform::Noise
        } else {
            Waveform::for_program(state.program)
        };
        let voice = Voice::new(
            channel,
            note,
            velocity,
            waveform,
            state.bend,
            self.sample_rate,
            self.next_age,
        );
        self.next_age += 1;
        self.voices.push(voice);
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        let sustain = self.channels[channel as usize].sustain;
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.channel == channel && v.note == note && v.is_held())
        {
            if sustain {
                voice.held_by_pedal = true;
            } else {
                voice.release();
            }
        }
    }

    fn controller(&mut self, channel: u8, number: u8, value: u8) {
        let state = &mut self.channels[channel as usize];
        match number {
            7 => state.volume = value,
            10 => state.pan = value,
            11 => state.expression = value,
            64 => {
                state.sustain = value >= 64;
                if !state.sustain {
                    for voice in self
                        .voices
                        .iter_mut()
                        .filter(|v| v.channel == channel && v.held_by_pedal)
                    {
                        voice.release();
                    }
                }
            }
            // All sound off
            120 => self.voices.retain(|v| v.channel != channel),
            121 => state.reset_controllers(),
            // All notes off
            123 => {
                for voice in self.voices.iter_mut().filter(|v| v.channel == channel) {
                    voice.release();
                }
            }
            _ => {}
        }
    }

    fn pitch_bend(&mut self, channel: u8, lsb: u8, msb: u8) {
        let raw = ((msb as i32) << 7 | lsb as i32) - 8192;
        let bend = raw as f32 / 8192.0 * BEND_RANGE;
        self.channels[channel as usize].bend = bend;
        let sample_rate = self.sample_rate;
        for voice in self.voices.iter_mut().filter(|v| v.channel == channel) {
            voice.set_pitch(bend, sample_rate);
        }
    }
}

impl Synth for ToneSynth {
    fn channel_event(&mut self, status: u8, data1: u8, data2: u8) {
        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 => self.note_off(channel, data1),
            0x90 if data2 == 0 => self.note_off(channel, data1),
            0x90 => self.note_on(channel, data1, data2),
            0xB0 => self.controller(channel, data1, data2),
            0xC0 => self.channels[channel as usize].program = data1,
            0xE0 => self.pitch_bend(channel, data1, data2),
            _ => {}
        }
    }

    fn system_exclusive(&mut self, data: &[u8]) {
        // GM System On
        if data.starts_with(&[0x7E, 0x7F, 0x09, 0x01]) {
            self.reset_voices();
        }
    }

    fn reset_voices(&mut self) {
        self.voices.clear();
        self.channels = [ChannelState::default(); 16];
    }

    fn generate(&mut self, out: &mut [f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
        if self.voices.is_empty() {
            return;
        }

        let stereo = self.stereo;
        for voice in self.voices.iter_mut() {
            let state = &self.channels[voice.channel as usize];
            let level = VOICE_LEVEL * (voice.velocity as f32 / 127.0) * state.gain();
            let (left, right) = state.pan_gains(stereo);
            for frame in out.chunks_mut(2) {
                let s = voice.next() * level;
                frame[0] += s * left;
                if let Some(r) = frame.get_mut(1) {
                    *r += s * right;
                }
            }
        }
        self.voices.retain(|v| v.is_active());
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.voices.clear();
    }

    fn set_stereo(&mut self, stereo: bool) {
        self.stereo = stereo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(synth: &mut ToneSynth, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * 2];
        synth.generate(&mut out);
        out
    }

    fn peak(buffer: &[f32]) -> f32 {
        buffer.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_silent_without_notes() {
        let mut synth = ToneSynth::new(50_000);
        assert_eq!(peak(&render(&mut synth, 512)), 0.0);
    }

    #[test]
    fn test_note_on_off() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0x90, 60, 100);
        assert_eq!(synth.active_voices(), 1);
        assert!(peak(&render(&mut synth, 2048)) > 0.01);

        synth.channel_event(0x80, 60, 0);
        render(&mut synth, 100_000);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_velocity_zero_is_note_off() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0x91, 64, 90);
        synth.channel_event(0x91, 64, 0);
        render(&mut synth, 100_000);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_sustain_pedal_holds_note() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0xB0, 64, 127);
        synth.channel_event(0x90, 60, 100);
        synth.channel_event(0x80, 60, 0);
        render(&mut synth, 100_000);
        assert_eq!(synth.active_voices(), 1);

        synth.channel_event(0xB0, 64, 0);
        render(&mut synth, 100_000);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_all_sound_off() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0x92, 60, 100);
        synth.channel_event(0x92, 64, 100);
        synth.channel_event(0x93, 67, 100);
        synth.channel_event(0xB2, 120, 0);
        assert_eq!(synth.active_voices(), 1);
    }

    #[test]
    fn test_voice_stealing() {
        let mut synth = ToneSynth::new(50_000);
        for note in 0..(MAX_VOICES as u8 + 8) {
            synth.channel_event(0x90, note, 100);
        }
        assert_eq!(synth.active_voices(), MAX_VOICES);
    }

    #[test]
    fn test_program_change_and_reset() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0xC5, 24, 0);
        assert_eq!(synth.program(5), 24);
        synth.reset_voices();
        assert_eq!(synth.program(5), 0);
    }

    #[test]
    fn test_gm_reset_sysex() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0x90, 60, 100);
        synth.system_exclusive(&[0x7E, 0x7F, 0x09, 0x01]);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_mono_output_has_equal_channels() {
        let mut synth = ToneSynth::new(50_000);
        synth.set_stereo(false);
        synth.channel_event(0xB0, 10, 0);
        synth.channel_event(0x90, 60, 100);
        let out = render(&mut synth, 1024);
        assert!(out.chunks(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn test_hard_pan_left() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0xB0, 10, 0);
        synth.channel_event(0x90, 60, 100);
        let out = render(&mut synth, 1024);
        let right: Vec<f32> = out.chunks(2).map(|f| f[1]).collect();
        assert!(peak(&right) < 1e-6);
    }

    #[test]
    fn test_percussion_channel_uses_noise() {
        let mut synth = ToneSynth::new(50_000);
        synth.channel_event(0x99, 36, 127);
        assert!(peak(&render(&mut synth, 1024)) > 0.0);
        // Percussion decays without a note-off.
        render(&mut synth, 100_000);
        assert_eq!(synth.active_voices(), 0);
    }
}
