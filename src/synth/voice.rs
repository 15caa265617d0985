//! Synth voices: a phase-accumulator oscillator shaped by an ADSR envelope.

use std::f32::consts::TAU;

use super::envelope::{AdsrShape, Envelope};

/// Oscillator waveform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Saw,
    Square,
    /// White noise, used for percussion.
    Noise,
}

impl Waveform {
    /// Picks a waveform for a General MIDI program number by instrument family.
    pub fn for_program(program: u8) -> Self {
        match (program / 8) % 4 {
            0 => Waveform::Triangle,
            1 => Waveform::Sine,
            2 => Waveform::Square,
            _ => Waveform::Saw,
        }
    }
}

/// Envelope used by pitched voices.
pub const MELODIC_SHAPE: AdsrShape = AdsrShape::new(0.005, 0.4, 0.6, 0.25);

/// Envelope used by percussion voices. No sustain: hits decay on their own.
pub const PERCUSSION_SHAPE: AdsrShape = AdsrShape::new(0.001, 0.12, 0.0, 0.05);

/// Converts a MIDI note number plus a bend in semitones to Hz.
#[inline]
pub fn note_to_hz(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}

/// One sounding note.
#[derive(Clone, Debug)]
pub struct Voice {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    /// Key released while the sustain pedal was down.
    pub held_by_pedal: bool,
    /// Allocation order, used to steal the oldest voice.
    pub age: u64,
    waveform: Waveform,
    phase: f32,
    phase_inc: f32,
    envelope: Envelope,
    noise: u32,
}

impl Voice {
    pub fn new(
        channel: u8,
        note: u8,
        velocity: u8,
        waveform: Waveform,
        bend: f32,
        sample_rate: f32,
        age: u64,
    ) -> Self {
        let shape = if waveform == Waveform::Noise {
            PERCUSSION_SHAPE
        } else {
            MELODIC_SHAPE
        };
        let mut envelope = Envelope::new(shape, sample_rate);
        envelope.gate_on();

        let mut voice = Self {
            channel,
            note,
            velocity,
            held_by_pedal: false,
            age,
            waveform,
            phase: 0.0,
            phase_inc: 0.0,
            envelope,
            noise: 0x1234_5678 ^ ((note as u32) << 8 | channel as u32),
        };
        voice.set_pitch(bend, sample_rate);
        voice
    }

    /// Recomputes the phase increment for a bend in semitones.
    pub fn set_pitch(&mut self, bend: f32, sample_rate: f32) {
        self.phase_inc = note_to_hz(self.note as f32 + bend) / sample_rate;
    }

    pub fn release(&mut self) {
        self.held_by_pedal = false;
        self.envelope.gate_off();
    }

    pub fn kill(&mut self) {
        self.envelope.kill();
    }

    pub fn is_active(&self) -> bool {
        self.envelope.is_active()
    }

    /// Is the key still down (not releasing)?
    pub fn is_held(&self) -> bool {
        use super::envelope::EnvelopeStage;
        !matches!(
            self.envelope.stage(),
            EnvelopeStage::Release | EnvelopeStage::Idle
        )
    }

    /// Produces the next sample, before channel gain and panning.
    #[inline]
    pub fn next(&mut self) -> f32 {
        let raw = match self.waveform {
            Waveform::Sine => (self.phase * TAU).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            Waveform::Saw => 2.0 * self.phase - 1.0,
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Noise => {
                // xorshift32
                let mut x = self.noise;
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                self.noise = x;
                (x as f32 / u32::MAX as f32) * 2.0 - 1.0
            }
        };

        self.phase += self.phase_inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        raw * self.envelope.next()
    }
}
