//! Synth module
//!
//! The synthesis dispatch surface the sequencer drives, and a reference backend.
//!
//! The sequencer only ever talks to a synthesizer through [`Synth`]: it decides
//! *what* to send and *when*; how a note becomes a waveform is the backend's
//! business.

pub mod envelope;
pub mod tone;
pub mod voice;

#[cfg(test)]
pub mod testing;

pub use tone::ToneSynth;

/// A synthesis backend.
///
/// All methods are called from the render thread only.
pub trait Synth: Send {
    /// Dispatches a channel voice message (status 0x80-0xEF).
    fn channel_event(&mut self, status: u8, data1: u8, data2: u8);

    /// Dispatches a system-exclusive body (without the 0xF0/0xF7 framing).
    fn system_exclusive(&mut self, data: &[u8]);

    /// Silences every voice and restores power-on channel state.
    fn reset_voices(&mut self);

    /// Overwrites `out` with interleaved stereo frames (`out.len() / 2` frames).
    fn generate(&mut self, out: &mut [f32]);

    /// Sets the rate `generate` runs at.
    fn set_sample_rate(&mut self, sample_rate: u32);

    /// Enables or disables panning. When disabled, both channels are identical.
    fn set_stereo(&mut self, stereo: bool);
}

impl<S: Synth + ?Sized> Synth for Box<S> {
    fn channel_event(&mut self, status: u8, data1: u8, data2: u8) {
        (**self).channel_event(status, data1, data2)
    }

    fn system_exclusive(&mut self, data: &[u8]) {
        (**self).system_exclusive(data)
    }

    fn reset_voices(&mut self) {
        (**self).reset_voices()
    }

    fn generate(&mut self, out: &mut [f32]) {
        (**self).generate(out)
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        (**self).set_sample_rate(sample_rate)
    }

    fn set_stereo(&mut self, stereo: bool) {
        (**self).set_stereo(stereo)
    }
}
