//! Sequin Library
//!
//! Real-time multi-format MIDI sequencer and rendering engine: score decoders,
//! a sample-accurate sequencer driver, a synthesis surface, and the pipeline that
//! delivers audio to an output device or a PCM file.

pub mod config;
pub mod dsp;
pub mod engine;
pub mod midi;
pub mod queue;
pub mod sequence;
pub mod synth;
