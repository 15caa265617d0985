//! Engine module
//!
//! Everything between a loaded sequence and the speakers: the sequencer driver,
//! the rendering pipeline, the output device surface, live input ports, and the
//! render thread that ties them together.

pub mod audio_engine;
pub mod channels;
pub mod commands;
pub mod control;
pub mod live;
pub mod midi_engine;
pub mod render;
pub mod sequencer;

/// Rate the synthesizer always runs at.
pub const INTERNAL_SAMPLE_RATE: u32 = 50_000;

/// Frames synthesized per pipeline step.
pub const INTERNAL_BLOCK_FRAMES: usize = 512;

/// Slack added to the accumulation buffer on top of one converted block.
pub const OUTPUT_MARGIN_FRAMES: usize = 64;

/// Supported output sample rates.
pub const MIN_OUTPUT_RATE: u32 = 8_000;
pub const MAX_OUTPUT_RATE: u32 = 384_000;

pub use audio_engine::{output_devices, AudioError, AudioSink, CpalSink, DeviceError, DeviceInfo};
#[cfg(test)]
pub use audio_engine::{MemoryDevice, MemorySink};
pub use channels::{
    ControlHandle, PlayerChannels, RenderHandle, DEFAULT_COMMAND_BUFFER_SIZE,
    DEFAULT_EVENT_BUFFER_SIZE,
};
pub use commands::{PlayerCommand, PlayerEvent};
pub use control::ControlState;
pub use live::{LiveOptions, LiveRenderer};
pub use midi_engine::{input_ports, MidiDeviceInfo, MidiError, MidirPort};
pub use render::{
    BulkSummary, PcmSink, RenderError, RenderPipeline, TailDecision, TailDetector,
    DEFAULT_MAX_TAIL,
};
pub use sequencer::{PlaybackState, Sequencer, SequencerError};
