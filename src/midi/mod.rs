//! MIDI module
//!
//! Message types shared by the file decoders and the live-input path,
//! plus the bounds-checked byte reader the decoders are built on.

pub mod message;
pub mod reader;

pub use message::{MessageKind, MidiMessage, SysExPayload, META_EVENT, SYSEX_START};
pub use reader::ByteReader;
