//! Sequence module
//!
//! Decoders for every supported score encoding, unified behind one contract.
//!
//! A [`Sequence`] is a cursor over decoded score data. The sequencer calls
//! [`Sequence::advance`] whenever the previously returned delay has elapsed; the
//! sequence dispatches every event due at the current tick to the synth and
//! reports how many samples to wait before calling again.
//!
//! Format selection is a fixed priority list ([`SequenceFormat::PRIORITY`]): the
//! first format whose signature matches claims the buffer. The live-input marker
//! is checked first since it is not a real file format.

pub mod hmi;
pub mod hmp;
pub mod mid;
pub mod midi_in;
pub mod mus;
pub mod timing;
pub mod track;
pub mod xmi;

#[cfg(test)]
pub mod fixtures;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::engine::{INTERNAL_BLOCK_FRAMES, INTERNAL_SAMPLE_RATE};
use crate::queue::{WakeSignal, DEFAULT_EVENT_CAPACITY};
use crate::synth::Synth;

pub use midi_in::{InputPort, LiveInputSequence};
#[cfg(test)]
pub use midi_in::{LoopbackPort, LoopbackSender};
pub use mus::MusSequence;
pub use timing::TickClock;
pub use track::{Dialect, TrackSequence, TrackSpan};

/// Delay returned when a sequence cannot make progress (corrupt data, or a loop
/// that covers no time): one internal block.
pub const FALLBACK_DELAY_SAMPLES: u32 = INTERNAL_BLOCK_FRAMES as u32;

/// Result of [`Sequence::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Call again after this many samples.
    Delay(u32),
    /// No input pending (live input only). Call again after this many samples.
    Idle(u32),
    /// Input has been silent for a long time (live input only). The caller may
    /// stop rendering until the sequence's wake signal fires.
    Sleep,
    /// The sequence finished and is not looping.
    End,
}

/// Supported encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceFormat {
    /// `//MIDIIN<port>` pseudo path: live input from a MIDI port.
    MidiIn,
    /// DMX MUS.
    Mus,
    /// Standard MIDI file, bare or RIFF-wrapped.
    Mid,
    /// Extended MIDI (XMI).
    Xmi,
    /// HMI song.
    Hmi,
    /// HMP song.
    Hmp,
}

impl SequenceFormat {
    /// Recognition order.
    pub const PRIORITY: [SequenceFormat; 6] = [
        SequenceFormat::MidiIn,
        SequenceFormat::Mus,
        SequenceFormat::Mid,
        SequenceFormat::Xmi,
        SequenceFormat::Hmi,
        SequenceFormat::Hmp,
    ];

    /// Does `data` carry this format's signature?
    pub fn matches(self, data: &[u8]) -> bool {
        match self {
            SequenceFormat::MidiIn => midi_in::recognize(data),
            SequenceFormat::Mus => mus::recognize(data),
            SequenceFormat::Mid => mid::recognize(data),
            SequenceFormat::Xmi => xmi::recognize(data),
            SequenceFormat::Hmi => hmi::recognize(data),
            SequenceFormat::Hmp => hmp::recognize(data),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SequenceFormat::MidiIn => "MIDI-IN",
            SequenceFormat::Mus => "MUS",
            SequenceFormat::Mid => "MID",
            SequenceFormat::Xmi => "XMI",
            SequenceFormat::Hmi => "HMI",
            SequenceFormat::Hmp => "HMP",
        }
    }
}

impl fmt::Display for SequenceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from loading a sequence.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognized sequence format")]
    Unrecognized,
}

/// A decoded score (or live input) with a playback cursor.
///
/// Every method is called from the render thread only.
pub trait Sequence: Send {
    fn format(&self) -> SequenceFormat;

    /// Rewinds to time zero of the current song and restores the format's default
    /// state. Live input (re)opens its port here.
    fn reset(&mut self);

    /// Dispatches every event due now and returns how long to wait.
    fn advance(&mut self, synth: &mut dyn Synth) -> Advance;

    /// Number of independently selectable songs.
    fn song_count(&self) -> usize {
        1
    }

    /// Index of the current song.
    fn song_index(&self) -> usize {
        0
    }

    /// Selects a song and rewinds to its start. `index` must be below
    /// [`Sequence::song_count`]; the sequencer clamps before calling.
    fn select_song(&mut self, index: usize) {
        debug_assert!(index < self.song_count());
        self.reset();
    }

    /// Rate that returned delays are expressed in.
    fn set_sample_rate(&mut self, sample_rate: u32);

    /// When set, reaching the end rewinds to the loop point instead of returning
    /// [`Advance::End`].
    fn set_looping(&mut self, looping: bool);

    /// Is input waiting to be dispatched? Lets the sequencer cut an idle wait
    /// short.
    fn has_pending_input(&self) -> bool {
        false
    }

    /// Signal fired when new input arrives, for sequences that can sleep.
    fn wake_signal(&self) -> Option<Arc<WakeSignal>> {
        None
    }
}

/// Returns the first format in priority order whose signature matches.
pub fn recognize(data: &[u8]) -> Option<SequenceFormat> {
    SequenceFormat::PRIORITY
        .into_iter()
        .find(|format| format.matches(data))
}

/// Decodes `data` into a sequence positioned at the start of song 0.
///
/// Live input is opened on the system MIDI input port named by the marker.
pub fn load(data: &[u8]) -> Result<Box<dyn Sequence>, SequenceError> {
    let format = recognize(data).ok_or(SequenceError::Unrecognized)?;
    let mut sequence: Box<dyn Sequence> = match format {
        SequenceFormat::MidiIn => open_live(midi_in::port_number(data), DEFAULT_EVENT_CAPACITY),
        SequenceFormat::Mus => Box::new(mus::load(data)),
        SequenceFormat::Mid => Box::new(mid::load(data)),
        SequenceFormat::Xmi => Box::new(xmi::load(data)),
        SequenceFormat::Hmi => Box::new(hmi::load(data)),
        SequenceFormat::Hmp => Box::new(hmp::load(data)),
    };
    sequence.set_sample_rate(INTERNAL_SAMPLE_RATE);
    sequence.reset();

    info!(
        format = %format,
        songs = sequence.song_count(),
        bytes = data.len(),
        "sequence loaded"
    );
    Ok(sequence)
}

fn open_live(port: usize, event_capacity: usize) -> Box<dyn Sequence> {
    Box::new(LiveInputSequence::new(
        Box::new(crate::engine::MidirPort::new()),
        port,
        event_capacity,
    ))
}

/// Loads a sequence from a file, or opens live input for a `//MIDIIN<port>` path.
/// A bare `//MIDIIN` selects port 0; the live input ring holds `event_capacity`
/// messages.
pub fn load_path(path: &Path, event_capacity: usize) -> Result<Box<dyn Sequence>, SequenceError> {
    let text = path.to_string_lossy();
    if midi_in::has_marker(text.as_bytes()) {
        let port = midi_in::port_number(text.as_bytes());
        let mut sequence = open_live(port, event_capacity);
        sequence.set_sample_rate(INTERNAL_SAMPLE_RATE);
        sequence.reset();
        info!(format = %SequenceFormat::MidiIn, port, "sequence loaded");
        return Ok(sequence);
    }

    let data = fs::read(path).map_err(|source| SequenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load(&data)
}
