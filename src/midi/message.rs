//! MIDI messages.
//!
//! Short channel messages are fixed-size records so they can travel through the
//! lock-free event ring as a single packed word. System-exclusive payloads are
//! variable-length and travel separately (see [`crate::queue::SysExQueue`]).

/// Status byte that starts a system-exclusive message.
pub const SYSEX_START: u8 = 0xF0;

/// Status byte that starts a meta event in file encodings.
pub const META_EVENT: u8 = 0xFF;

/// Classification of a status byte by its high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Note on (0x9n).
    NoteOn,
    /// Note off, polyphonic pressure, controller, pitch bend: two data bytes.
    TwoData,
    /// Program change or channel pressure: one data byte.
    OneData,
    /// System / meta (0xFn). Triggers a system-exclusive drain on live input.
    System,
    /// Not a status byte (high bit clear).
    Data,
}

impl MessageKind {
    /// Classify a status byte.
    pub fn of(status: u8) -> Self {
        match status >> 4 {
            0x9 => MessageKind::NoteOn,
            0x8 | 0xA | 0xB | 0xE => MessageKind::TwoData,
            0xC | 0xD => MessageKind::OneData,
            0xF => MessageKind::System,
            _ => MessageKind::Data,
        }
    }

    /// Number of data bytes that follow a channel status byte.
    pub fn data_len(self) -> usize {
        match self {
            MessageKind::NoteOn | MessageKind::TwoData => 2,
            MessageKind::OneData => 1,
            MessageKind::System | MessageKind::Data => 0,
        }
    }
}

/// A short MIDI message with a millisecond timestamp.
///
/// Packs into a single `u64` (`status | data1 << 8 | data2 << 16 | timestamp << 32`)
/// so a ring slot can be published atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiMessage {
    /// Status byte (channel in the low nibble for channel messages).
    pub status: u8,
    /// First data byte.
    pub data1: u8,
    /// Second data byte (0 for one-byte messages).
    pub data2: u8,
    /// Capture timestamp in milliseconds.
    pub timestamp_ms: u32,
}

impl MidiMessage {
    /// Creates a message from its parts.
    pub fn new(status: u8, data1: u8, data2: u8, timestamp_ms: u32) -> Self {
        Self {
            status,
            data1,
            data2,
            timestamp_ms,
        }
    }

    /// Builds a message from raw bytes as delivered by an input port.
    /// Missing data bytes read as zero. Returns `None` for an empty slice.
    pub fn from_bytes(bytes: &[u8], timestamp_ms: u32) -> Option<Self> {
        let status = *bytes.first()?;
        Some(Self::new(
            status,
            bytes.get(1).copied().unwrap_or(0) & 0x7F,
            bytes.get(2).copied().unwrap_or(0) & 0x7F,
            timestamp_ms,
        ))
    }

    /// Builds the placeholder that marks a system-exclusive payload's position
    /// in the short-message stream. The data bytes carry the payload's serial.
    pub fn sysex_marker(serial: u16, timestamp_ms: u32) -> Self {
        Self::new(SYSEX_START, serial as u8, (serial >> 8) as u8, timestamp_ms)
    }

    /// Serial of the payload a sysex placeholder stands for.
    pub fn sysex_serial(&self) -> u16 {
        self.data1 as u16 | (self.data2 as u16) << 8
    }

    /// Status classification.
    pub fn kind(&self) -> MessageKind {
        MessageKind::of(self.status)
    }

    /// MIDI channel (low nibble of the status byte).
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    /// Packs the message into one word.
    #[inline]
    pub fn pack(&self) -> u64 {
        (self.status as u64)
            | (self.data1 as u64) << 8
            | (self.data2 as u64) << 16
            | (self.timestamp_ms as u64) << 32
    }

    /// Inverse of [`MidiMessage::pack`].
    #[inline]
    pub fn unpack(word: u64) -> Self {
        Self {
            status: word as u8,
            data1: (word >> 8) as u8,
            data2: (word >> 16) as u8,
            timestamp_ms: (word >> 32) as u32,
        }
    }
}

/// A system-exclusive payload captured from live input.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SysExPayload {
    /// Raw bytes, starting with 0xF0 as captured.
    pub data: Vec<u8>,
    /// Capture timestamp in milliseconds.
    pub timestamp_ms: u32,
    /// Capture order, shared with the placeholder in the event ring. Wraps.
    pub serial: u16,
}

impl SysExPayload {
    /// Creates a payload from captured bytes.
    pub fn new(data: Vec<u8>, timestamp_ms: u32, serial: u16) -> Self {
        Self {
            data,
            timestamp_ms,
            serial,
        }
    }

    /// Was this payload captured before the one numbered `serial`?
    pub fn precedes(&self, serial: u16) -> bool {
        (serial.wrapping_sub(self.serial) as i16) > 0
    }

    /// The message body without the framing 0xF0 / 0xF7 bytes.
    pub fn body(&self) -> &[u8] {
        let mut body = self.data.as_slice();
        if body.first() == Some(&SYSEX_START) {
            body = &body[1..];
        }
        if body.last() == Some(&0xF7) {
            body = &body[..body.len() - 1];
        }
        body
    }
}
