//! Multi-track cursor engine shared by the MIDI-like formats.
//!
//! SMF, HMP, HMI and XMI all encode songs as one or more tracks of
//! `delta, event, delta, event, ...`. They differ only in details: how a delta
//! is encoded, whether running status is allowed, whether note-ons carry their own
//! duration, and a handful of format-private events. [`Dialect`] captures those
//! details; [`TrackSequence`] does everything else.
//!
//! Decoding is fully bounds-checked. A truncated event, a length running past the
//! end of the track, or an unknown status byte ends that track; it never panics
//! and never surfaces an error.

use tracing::debug;

use super::timing::TickClock;
use super::{Advance, Sequence, SequenceFormat, FALLBACK_DELAY_SAMPLES};
use crate::midi::{ByteReader, MessageKind, META_EVENT, SYSEX_START};
use crate::synth::Synth;

/// XMI controller that marks the loop start.
const XMI_LOOP_START: u8 = 116;

/// HMI-private event prefix.
const HMI_SPECIAL: u8 = 0xFE;

/// Meta event: end of track.
const META_END_OF_TRACK: u8 = 0x2F;

/// Meta event: tempo in microseconds per quarter note (3 bytes, big-endian).
const META_TEMPO: u8 = 0x51;

/// Encoding details that differ between MIDI-like formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Standard MIDI file.
    Smf,
    /// HMP: little-endian deltas with the stop bit on the last byte.
    Hmp,
    /// HMI: duration-bearing note-ons and `FE xx` special events.
    Hmi,
    /// XMI: summed intervals, duration-bearing note-ons, no running status.
    Xmi,
}

impl Dialect {
    fn read_delta(self, r: &mut ByteReader<'_>) -> Option<u32> {
        match self {
            Dialect::Smf | Dialect::Hmi => r.vlq(),
            Dialect::Hmp => r.vlq_reversed(),
            Dialect::Xmi => r.xmi_interval(),
        }
    }

    fn running_status(self) -> bool {
        self != Dialect::Xmi
    }

    fn note_durations(self) -> bool {
        matches!(self, Dialect::Xmi | Dialect::Hmi)
    }

    fn honours_tempo(self) -> bool {
        self != Dialect::Xmi
    }
}

/// Byte range of one track inside the sequence data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSpan {
    pub start: usize,
    pub end: usize,
}

impl TrackSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackCursor {
    end: usize,
    pos: usize,
    /// Ticks until the next event.
    delay: u32,
    running: u8,
    done: bool,
}

impl TrackCursor {
    fn start(data: &[u8], span: TrackSpan, dialect: Dialect) -> Self {
        let end = span.end.min(data.len());
        let mut cursor = Self {
            end,
            pos: span.start.min(end),
            delay: 0,
            running: 0,
            done: false,
        };
        let mut r = ByteReader::new(&data[..end], cursor.pos);
        match dialect.read_delta(&mut r) {
            Some(delta) => {
                cursor.pos = r.pos();
                cursor.delay = delta;
            }
            None => cursor.done = true,
        }
        cursor
    }
}

/// A note-off the decoder owes the synth, for formats whose note-ons carry a
/// duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingNote {
    channel: u8,
    note: u8,
    remaining: u32,
}

#[derive(Debug, Clone)]
struct LoopPoint {
    cursors: Vec<TrackCursor>,
    tempo: Option<u32>,
}

enum Step {
    Next,
    /// XMI loop marker seen; holds the marker's own offset.
    LoopStart(usize),
}

/// Track-based sequence: MID, XMI, HMI and HMP.
pub struct TrackSequence {
    format: SequenceFormat,
    dialect: Dialect,
    data: Vec<u8>,
    songs: Vec<Vec<TrackSpan>>,
    song: usize,
    clock: TickClock,
    cursors: Vec<TrackCursor>,
    pending: Vec<PendingNote>,
    loop_point: Option<LoopPoint>,
    looping: bool,
    /// Sequence time has moved since the last rewind.
    progressed: bool,
}

impl TrackSequence {
    /// Builds a sequence over `data`. An empty song list becomes a single empty
    /// song, which ends immediately.
    pub fn new(
        format: SequenceFormat,
        dialect: Dialect,
        data: Vec<u8>,
        mut songs: Vec<Vec<TrackSpan>>,
        clock: TickClock,
    ) -> Self {
        if songs.is_empty() {
            songs.push(Vec::new());
        }
        let mut seq = Self {
            format,
            dialect,
            data,
            songs,
            song: 0,
            clock,
            cursors: Vec::new(),
            pending: Vec::new(),
            loop_point: None,
            looping: false,
            progressed: false,
        };
        seq.reset();
        seq
    }

    /// Number of tracks in the current song.
    pub fn track_count(&self) -> usize {
        self.songs[self.song].len()
    }

    fn restart_cursors(&mut self) {
        let data = &self.data;
        let dialect = self.dialect;
        self.cursors.clear();
        self.cursors.extend(
            self.songs[self.song]
                .iter()
                .map(|&span| TrackCursor::start(data, span, dialect)),
        );
    }

    fn flush_due(&mut self, synth: &mut dyn Synth) {
        self.pending.retain(|note| {
            if note.remaining == 0 {
                synth.channel_event(0x80 | note.channel, note.note, 0);
                false
            } else {
                true
            }
        });
    }

    fn flush_all(&mut self, synth: &mut dyn Synth) {
        for note in self.pending.drain(..) {
            synth.channel_event(0x80 | note.channel, note.note, 0);
        }
    }

    fn run_track(&mut self, index: usize, synth: &mut dyn Synth) {
        loop {
            let cursor = &mut self.cursors[index];
            if cursor.done || cursor.delay > 0 {
                return;
            }
            let step = decode_event(
                &self.data,
                cursor,
                self.dialect,
                &mut self.clock,
                &mut self.pending,
                synth,
            );
            match step {
                None => cursor.done = true,
                Some(Step::Next) => {}
                Some(Step::LoopStart(offset)) => {
                    let mut cursors = self.cursors.clone();
                    cursors[index].pos = offset;
                    cursors[index].delay = 0;
                    self.loop_point = Some(LoopPoint {
                        cursors,
                        tempo: self.clock.tempo(),
                    });
                }
            }
        }
    }

    /// Smallest number of ticks until something happens, or `None` at the end.
    fn next_delta(&self) -> Option<u32> {
        let tracks = self
            .cursors
            .iter()
            .filter(|c| !c.done)
            .map(|c| c.delay);
        let notes = self.pending.iter().map(|n| n.remaining);
        tracks.chain(notes).min()
    }

    fn elapse(&mut self, ticks: u32) {
        for cursor in self.cursors.iter_mut().filter(|c| !c.done) {
            cursor.delay -= ticks;
        }
        for note in self.pending.iter_mut() {
            note.remaining -= ticks;
        }
    }

    fn rewind(&mut self, synth: &mut dyn Synth) {
        self.flush_all(synth);
        self.clock.reset();
        match &self.loop_point {
            Some(point) => {
                self.cursors.clone_from(&point.cursors);
                if let Some(tempo) = point.tempo {
                    self.clock.set_tempo(tempo);
                }
            }
            None => self.restart_cursors(),
        }
        self.progressed = false;
        debug!(format = %self.format, song = self.song, "sequence looped");
    }
}

/// Decodes one event at the cursor, dispatches it, and reads the following delta.
/// Returns `None` when the track ends, cleanly or not.
fn decode_event(
    data: &[u8],
    cursor: &mut TrackCursor,
    dialect: Dialect,
    clock: &mut TickClock,
    pending: &mut Vec<PendingNote>,
    synth: &mut dyn Synth,
) -> Option<Step> {
    let event_start = cursor.pos;
    let mut r = ByteReader::new(&data[..cursor.end], cursor.pos);
    let mut step = Step::Next;

    let mut status = r.peek()?;
    if status < 0x80 {
        if !dialect.running_status() || cursor.running == 0 {
            return None;
        }
        status = cursor.running;
    } else {
        r.u8()?;
    }

    match status {
        0x80..=0xEF => {
            if dialect.running_status() {
                cursor.running = status;
            }
            let kind = MessageKind::of(status);
            let data1 = r.u8()? & 0x7F;
            let data2 = if kind.data_len() == 2 { r.u8()? & 0x7F } else { 0 };

            if kind == MessageKind::NoteOn && data2 > 0 && dialect.note_durations() {
                let duration = r.vlq()?;
                pending.push(PendingNote {
                    channel: status & 0x0F,
                    note: data1,
                    remaining: duration,
                });
            }
            if dialect == Dialect::Xmi && status & 0xF0 == 0xB0 && data1 == XMI_LOOP_START {
                step = Step::LoopStart(event_start);
            }
            synth.channel_event(status, data1, data2);
        }
        SYSEX_START | 0xF7 => {
            cursor.running = 0;
            let block = r.vlq_block()?;
            if status == SYSEX_START {
                let body = block.strip_suffix(&[0xF7]).unwrap_or(block);
                synth.system_exclusive(body);
            }
        }
        META_EVENT => {
            let kind = r.u8()?;
            let block = r.vlq_block()?;
            match kind {
                META_END_OF_TRACK => return None,
                META_TEMPO if block.len() >= 3 && dialect.honours_tempo() => {
                    let usec = (block[0] as u32) << 16 | (block[1] as u32) << 8 | block[2] as u32;
                    clock.set_tempo(usec);
                }
                _ => {}
            }
        }
        HMI_SPECIAL if dialect == Dialect::Hmi => match r.u8()? {
            0x10 => {
                r.skip(2)?;
                let len = r.u8()? as usize;
                r.skip(len + 4)?;
            }
            0x12 | 0x14 => r.skip(2)?,
            0x13 | 0x15 => r.skip(6)?,
            _ => return None,
        },
        _ => return None,
    }

    let delta = dialect.read_delta(&mut r)?;
    cursor.pos = r.pos();
    cursor.delay = delta;
    Some(step)
}

impl Sequence for TrackSequence {
    fn format(&self) -> SequenceFormat {
        self.format
    }

    fn reset(&mut self) {
        self.restart_cursors();
        self.pending.clear();
        self.loop_point = None;
        self.clock.reset();
        self.progressed = false;
    }

    fn advance(&mut self, synth: &mut dyn Synth) -> Advance {
        let mut rewound = false;
        loop {
            self.flush_due(synth);
            for index in 0..self.cursors.len() {
                self.run_track(index, synth);
            }

            if let Some(ticks) = self.next_delta() {
                self.elapse(ticks);
                if ticks > 0 {
                    self.progressed = true;
                }
                return Advance::Delay(self.clock.ticks_to_samples(ticks));
            }

            if !self.looping {
                self.flush_all(synth);
                return Advance::End;
            }

            // A loop that covers no time would spin forever.
            let progressed = self.progressed;
            self.rewind(synth);
            if !progressed || rewound {
                return Advance::Delay(FALLBACK_DELAY_SAMPLES);
            }
            rewound = true;
        }
    }

    fn song_count(&self) -> usize {
        self.songs.len()
    }

    fn song_index(&self) -> usize {
        self.song
    }

    fn select_song(&mut self, index: usize) {
        debug_assert!(index < self.songs.len());
        self.song = index.min(self.songs.len() - 1);
        self.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.clock.set_sample_rate(sample_rate);
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }
}
