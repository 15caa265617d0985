//! Extended MIDI (XMI).
//!
//! XMI files are IFF containers: an optional `FORM XDIR` directory followed by a
//! `CAT XMID` holding one `FORM XMID` per song, each with a single `EVNT` chunk.
//! Event data runs at a fixed 120 ticks per second.

use tracing::debug;

use super::timing::TickClock;
use super::track::{Dialect, TrackSequence, TrackSpan};
use super::SequenceFormat;
use crate::engine::INTERNAL_SAMPLE_RATE;
use crate::midi::ByteReader;

/// Fixed tick rate.
pub const XMI_TICKS_PER_SECOND: u32 = 120;

/// Containers nest at most FORM > CAT > FORM in real files.
const MAX_DEPTH: usize = 8;

pub fn recognize(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let (id, kind) = (&data[0..4], &data[8..12]);
    (id == b"FORM" && (kind == b"XDIR" || kind == b"XMID")) || (id == b"CAT " && kind == b"XMID")
}

fn collect_songs(data: &[u8], start: usize, end: usize, depth: usize, songs: &mut Vec<Vec<TrackSpan>>) {
    let data = &data[..end];
    let mut pos = start;
    loop {
        let mut r = ByteReader::new(data, pos);
        let (Some(id), Some(len)) = (r.bytes(4), r.u32_be()) else {
            return;
        };
        let body = r.pos();
        let len = len as usize;
        let body_end = body.saturating_add(len).min(end);

        match id {
            b"FORM" | b"CAT " | b"LIST" if depth < MAX_DEPTH => {
                // Skip the 4-byte container type
                collect_songs(data, body + 4, body_end, depth + 1, songs);
            }
            b"EVNT" => songs.push(vec![TrackSpan::new(body, body_end)]),
            _ => {}
        }
        pos = body.saturating_add(len).saturating_add(len & 1);
    }
}

/// Decodes an XMI file. Every `EVNT` chunk becomes a song.
pub fn load(data: &[u8]) -> TrackSequence {
    let mut songs = Vec::new();
    collect_songs(data, 0, data.len(), 0, &mut songs);
    debug!(songs = songs.len(), "parsed XMI container");

    TrackSequence::new(
        SequenceFormat::Xmi,
        Dialect::Xmi,
        data.to_vec(),
        songs,
        TickClock::fixed(XMI_TICKS_PER_SECOND, INTERNAL_SAMPLE_RATE),
    )
}
