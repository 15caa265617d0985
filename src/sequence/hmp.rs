//! HMP songs.
//!
//! The header carries the track count and a ticks-per-second division; track
//! chunks follow at a fixed offset that depends on the header revision. Each chunk
//! is `track number, chunk length (including this 12-byte header), id`.

use tracing::debug;

use super::timing::TickClock;
use super::track::{Dialect, TrackSequence, TrackSpan};
use super::SequenceFormat;
use crate::engine::INTERNAL_SAMPLE_RATE;
use crate::midi::ByteReader;

const SIGNATURE: &[u8] = b"HMIMIDIP";
const REVISED_SIGNATURE: &[u8] = b"HMIMIDIP013195";

const TRACK_COUNT_OFFSET: usize = 0x30;
const DIVISION_OFFSET: usize = 0x38;
const TRACKS_OFFSET: usize = 0x308;
const REVISED_TRACKS_OFFSET: usize = 0x388;
const CHUNK_HEADER_LEN: usize = 12;

/// See the HMI module: the division is in ticks per second.
const HMP_USEC_PER_BEAT: u32 = 1_000_000;

pub fn recognize(data: &[u8]) -> bool {
    data.starts_with(SIGNATURE)
}

/// Decodes an HMP song. Track chunks are read until the declared count is reached
/// or a chunk does not fit.
pub fn load(data: &[u8]) -> TrackSequence {
    let tracks_offset = if data.starts_with(REVISED_SIGNATURE) {
        REVISED_TRACKS_OFFSET
    } else {
        TRACKS_OFFSET
    };
    let track_count = ByteReader::new(data, TRACK_COUNT_OFFSET)
        .u32_le()
        .unwrap_or(0) as usize;
    let division = ByteReader::new(data, DIVISION_OFFSET).u32_le().unwrap_or(60);

    let mut tracks = Vec::new();
    let mut r = ByteReader::new(data, tracks_offset);
    while tracks.len() < track_count {
        let start = r.pos();
        let Some(len) = r.skip(4).and_then(|_| r.u32_le()) else {
            break;
        };
        let len = len as usize;
        if len < CHUNK_HEADER_LEN {
            break;
        }
        let end = start.saturating_add(len).min(data.len());
        tracks.push(TrackSpan::new(start + CHUNK_HEADER_LEN, end.max(start + CHUNK_HEADER_LEN)));
        if r.skip(len - 8).is_none() {
            break;
        }
    }
    debug!(division, tracks = tracks.len(), "parsed HMP header");

    TrackSequence::new(
        SequenceFormat::Hmp,
        Dialect::Hmp,
        data.to_vec(),
        vec![tracks],
        TickClock::metrical_with_tempo(division, HMP_USEC_PER_BEAT, INTERNAL_SAMPLE_RATE),
    )
}
