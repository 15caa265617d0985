//! HMI songs (Human Machine Interfaces "SOS" driver format).
//!
//! A fixed header holds the division and a directory of track offsets. Each track
//! begins with its own `HMI-MIDITRACK` header whose event data offset is stored
//! at a fixed position. Division is in ticks per second.

use tracing::{debug, warn};

use super::timing::TickClock;
use super::track::{Dialect, TrackSequence, TrackSpan};
use super::SequenceFormat;
use crate::engine::INTERNAL_SAMPLE_RATE;
use crate::midi::ByteReader;

const SIGNATURE: &[u8] = b"HMI-MIDISONG061595";
const TRACK_SIGNATURE: &[u8] = b"HMI-MIDITRACK";

const DIVISION_OFFSET: usize = 0xD4;
const TRACK_COUNT_OFFSET: usize = 0xE4;
const TRACK_DIR_OFFSET: usize = 0xE8;
const TRACK_DATA_OFFSET: usize = 0x57;

/// One second per beat, so a metrical clock at `division` ticks per beat runs at
/// `division` ticks per second until a tempo event says otherwise.
const HMI_USEC_PER_BEAT: u32 = 1_000_000;

pub fn recognize(data: &[u8]) -> bool {
    data.starts_with(SIGNATURE)
}

fn read_u32_le(data: &[u8], at: usize) -> Option<usize> {
    ByteReader::new(data, at).u32_le().map(|v| v as usize)
}

/// Decodes an HMI song. Tracks whose header is missing or out of range are
/// skipped.
pub fn load(data: &[u8]) -> TrackSequence {
    let division = ByteReader::new(data, DIVISION_OFFSET).u16_le().unwrap_or(60);
    let track_count = ByteReader::new(data, TRACK_COUNT_OFFSET)
        .u16_le()
        .unwrap_or(0) as usize;
    let directory = read_u32_le(data, TRACK_DIR_OFFSET).unwrap_or(data.len());

    let offsets: Vec<usize> = (0..track_count)
        .map_while(|i| read_u32_le(data, directory.saturating_add(4 * i)))
        .collect();

    let mut tracks = Vec::with_capacity(offsets.len());
    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets
            .get(i + 1)
            .copied()
            .filter(|&next| next > start)
            .unwrap_or(data.len())
            .min(data.len());
        if start >= end || !data[start..end].starts_with(TRACK_SIGNATURE) {
            warn!(track = i, offset = start, "skipping HMI track without header");
            continue;
        }
        let Some(data_offset) = read_u32_le(data, start + TRACK_DATA_OFFSET) else {
            continue;
        };
        tracks.push(TrackSpan::new(start.saturating_add(data_offset).min(end), end));
    }
    debug!(division, tracks = tracks.len(), "parsed HMI header");

    TrackSequence::new(
        SequenceFormat::Hmi,
        Dialect::Hmi,
        data.to_vec(),
        vec![tracks],
        TickClock::metrical_with_tempo(division as u32, HMI_USEC_PER_BEAT, INTERNAL_SAMPLE_RATE),
    )
}
