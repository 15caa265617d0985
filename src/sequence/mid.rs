//! Standard MIDI files, bare (`MThd`) or wrapped in a RIFF `RMID` container.

use tracing::debug;

use super::timing::TickClock;
use super::track::{Dialect, TrackSequence, TrackSpan};
use super::SequenceFormat;
use crate::engine::INTERNAL_SAMPLE_RATE;
use crate::midi::ByteReader;

/// Multi-song file: every track is its own song.
const FORMAT_MULTI_SONG: u16 = 2;

pub fn recognize(data: &[u8]) -> bool {
    data.starts_with(b"MThd") || is_rmid(data)
}

fn is_rmid(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"RMID"
}

/// Offset of the embedded SMF image inside a RIFF container.
fn riff_data_offset(data: &[u8]) -> Option<usize> {
    let mut r = ByteReader::new(data, 12);
    loop {
        let id = r.bytes(4)?;
        let len = r.u32_le()? as usize;
        if id == b"data" {
            return Some(r.pos());
        }
        r.skip(len + (len & 1))?;
    }
}

/// Builds the tick clock from the header's division word.
fn clock_for(division: u16) -> TickClock {
    if division & 0x8000 != 0 {
        // SMPTE: negative frames per second in the high byte, ticks per frame in the low
        let fps = match -((division >> 8) as u8 as i8 as i32) as u32 {
            29 => 30,
            fps => fps,
        };
        let ticks_per_frame = (division & 0xFF) as u32;
        TickClock::fixed(fps * ticks_per_frame, INTERNAL_SAMPLE_RATE)
    } else {
        TickClock::metrical(division as u32, INTERNAL_SAMPLE_RATE)
    }
}

struct Header {
    /// Offset of the first chunk after `MThd`.
    body: usize,
    format: u16,
    track_count: u16,
    division: u16,
}

fn parse_header(data: &[u8], start: usize) -> Option<Header> {
    let mut r = ByteReader::new(data, start);
    if r.bytes(4)? != b"MThd" {
        return None;
    }
    let header_len = r.u32_be()? as usize;
    let body = r.pos().saturating_add(header_len);
    Some(Header {
        format: r.u16_be()?,
        track_count: r.u16_be()?,
        division: r.u16_be()?,
        body,
    })
}

/// Decodes an SMF image. Unknown chunks are skipped and truncated tracks are cut at
/// the end of the data.
pub fn load(data: &[u8]) -> TrackSequence {
    let start = if is_rmid(data) {
        riff_data_offset(data).unwrap_or(data.len())
    } else {
        0
    };

    let Some(Header {
        body,
        format,
        track_count,
        division,
    }) = parse_header(data, start)
    else {
        return TrackSequence::new(
            SequenceFormat::Mid,
            Dialect::Smf,
            Vec::new(),
            Vec::new(),
            clock_for(96),
        );
    };

    let mut tracks = Vec::with_capacity(track_count as usize);
    let mut pos = body;
    while tracks.len() < track_count as usize {
        let mut r = ByteReader::new(data, pos);
        let (Some(id), Some(len)) = (r.bytes(4), r.u32_be()) else {
            break;
        };
        let chunk_start = r.pos();
        let len = len as usize;
        let chunk_end = chunk_start.saturating_add(len).min(data.len());
        if id == b"MTrk" {
            tracks.push(TrackSpan::new(chunk_start, chunk_end));
        }
        pos = chunk_end;
    }

    let songs = if format == FORMAT_MULTI_SONG {
        tracks.into_iter().map(|track| vec![track]).collect()
    } else {
        vec![tracks]
    };
    debug!(format, track_count, division, "parsed MIDI header");

    TrackSequence::new(
        SequenceFormat::Mid,
        Dialect::Smf,
        data.to_vec(),
        songs,
        clock_for(division),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::fixtures::{rmid, smf};
    use crate::sequence::{Advance, Sequence};
    use crate::synth::testing::RecordingSynth;

    fn play(seq: &mut TrackSequence) -> RecordingSynth {
        let mut synth = RecordingSynth::new();
        for _ in 0..1000 {
            if seq.advance(&mut synth) == Advance::End {
                break;
            }
        }
        synth
    }

    #[test]
    fn test_format_1_merges_tracks() {
        let data = smf(
            1,
            96,
            &[
                vec![0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20],
                vec![0x00, 0x90, 60, 100, 0x60, 0x80, 60, 0],
                vec![0x30, 0x91, 64, 100],
            ],
        );
        let mut seq = load(&data);
        assert_eq!(seq.song_count(), 1);
        assert_eq!(seq.track_count(), 3);
        let synth = play(&mut seq);
        assert_eq!(
            synth.channel_events(),
            vec![(0x90, 60, 100), (0x91, 64, 100), (0x80, 60, 0)]
        );
    }

    #[test]
    fn test_format_2_song_per_track() {
        let data = smf(
            2,
            96,
            &[vec![0x00, 0xC0, 0x01, 0x00, 0x90, 60, 100], vec![0x00, 0xC0, 0x02]],
        );
        let mut seq = load(&data);
        assert_eq!(seq.song_count(), 2);
        seq.select_song(1);
        seq.reset();
        let synth = play(&mut seq);
        assert_eq!(synth.channel_events(), vec![(0xC0, 2, 0)]);
    }

    #[test]
    fn test_unknown_chunk_skipped() {
        let mut data = smf(0, 96, &[]);
        // bump track count to 1 and append an alien chunk before the track
        data[11] = 1;
        data.extend_from_slice(b"XFIH");
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x90, 60, 100]);
        let mut seq = load(&data);
        let synth = play(&mut seq);
        assert_eq!(synth.channel_events(), vec![(0x90, 60, 100)]);
    }

    #[test]
    fn test_truncated_track_length() {
        let mut data = smf(0, 96, &[vec![0x00, 0x90, 60, 100]]);
        let len_at = 14 + 4;
        data[len_at..len_at + 4].copy_from_slice(&0x1000u32.to_be_bytes());
        let mut seq = load(&data);
        let synth = play(&mut seq);
        assert_eq!(synth.channel_events(), vec![(0x90, 60, 100)]);
    }

    #[test]
    fn test_rmid_wrapper() {
        let data = rmid(&smf(0, 96, &[vec![0x00, 0xC5, 0x09]]));
        assert!(recognize(&data));
        let mut seq = load(&data);
        let synth = play(&mut seq);
        assert_eq!(synth.channel_events(), vec![(0xC5, 9, 0)]);
    }

    #[test]
    fn test_smpte_division() {
        // -25 fps, 40 ticks per frame = 1000 ticks per second
        let division = ((-25i8 as u8 as u16) << 8) | 40;
        let data = smf(0, division, &[vec![0x00, 0x90, 60, 100, 0x87, 0x68, 0x80, 60, 0]]);
        let mut seq = load(&data);
        let mut synth = RecordingSynth::new();
        // 1000 ticks = one second
        assert_eq!(seq.advance(&mut synth), Advance::Delay(INTERNAL_SAMPLE_RATE));
    }

    #[test]
    fn test_headerless_rmid_is_empty() {
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(b"RMID");
        let mut seq = load(&data);
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::End);
    }
}
