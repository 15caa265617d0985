//! Byte-level builders for test sequences in every supported format.

fn be32(n: usize) -> [u8; 4] {
    (n as u32).to_be_bytes()
}

fn le32(n: usize) -> [u8; 4] {
    (n as u32).to_le_bytes()
}

/// IFF chunk with big-endian length, padded to an even size.
pub fn iff_chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&be32(body.len()));
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// Standard MIDI file. Each track is raw event data without an end marker.
pub fn smf(format: u16, division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"MThd".to_vec();
    out.extend_from_slice(&be32(6));
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&division.to_be_bytes());
    for track in tracks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&be32(track.len()));
        out.extend_from_slice(track);
    }
    out
}

/// RIFF RMID wrapper around an SMF image, with a leading unrelated chunk.
pub fn rmid(smf: &[u8]) -> Vec<u8> {
    let mut body = b"RMID".to_vec();
    body.extend_from_slice(b"LIST");
    body.extend_from_slice(&le32(2));
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(b"data");
    body.extend_from_slice(&le32(smf.len()));
    body.extend_from_slice(smf);
    if smf.len() % 2 == 1 {
        body.push(0);
    }

    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&le32(body.len()));
    out.extend_from_slice(&body);
    out
}

/// MUS lump with a 16-byte header followed by `score`.
pub fn mus(score: &[u8]) -> Vec<u8> {
    let mut out = b"MUS\x1A".to_vec();
    out.extend_from_slice(&(score.len() as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(score);
    out
}

/// XMI file: `FORM XDIR` followed by `CAT XMID` holding one `FORM XMID` per song.
pub fn xmi(songs: &[Vec<u8>]) -> Vec<u8> {
    let mut info = b"XDIR".to_vec();
    info.extend(iff_chunk(b"INFO", &(songs.len() as u16).to_le_bytes()));
    let mut out = iff_chunk(b"FORM", &info);

    let mut forms = b"XMID".to_vec();
    for song in songs {
        let mut form = b"XMID".to_vec();
        form.extend(iff_chunk(b"TIMB", &[0, 0]));
        form.extend(iff_chunk(b"EVNT", song));
        forms.extend(iff_chunk(b"FORM", &form));
    }
    out.extend(iff_chunk(b"CAT ", &forms));
    out
}

const HMI_HEADER_LEN: usize = 0x100;
const HMI_TRACK_DATA: usize = 0x5B;

/// HMI song. `division` is in ticks per second.
pub fn hmi(division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"HMI-MIDISONG061595".to_vec();
    out.resize(HMI_HEADER_LEN, 0);
    out[0xD4..0xD6].copy_from_slice(&division.to_le_bytes());
    out[0xE4..0xE6].copy_from_slice(&(tracks.len() as u16).to_le_bytes());
    out[0xE8..0xEC].copy_from_slice(&le32(HMI_HEADER_LEN));

    let dir_end = HMI_HEADER_LEN + 4 * tracks.len();
    let mut offset = dir_end;
    let mut dir = Vec::new();
    let mut body = Vec::new();
    for track in tracks {
        dir.extend_from_slice(&le32(offset));
        let mut chunk = b"HMI-MIDITRACK".to_vec();
        chunk.resize(HMI_TRACK_DATA, 0);
        chunk[0x57..0x5B].copy_from_slice(&le32(HMI_TRACK_DATA));
        chunk.extend_from_slice(track);
        offset += chunk.len();
        body.extend(chunk);
    }
    out.extend(dir);
    out.extend(body);
    out
}

/// HMP song. `division` is in ticks per second; `revised` selects the later
/// header layout.
pub fn hmp(division: u32, tracks: &[Vec<u8>], revised: bool) -> Vec<u8> {
    let (signature, data_offset): (&[u8], usize) = if revised {
        (b"HMIMIDIP013195", 0x388)
    } else {
        (b"HMIMIDIP", 0x308)
    };
    let mut out = signature.to_vec();
    out.resize(data_offset, 0);
    out[0x30..0x34].copy_from_slice(&le32(tracks.len()));
    out[0x38..0x3C].copy_from_slice(&division.to_le_bytes());

    for (number, track) in tracks.iter().enumerate() {
        out.extend_from_slice(&le32(number));
        out.extend_from_slice(&le32(track.len() + 12));
        out.extend_from_slice(&le32(0));
        out.extend_from_slice(track);
    }
    out
}
