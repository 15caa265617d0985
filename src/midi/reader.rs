//! Bounds-checked byte reader used by every sequence decoder.
//!
//! Every read returns `None` instead of panicking when it would run past the end
//! of the buffer. Decoders treat `None` as end-of-track.

/// Cursor over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Longest variable-length quantity accepted (28 bits).
    const MAX_VLQ_BYTES: usize = 4;

    /// Creates a reader positioned at `pos`.
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// Current offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    pub fn skip(&mut self, count: usize) -> Option<()> {
        if count > self.remaining() {
            return None;
        }
        self.pos += count;
        Some(())
    }

    /// Takes the next `len` bytes.
    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    pub fn u16_be(&mut self) -> Option<u16> {
        let b = self.bytes(2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32_be(&mut self) -> Option<u32> {
        let b = self.bytes(4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u16_le(&mut self) -> Option<u16> {
        let b = self.bytes(2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Option<u32> {
        let b = self.bytes(4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Standard MIDI variable-length quantity: 7 bits per byte, most significant
    /// group first, high bit set on every byte except the last.
    pub fn vlq(&mut self) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..Self::MAX_VLQ_BYTES {
            let b = self.u8()?;
            value = (value << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }

    /// HMP delta time: 7 bits per byte, least significant group first, high bit
    /// set on the last byte.
    pub fn vlq_reversed(&mut self) -> Option<u32> {
        let mut value = 0u32;
        for i in 0..Self::MAX_VLQ_BYTES {
            let b = self.u8()?;
            value |= ((b & 0x7F) as u32) << (7 * i);
            if b & 0x80 != 0 {
                return Some(value);
            }
        }
        None
    }

    /// XMI interval: the sum of consecutive bytes with the high bit clear.
    /// Zero when the next byte is a status byte.
    pub fn xmi_interval(&mut self) -> Option<u32> {
        let mut value = 0u32;
        loop {
            match self.peek() {
                Some(b) if b & 0x80 == 0 => {
                    value += b as u32;
                    self.pos += 1;
                }
                Some(_) => return Some(value),
                None => return None,
            }
        }
    }

    /// Reads a length-prefixed block (VLQ length) and returns its bytes.
    /// A length pointing past the end of the buffer yields `None`.
    pub fn vlq_block(&mut self) -> Option<&'a [u8]> {
        let len = self.vlq()? as usize;
        self.bytes(len)
    }
}
