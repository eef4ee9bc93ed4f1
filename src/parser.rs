//! Cursor-based reader for response and unsolicited-event payloads.

use crate::codec;

/// A forward-only cursor over a borrowed payload slice.
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn get_byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn get_uint32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        let value = u32::from_ne_bytes(bytes.try_into().unwrap());
        self.pos += 4;
        Some(value)
    }

    pub fn get_int32(&mut self) -> Option<i32> {
        self.get_uint32().map(|v| v as i32)
    }

    /// Parse a nullable length-prefixed wide-character string. Returns
    /// `None` if the buffer is truncated; `Some(None)` for an encoded null
    /// string.
    pub fn get_utf8(&mut self) -> Option<Option<String>> {
        let (value, consumed) = codec::read_utf8_string(self.data, self.pos)?;
        self.pos += consumed;
        Some(value)
    }

    pub fn split_utf8(&mut self, delimiter: &str) -> Option<Option<Vec<String>>> {
        let s = self.get_utf8()?;
        Some(s.map(|s| s.split(delimiter).map(str::to_owned).collect()))
    }

    /// Advance past a string without allocating it.
    pub fn skip_string(&mut self) -> bool {
        match codec::read_utf8_string(self.data, self.pos) {
            Some((_, consumed)) => {
                self.pos += consumed;
                true
            }
            None => false,
        }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}
