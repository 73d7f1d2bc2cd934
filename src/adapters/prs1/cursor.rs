//! Bounds-checked little-endian reader over an in-memory buffer.
//!
//! Every read either advances the cursor or fails with
//! [`IntegrityError::Truncated`]; nothing panics on short input.

use crate::error::IntegrityError;

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Bytes between `from` and the current position.
    pub fn consumed_since(&self, from: usize) -> &'a [u8] {
        &self.data[from.min(self.position)..self.position]
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], IntegrityError> {
        if count > self.remaining() {
            return Err(IntegrityError::Truncated {
                offset: self.position,
                needed: count,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), IntegrityError> {
        self.read_bytes(count).map(|_| ())
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, IntegrityError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, IntegrityError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, IntegrityError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, IntegrityError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Split off the next `count` bytes as an independent cursor.
    pub fn sub_cursor(&mut self, count: usize) -> Result<ByteCursor<'a>, IntegrityError> {
        Ok(ByteCursor::new(self.read_bytes(count)?))
    }
}
