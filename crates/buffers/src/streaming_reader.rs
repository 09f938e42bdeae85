//! Streaming reader with internal buffer management.

use crate::{BufferError, Reader};

/// A streaming reader that internally manages a growing buffer.
///
/// Data chunks are pushed into the reader as they arrive (for example from a
/// socket) and consumed incrementally. Consumed bytes are compacted away once
/// they make up a large enough share of the buffer.
pub struct StreamingReader {
    buffer: Vec<u8>,
    /// Offset of the first unconsumed byte.
    x0: usize,
    /// Cursor offset relative to `x0`.
    dx: usize,
}

impl Default for StreamingReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingReader {
    /// Creates a new streaming reader with default allocation size.
    pub fn new() -> Self {
        Self::with_alloc_size(16 * 1024)
    }

    /// Creates a new streaming reader with custom allocation size.
    pub fn with_alloc_size(alloc_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(alloc_size),
            x0: 0,
            dx: 0,
        }
    }

    /// Returns the number of bytes remaining to be read.
    pub fn size(&self) -> usize {
        self.buffer.len() - self.x()
    }

    fn assert_size(&self, size: usize) -> Result<(), BufferError> {
        if size > self.size() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(())
    }

    /// Adds a chunk of data to be read.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Marks the current position as consumed, freeing memory for reuse.
    pub fn consume(&mut self) {
        self.x0 += self.dx;
        self.dx = 0;
        self.compact();
    }

    fn compact(&mut self) {
        if self.x0 == 0 {
            return;
        }
        if self.x0 == self.buffer.len() {
            self.buffer.clear();
            self.x0 = 0;
            return;
        }
        if self.x0 >= 8192 || self.x0 * 2 >= self.buffer.len() {
            self.buffer.drain(..self.x0);
            self.x0 = 0;
        }
    }

    /// Returns the current cursor position.
    pub fn x(&self) -> usize {
        self.x0 + self.dx
    }

    /// Moves the cursor back or forward within the unconsumed region.
    pub fn set_x(&mut self, x: usize) -> Result<(), BufferError> {
        if x < self.x0 || x > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.dx = x - self.x0;
        Ok(())
    }

    /// Peeks at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.buffer.get(self.x()).copied()
    }

    /// Skips the given number of bytes.
    pub fn skip(&mut self, length: usize) -> Result<(), BufferError> {
        self.assert_size(length)?;
        self.dx += length;
        Ok(())
    }

    /// Reads bytes into a new vector.
    pub fn buf(&mut self, size: usize) -> Result<Vec<u8>, BufferError> {
        self.assert_size(size)?;
        let x = self.x();
        let result = self.buffer[x..x + size].to_vec();
        self.dx += size;
        Ok(result)
    }

    /// Returns up to `end` bytes after the cursor without advancing.
    pub fn subarray(&self, start: usize, end: usize) -> &[u8] {
        let x = self.x();
        let stop = (x + end).min(self.buffer.len());
        let begin = (x + start).min(stop);
        &self.buffer[begin..stop]
    }

    /// Creates a [`Reader`] over the unread bytes.
    pub fn slice(&self) -> Reader<'_> {
        Reader::from_slice(&self.buffer, self.x(), self.buffer.len())
    }

    /// Reads an unsigned 8-bit integer.
    pub fn u8(&mut self) -> Result<u8, BufferError> {
        let val = self.peek().ok_or(BufferError::EndOfBuffer)?;
        self.dx += 1;
        Ok(val)
    }

    /// Reads a signed 32-bit integer (big-endian).
    pub fn i32(&mut self) -> Result<i32, BufferError> {
        let mut reader = self.slice();
        let val = reader.i32()?;
        self.dx += 4;
        Ok(val)
    }

    /// Resets the reader with new data.
    pub fn reset(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.x0 = 0;
        self.dx = 0;
        self.push(data);
    }
}
