//! One-byte lookahead over a byte source.

use crate::{BufferError, ByteSource};

/// Wraps a [`ByteSource`] with a single byte of lookahead and a count of
/// consumed bytes.
pub struct PeekReader<S> {
    src: S,
    peeked: Option<u8>,
    position: u64,
}

impl<S: ByteSource> PeekReader<S> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            peeked: None,
            position: 0,
        }
    }

    /// Bytes consumed so far. A peeked byte is not counted until it is read.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &S {
        &self.src
    }

    pub fn into_inner(self) -> S {
        self.src
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, BufferError> {
        loop {
            match self.src.read(buf) {
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
                Ok(n) => return Ok(n),
            }
        }
    }

    /// Returns the next byte without consuming it, or `None` at end of input.
    pub fn peek(&mut self) -> Result<Option<u8>, BufferError> {
        if self.peeked.is_none() {
            let mut one = [0u8; 1];
            if self.fill(&mut one)? == 1 {
                self.peeked = Some(one[0]);
            }
        }
        Ok(self.peeked)
    }

    /// Reads up to `buf.len()` bytes; returns 0 only at end of input.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, BufferError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = match self.peeked.take() {
            Some(b) => {
                buf[0] = b;
                1
            }
            None => self.fill(buf)?,
        };
        self.position += n as u64;
        Ok(n)
    }

    /// Reads one byte, failing at end of input.
    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        let mut one = [0u8; 1];
        self.read_fully(&mut one)?;
        Ok(one[0])
    }

    /// Fills `buf` completely, failing if input ends first.
    pub fn read_fully(&mut self, buf: &mut [u8]) -> Result<(), BufferError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => return Err(BufferError::EndOfBuffer),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Discards up to `n` bytes, returning how many were skipped.
    pub fn skip(&mut self, n: u64) -> Result<u64, BufferError> {
        let mut scratch = [0u8; 256];
        let mut left = n;
        while left > 0 {
            let chunk = left.min(scratch.len() as u64) as usize;
            match self.read(&mut scratch[..chunk])? {
                0 => break,
                k => left -= k as u64,
            }
        }
        Ok(n - left)
    }

    /// Bytes readable without blocking, including a peeked byte.
    pub fn available(&self) -> usize {
        self.src.available() + usize::from(self.peeked.is_some())
    }
}
