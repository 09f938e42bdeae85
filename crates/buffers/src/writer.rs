//! Auto-growing binary buffer writer.

use crate::{mutf8, BufferError};

/// A binary buffer writer that appends big-endian values to a growing buffer.
///
/// # Example
///
/// ```
/// use objstream_buffers::Writer;
///
/// let mut writer = Writer::new();
/// writer.u16(0xaced);
/// writer.i32(-1);
/// assert_eq!(writer.flush(), vec![0xac, 0xed, 0xff, 0xff, 0xff, 0xff]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Writer {
    /// The bytes written so far.
    pub uint8: Vec<u8>,
}

impl Writer {
    /// Creates a new writer with default allocation size.
    pub fn new() -> Self {
        Self::with_alloc_size(1024)
    }

    /// Creates a new writer with a custom initial allocation size.
    pub fn with_alloc_size(alloc_size: usize) -> Self {
        Self {
            uint8: Vec::with_capacity(alloc_size),
        }
    }

    /// Number of bytes written and not yet flushed.
    pub fn len(&self) -> usize {
        self.uint8.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uint8.is_empty()
    }

    /// Returns the bytes written so far without resetting.
    pub fn as_slice(&self) -> &[u8] {
        &self.uint8
    }

    /// Discards everything written so far.
    pub fn reset(&mut self) {
        self.uint8.clear();
    }

    /// Returns the written bytes and resets the writer.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.uint8)
    }

    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.uint8.push(val);
    }

    #[inline]
    pub fn i8(&mut self, val: i8) {
        self.uint8.push(val as u8);
    }

    #[inline]
    pub fn u16(&mut self, val: u16) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn i16(&mut self, val: i16) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn u32(&mut self, val: u32) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn i32(&mut self, val: i32) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn i64(&mut self, val: i64) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn f32(&mut self, val: f32) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn f64(&mut self, val: f64) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    /// Appends raw bytes.
    pub fn buf(&mut self, data: &[u8]) {
        self.uint8.extend_from_slice(data);
    }

    /// Appends the modified UTF-8 encoding of `s` without a length prefix.
    pub fn mutf8(&mut self, s: &str) {
        mutf8::encode_into(s, &mut self.uint8);
    }

    /// Appends `s` as modified UTF-8 prefixed with its u16 encoded length.
    pub fn utf(&mut self, s: &str) -> Result<(), BufferError> {
        let size = mutf8::encoded_len(s);
        if size > u16::MAX as usize {
            return Err(BufferError::TextTooLong(size));
        }
        self.u16(size as u16);
        self.mutf8(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let mut writer = Writer::new();
        writer.u16(0x0102);
        writer.i32(0x03040506);
        writer.i64(-1);
        let data = writer.flush();
        assert_eq!(&data[..6], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&data[6..], &[0xff; 8]);
        assert!(writer.is_empty());
    }

    #[test]
    fn test_utf_prefix() {
        let mut writer = Writer::new();
        writer.utf("ab").unwrap();
        assert_eq!(writer.flush(), vec![0x00, 0x02, b'a', b'b']);
    }

    #[test]
    fn test_utf_too_long() {
        let mut writer = Writer::new();
        let long = "x".repeat(70_000);
        assert!(matches!(
            writer.utf(&long),
            Err(BufferError::TextTooLong(70_000))
        ));
        assert!(writer.is_empty());
    }
}
