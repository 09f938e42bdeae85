//! Block-data framing.
//!
//! An object stream interleaves two kinds of regions: plain bytes, where
//! record tags and record bodies live, and block data, where primitive
//! payloads written by custom encoders travel in length-prefixed chunks:
//!
//! ```text
//! TC_BLOCKDATA     len:u8   payload[len]
//! TC_BLOCKDATALONG len:i32  payload[len]
//! ```
//!
//! In block mode [`BlockReader`] strips the headers and serves the payload as
//! one contiguous byte run, so a primitive whose bytes straddle two blocks
//! still reads correctly. Any other tag ends the run; reads then report end
//! of data until the mode is toggled again.

use objstream_buffers::{mutf8, ByteSource, PeekReader};
use tracing::trace;

use crate::constants::*;
use crate::error::StreamError;

type Result<T> = std::result::Result<T, StreamError>;

enum Header {
    Block(usize),
    End,
    Blocked,
}

/// Reads plain and block-framed bytes from a [`ByteSource`].
pub struct BlockReader<'a> {
    input: PeekReader<Box<dyn ByteSource + 'a>>,
    block_mode: bool,
    buf: Vec<u8>,
    pos: usize,
    /// End of buffered block bytes; `None` once the block run is over.
    end: Option<usize>,
    /// Bytes of the current block not yet copied into `buf`.
    unread: usize,
    default_data_end: bool,
    depth: usize,
    max_depth: usize,
    pending_reset: bool,
}

impl<'a> BlockReader<'a> {
    pub fn new(source: impl ByteSource + 'a) -> Self {
        Self::with_max_depth(source, usize::MAX)
    }

    pub fn with_max_depth(source: impl ByteSource + 'a, max_depth: usize) -> Self {
        Self {
            input: PeekReader::new(Box::new(source)),
            block_mode: false,
            buf: vec![0; MAX_BLOCK_SIZE],
            pos: 0,
            end: Some(0),
            unread: 0,
            default_data_end: false,
            depth: 0,
            max_depth,
            pending_reset: false,
        }
    }

    /// Bytes consumed from the source, headers included.
    pub fn position(&self) -> u64 {
        self.input.position()
    }

    pub fn block_mode(&self) -> bool {
        self.block_mode
    }

    /// Switches between plain and block mode, returning the previous mode.
    ///
    /// Leaving block mode with buffered block bytes still unread fails.
    pub fn set_block_mode(&mut self, on: bool) -> Result<bool> {
        if self.block_mode == on {
            return Ok(on);
        }
        if on {
            self.pos = 0;
            self.end = Some(0);
            self.unread = 0;
        } else if self.end.is_some_and(|end| self.pos < end) || self.unread > 0 {
            return Err(StreamError::UnreadBlockData);
        }
        self.block_mode = on;
        Ok(!on)
    }

    /// While set, block reads report end of data without looking for a header.
    pub fn set_default_data_end(&mut self, on: bool) {
        self.default_data_end = on;
    }

    pub fn default_data_end(&self) -> bool {
        self.default_data_end
    }

    /// Current record nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn enter(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(StreamError::DepthLimitExceeded(self.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Returns and clears the flag set when a top-level reset marker was
    /// consumed between blocks.
    pub fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.pending_reset)
    }

    /// Handles a reset tag that has already been consumed.
    pub fn handle_reset(&mut self) -> Result<()> {
        if self.depth > 0 {
            return Err(StreamError::ResetInsideObject(self.depth));
        }
        self.pending_reset = true;
        Ok(())
    }

    fn block_header(&mut self, can_block: bool) -> Result<Header> {
        if self.default_data_end {
            return Ok(Header::End);
        }
        loop {
            let avail = if can_block {
                usize::MAX
            } else {
                self.input.available()
            };
            if avail == 0 {
                return Ok(Header::Blocked);
            }
            let Some(tag) = self.input.peek()? else {
                return Ok(Header::End);
            };
            match tag {
                TC_BLOCKDATA => {
                    if avail < 2 {
                        return Ok(Header::Blocked);
                    }
                    let mut header = [0u8; 2];
                    self.input.read_fully(&mut header)?;
                    return Ok(Header::Block(header[1] as usize));
                }
                TC_BLOCKDATALONG => {
                    if avail < 5 {
                        return Ok(Header::Blocked);
                    }
                    let mut header = [0u8; 5];
                    self.input.read_fully(&mut header)?;
                    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
                    if len < 0 {
                        return Err(StreamError::InvalidBlockHeader(len));
                    }
                    return Ok(Header::Block(len as usize));
                }
                TC_RESET => {
                    self.input.read_u8()?;
                    self.handle_reset()?;
                }
                tag if !is_tag(tag) => return Err(StreamError::InvalidTag { tag }),
                _ => return Ok(Header::End),
            }
        }
    }

    fn refill(&mut self) -> Result<()> {
        loop {
            self.pos = 0;
            if self.unread > 0 {
                let want = self.unread.min(MAX_BLOCK_SIZE);
                let n = self.input.read(&mut self.buf[..want])?;
                if n == 0 {
                    return Err(StreamError::TruncatedBlock);
                }
                self.end = Some(n);
                self.unread -= n;
            } else {
                match self.block_header(true)? {
                    Header::Block(len) => {
                        trace!(len, "block data header");
                        self.end = Some(0);
                        self.unread = len;
                    }
                    Header::End | Header::Blocked => {
                        self.end = None;
                        self.unread = 0;
                    }
                }
            }
            if self.end != Some(self.pos) {
                return Ok(());
            }
        }
    }

    /// Remaining bytes in the current block, or 0 once the run is over.
    pub fn current_block_remaining(&self) -> Result<usize> {
        if !self.block_mode {
            return Err(StreamError::NotActive("block data mode"));
        }
        Ok(match self.end {
            Some(end) => end - self.pos + self.unread,
            None => 0,
        })
    }

    /// Bytes readable without blocking.
    pub fn available(&mut self) -> Result<usize> {
        if !self.block_mode {
            return Ok(self.input.available());
        }
        if self.end == Some(self.pos) && self.unread == 0 {
            loop {
                match self.block_header(false)? {
                    Header::Block(0) => continue,
                    Header::Block(len) => {
                        self.pos = 0;
                        self.end = Some(0);
                        self.unread = len;
                    }
                    Header::End => {
                        self.pos = 0;
                        self.end = None;
                    }
                    Header::Blocked => {}
                }
                break;
            }
        }
        let unread = if self.unread > 0 {
            self.input.available().min(self.unread)
        } else {
            0
        };
        Ok(match self.end {
            Some(end) => end - self.pos + unread,
            None => 0,
        })
    }

    /// Looks at the next byte without consuming it.
    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.block_mode {
            if self.end == Some(self.pos) {
                self.refill()?;
            }
            Ok(self.end.map(|_| self.buf[self.pos]))
        } else {
            Ok(self.input.peek()?)
        }
    }

    /// `true` when no block bytes remain and the source is exhausted.
    pub fn is_at_end(&mut self) -> Result<bool> {
        if self.block_mode && self.peek()?.is_some() {
            return Ok(false);
        }
        Ok(self.input.peek()?.is_none())
    }

    /// Like [`peek`](Self::peek) but fails at end of input.
    pub fn peek_byte(&mut self) -> Result<u8> {
        self.peek()?.ok_or(StreamError::UnexpectedEof)
    }

    /// Reads up to `out.len()` bytes; 0 means end of data.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.block_mode {
            return Ok(self.input.read(out)?);
        }
        if self.end == Some(self.pos) {
            self.refill()?;
        }
        let Some(end) = self.end else {
            return Ok(0);
        };
        let n = out.len().min(end - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    pub fn read_fully(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            match self.read(&mut out[filled..])? {
                0 => return Err(StreamError::UnexpectedEof),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Discards up to `n` bytes, returning how many were skipped.
    pub fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        let mut scratch = [0u8; 256];
        let mut left = n;
        while left > 0 {
            let chunk = left.min(scratch.len());
            match self.read(&mut scratch[..chunk])? {
                0 => break,
                k => left -= k,
            }
        }
        Ok(n - left)
    }

    /// Discards block data up to the end of the current block run.
    pub fn skip_block_data(&mut self) -> Result<()> {
        if !self.block_mode {
            return Err(StreamError::NotActive("block data mode"));
        }
        while self.end.is_some() {
            self.refill()?;
        }
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        self.read_fully(&mut out)?;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Reads text with a u16 byte-length prefix.
    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u16()? as u64;
        self.read_utf_body(len)
    }

    /// Reads text with an i64 byte-length prefix.
    pub fn read_long_utf(&mut self) -> Result<String> {
        let len = self.read_i64()?;
        let len = u64::try_from(len).map_err(|_| StreamError::MalformedText(0))?;
        self.read_utf_body(len)
    }

    fn read_utf_body(&mut self, len: u64) -> Result<String> {
        // Grow with the data actually present, not the declared length.
        let mut bytes = Vec::with_capacity(len.min(8192) as usize);
        let mut chunk = [0u8; 1024];
        let mut left = len;
        while left > 0 {
            let n = left.min(chunk.len() as u64) as usize;
            self.read_fully(&mut chunk[..n])?;
            bytes.extend_from_slice(&chunk[..n]);
            left -= n as u64;
        }
        Ok(mutf8::decode(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(data: &[u8]) -> Vec<u8> {
        let mut out = vec![TC_BLOCKDATA, data.len() as u8];
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_plain_mode_reads_raw_bytes() {
        let data = [0x00, 0x2a, 0x01];
        let mut bin = BlockReader::new(&data[..]);
        assert_eq!(bin.read_i16().unwrap(), 42);
        assert!(bin.read_bool().unwrap());
    }

    #[test]
    fn test_primitive_straddles_blocks() {
        let mut data = block(&[0x00, 0x00]);
        data.extend(block(&[0x01, 0x02]));
        data.push(TC_ENDBLOCKDATA);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.read_i32().unwrap(), 0x0102);
        assert_eq!(bin.peek().unwrap(), None);
        assert!(matches!(bin.read_u8(), Err(StreamError::UnexpectedEof)));
        bin.set_block_mode(false).unwrap();
        assert_eq!(bin.read_u8().unwrap(), TC_ENDBLOCKDATA);
    }

    #[test]
    fn test_long_block_header() {
        let mut data = vec![TC_BLOCKDATALONG, 0, 0, 0, 3, 1, 2, 3];
        data.push(TC_NULL);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.current_block_remaining().unwrap(), 0);
        assert_eq!(bin.read_u8().unwrap(), 1);
        assert_eq!(bin.current_block_remaining().unwrap(), 2);
        let mut rest = [0u8; 8];
        assert_eq!(bin.read(&mut rest).unwrap(), 2);
        assert_eq!(bin.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_negative_long_header_is_fatal() {
        let data = [TC_BLOCKDATALONG, 0xff, 0xff, 0xff, 0xff];
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert!(matches!(
            bin.read_u8(),
            Err(StreamError::InvalidBlockHeader(-1))
        ));
    }

    #[test]
    fn test_truncated_block_is_fatal() {
        let data = [TC_BLOCKDATA, 4, 1, 2];
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert!(matches!(bin.read_i32(), Err(StreamError::TruncatedBlock)));
    }

    #[test]
    fn test_leaving_block_mode_with_unread_bytes_fails() {
        let data = block(&[1, 2, 3]);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        bin.read_u8().unwrap();
        assert!(matches!(
            bin.set_block_mode(false),
            Err(StreamError::UnreadBlockData)
        ));
    }

    #[test]
    fn test_skip_block_data_stops_at_tag() {
        let mut data = block(&[1, 2, 3]);
        data.extend(block(&[4]));
        data.push(TC_ENDBLOCKDATA);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        bin.read_u8().unwrap();
        bin.skip_block_data().unwrap();
        bin.set_block_mode(false).unwrap();
        assert_eq!(bin.peek_byte().unwrap(), TC_ENDBLOCKDATA);
    }

    #[test]
    fn test_reset_between_blocks() {
        let mut data = block(&[1]);
        data.push(TC_RESET);
        data.extend(block(&[2]));
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.read_u8().unwrap(), 1);
        assert!(!bin.take_reset());
        assert_eq!(bin.read_u8().unwrap(), 2);
        assert!(bin.take_reset());
        assert!(!bin.take_reset());
    }

    #[test]
    fn test_reset_inside_object_is_fatal() {
        let data = [TC_RESET, TC_BLOCKDATA, 1, 9];
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        bin.enter().unwrap();
        assert!(matches!(
            bin.read_u8(),
            Err(StreamError::ResetInsideObject(1))
        ));
    }

    #[test]
    fn test_invalid_tag_in_block_position() {
        let data = [0x05, 0x00];
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert!(matches!(
            bin.read_u8(),
            Err(StreamError::InvalidTag { tag: 0x05 })
        ));
    }

    #[test]
    fn test_default_data_end_hides_blocks() {
        let data = block(&[1]);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_default_data_end(true);
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.peek().unwrap(), None);
        bin.set_default_data_end(false);
        bin.set_block_mode(false).unwrap();
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_depth_limit() {
        let mut bin = BlockReader::with_max_depth(&[0u8; 0][..], 2);
        bin.enter().unwrap();
        bin.enter().unwrap();
        assert!(matches!(
            bin.enter(),
            Err(StreamError::DepthLimitExceeded(2))
        ));
        bin.leave();
        assert_eq!(bin.depth(), 1);
    }

    #[test]
    fn test_available_in_block_mode() {
        let mut data = block(&[1, 2, 3]);
        data.push(TC_ENDBLOCKDATA);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.available().unwrap(), 3);
        bin.skip_bytes(3).unwrap();
        assert_eq!(bin.available().unwrap(), 0);
    }

    #[test]
    fn test_at_end() {
        let mut data = block(&[7]);
        data.push(TC_NULL);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert!(!bin.is_at_end().unwrap());
        bin.read_u8().unwrap();
        assert!(!bin.is_at_end().unwrap());
        bin.set_block_mode(false).unwrap();
        bin.read_u8().unwrap();
        assert!(bin.is_at_end().unwrap());
    }

    #[test]
    fn test_utf_in_blocks() {
        let mut payload = vec![0, 5];
        payload.extend_from_slice(b"hello");
        let data = block(&payload);
        let mut bin = BlockReader::new(&data[..]);
        bin.set_block_mode(true).unwrap();
        assert_eq!(bin.read_utf().unwrap(), "hello");
    }
}
