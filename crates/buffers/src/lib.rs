//! Byte-level plumbing for objstream.
//!
//! This crate knows nothing about object-stream tags. It provides the byte
//! sources the block framer reads from, cursors for parsing and building
//! buffers, and the modified UTF-8 codec used by stream strings.
//!
//! # Overview
//!
//! - [`Reader`] - Reads big-endian values from a byte slice with cursor tracking
//! - [`Writer`] - Writes big-endian values to an auto-growing buffer
//! - [`StreamingReader`] - Buffers pushed chunks until they are consumed
//! - [`ByteSource`] - Sequential byte source with `read` and `available`
//! - [`PeekReader`] - One-byte lookahead over a [`ByteSource`]
//! - [`mutf8`] - Modified UTF-8 encoding and decoding
//!
//! # Example
//!
//! ```
//! use objstream_buffers::{Reader, Writer};
//!
//! let mut writer = Writer::new();
//! writer.u8(0x01);
//! writer.u16(0x0203);
//! writer.utf("hello").unwrap();
//! let data = writer.flush();
//!
//! let mut reader = Reader::new(&data);
//! assert_eq!(reader.u8().unwrap(), 0x01);
//! assert_eq!(reader.u16().unwrap(), 0x0203);
//! assert_eq!(reader.utf().unwrap(), "hello");
//! ```

pub mod mutf8;
mod peek;
mod reader;
mod source;
mod streaming_reader;
mod writer;

pub use peek::PeekReader;
pub use reader::Reader;
pub use source::{ByteSource, IoSource};
pub use streaming_reader::StreamingReader;
pub use writer::Writer;

use thiserror::Error;

/// Error type for buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Attempted to read past the end of the input.
    #[error("unexpected end of input")]
    EndOfBuffer,
    /// Malformed modified UTF-8 at the given byte offset.
    #[error("malformed modified UTF-8 at byte {0}")]
    InvalidUtf(usize),
    /// Text too long for the length prefix it must be written with.
    #[error("encoded text length {0} exceeds the 65535 byte limit")]
    TextTooLong(usize),
    /// The underlying byte source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
