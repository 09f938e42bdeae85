//! Error types.
//!
//! Decoding distinguishes two tiers of failure:
//!
//! - [`StreamError`]: the stream itself is unusable (bad header, unknown tag,
//!   broken framing, protocol violations). The read is aborted and partially
//!   built state is discarded.
//! - [`Fault`]: one record could not be materialized (its type is unknown
//!   locally, an enum constant is missing, a type cannot be constructed).
//!   Faults are attached to handles and spread only to records that depend
//!   on the faulted one; unrelated records still decode.
//!
//! [`DecodeError`] carries either tier out of a decode call.

use std::io;
use std::sync::Arc;

use objstream_buffers::BufferError;
use thiserror::Error;

/// A per-record failure attached to a handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Fault {
    #[error("type not found: {0}")]
    TypeNotFound(String),
    #[error("invalid type {name}: {reason}")]
    InvalidType { name: String, reason: String },
    #[error("enum constant {constant} does not exist in {name}")]
    UnknownEnumConstant { name: String, constant: String },
    #[error("type {0} has no zero-argument constructor")]
    NoConstructor(String),
}

impl Fault {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Fault::InvalidType {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A failure that terminates the whole read.
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid stream header: {0:04X}{1:04X}")]
    BadHeader(u16, u16),
    #[error("invalid type code: {tag:02X}")]
    InvalidTag { tag: u8 },
    #[error("unexpected block data")]
    UnexpectedBlockData,
    #[error("unexpected end of block data")]
    UnexpectedEndOfBlockData,
    #[error("illegal block data header length: {0}")]
    InvalidBlockHeader(i32),
    #[error("unexpected end of input in the middle of a data block")]
    TruncatedBlock,
    #[error("invalid handle value: {0:08X}")]
    InvalidHandle(i32),
    #[error("cannot read back references as unshared")]
    BackReferenceAsUnshared,
    #[error("cannot read back reference to unshared object")]
    UnsharedBackReference,
    #[error("reference in descriptor position does not point to a type descriptor")]
    NotADescriptor,
    #[error("unexpected reset; recursion depth: {0}")]
    ResetInsideObject(usize),
    #[error("unread block data")]
    UnreadBlockData,
    #[error("custom decode of {0} left unconsumed data")]
    UnconsumedCustomData(String),
    #[error("optional data: {length} bytes of block data (eof: {eof})")]
    OptionalData { eof: bool, length: usize },
    #[error("malformed string data at byte {0}")]
    MalformedText(usize),
    #[error("string encoding too long: {0} bytes")]
    TextTooLong(usize),
    #[error("invalid field type code {code:?} for field {field}")]
    InvalidTypeCode { field: String, code: char },
    #[error("invalid descriptor for {0}: {1}")]
    InvalidDescriptor(String, String),
    #[error("{0} is not valid as an ordinary object")]
    IllegalObjectType(String),
    #[error("{0} is not an enum type")]
    NotAnEnum(String),
    #[error("negative array length: {0}")]
    NegativeArrayLength(i32),
    #[error("external data of unresolved type {0} cannot be skipped")]
    UnskippableExternalData(String),
    #[error("nesting depth exceeds limit {0}")]
    DepthLimitExceeded(usize),
    #[error("filter rejected {0}")]
    FilterRejected(String),
    #[error("invalid type filter pattern {pattern}: {reason}")]
    InvalidFilter { pattern: String, reason: String },
    #[error("writing aborted; {type_name} recorded by the writer")]
    WriteAborted {
        type_name: String,
        message: Option<String>,
    },
    #[error("not active: {0}")]
    NotActive(&'static str),
    #[error("invalid object: {0}")]
    InvalidObject(String),
    #[error("stream closed")]
    Closed,
}

impl From<BufferError> for StreamError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::EndOfBuffer => StreamError::UnexpectedEof,
            BufferError::InvalidUtf(at) => StreamError::MalformedText(at),
            BufferError::TextTooLong(n) => StreamError::TextTooLong(n),
            BufferError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                StreamError::UnexpectedEof
            }
            BufferError::Io(e) => StreamError::Io(Arc::new(e)),
        }
    }
}

/// Error returned by decode calls.
#[derive(Debug, Error, Clone)]
pub enum DecodeError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Unresolved(Arc<Fault>),
}

impl DecodeError {
    /// `true` when the stream can no longer be read.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Stream(_))
    }

    /// The captured per-record fault, if this is one.
    pub fn fault(&self) -> Option<&Arc<Fault>> {
        match self {
            DecodeError::Unresolved(fault) => Some(fault),
            DecodeError::Stream(_) => None,
        }
    }

    /// Shorthand for hooks rejecting decoded data.
    pub fn invalid_object(message: impl Into<String>) -> Self {
        DecodeError::Stream(StreamError::InvalidObject(message.into()))
    }
}

impl From<BufferError> for DecodeError {
    fn from(err: BufferError) -> Self {
        DecodeError::Stream(err.into())
    }
}

impl From<Arc<Fault>> for DecodeError {
    fn from(fault: Arc<Fault>) -> Self {
        DecodeError::Unresolved(fault)
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
