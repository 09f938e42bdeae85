//! Object-graph stream decoding.
//!
//! Reads the binary object-stream protocol: a header, then a sequence of
//! tagged records (objects, arrays, strings, enum constants, type
//! descriptors, back-references) interleaved with block-framed primitive
//! data. Decoded records land in a [`Heap`]; shared and cyclic references
//! come back as the same [`ObjRef`].
//!
//! The pieces, bottom up:
//!
//! - [`BlockReader`] - plain and block-framed byte access
//! - [`ClassDesc`] - type descriptors resolved against a [`TypeRegistry`]
//! - [`HandleTable`] - handle assignment and fault propagation
//! - [`ObjectDecoder`] - the record state machine
//! - [`StreamWriter`] - produces streams in the same format
//!
//! A record whose type cannot be materialized does not stop the stream: its
//! handle carries a [`Fault`], which spreads to every record that depends on
//! it, while unrelated records still decode.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use objstream::{DescSpec, LocalClass, ObjectDecoder, StreamWriter, TypeCode, TypeRegistry};
//!
//! let mut w = StreamWriter::new();
//! w.begin_object(&DescSpec::serializable("Point").field("x", TypeCode::Int).field("y", TypeCode::Int));
//! w.write_i32(3);
//! w.write_i32(4);
//! w.end_object();
//! let bytes = w.finish();
//!
//! let registry = Arc::new(TypeRegistry::new().with(
//!     LocalClass::serializable("Point")
//!         .field("x", TypeCode::Int)
//!         .field("y", TypeCode::Int),
//! ));
//! let mut decoder = ObjectDecoder::new(&bytes[..], registry).unwrap();
//! let point = decoder.read_object().unwrap();
//! let record = decoder.heap().object(point).unwrap();
//! assert_eq!(record.get("y").and_then(|v| v.as_i32()), Some(4));
//! ```

pub mod constants;

mod block;
mod decoder;
mod descriptor;
mod error;
mod handles;
mod options;
mod registry;
mod value;
mod writer;

pub use block::BlockReader;
pub use decoder::{Binding, GetFields, ObjectDecoder, ObjectInput, ResolveObject, Validation};
pub use descriptor::{match_fields, ClassDesc, DescKind, FieldDesc, FieldLayout, FieldOffset, TypeCode};
pub use error::{DecodeError, Fault, Result, StreamError};
pub use handles::{Handle, HandleStatus, HandleTable};
pub use options::{DecoderOptions, TypeFilter, DEFAULT_MAX_DEPTH};
pub use registry::{
    ClassKind, InstanceLayout, LocalClass, NoDataHook, ReadObjectHook, ReadResolveHook, TypeRegistry,
};
pub use value::{ArrayData, ArrayRecord, EnumRecord, Heap, ObjRef, ObjectRecord, Record, Value};
pub use writer::{DescSpec, StreamWriter};
