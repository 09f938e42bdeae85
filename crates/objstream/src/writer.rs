//! Object stream writer.
//!
//! [`StreamWriter`] emits the structural protocol the decoder reads: records,
//! descriptors, block-data framing and stream control markers. The caller
//! supplies field data in stream order; the writer takes care of tags,
//! handle numbering and framing.
//!
//! ```
//! use objstream::{DescSpec, StreamWriter, TypeCode};
//!
//! let point = DescSpec::serializable("Point")
//!     .field("x", TypeCode::Int)
//!     .field("y", TypeCode::Int);
//! let mut w = StreamWriter::new();
//! let handle = w.begin_object(&point);
//! w.write_i32(1);
//! w.write_i32(2);
//! w.end_object();
//! assert_eq!(handle.get(), 2);
//! let bytes = w.finish();
//! assert_eq!(&bytes[..4], &[0xac, 0xed, 0x00, 0x05]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use objstream_buffers::{mutf8, BufferError, Writer};

use crate::constants::*;
use crate::descriptor::{DescKind, FieldDesc, TypeCode};
use crate::handles::Handle;

/// A descriptor to write.
#[derive(Debug, Clone, PartialEq)]
pub struct DescSpec {
    name: String,
    uid: i64,
    flags: u8,
    kind: DescKind,
    fields: Vec<FieldDesc>,
    super_desc: Option<Arc<DescSpec>>,
}

impl DescSpec {
    fn new(name: impl Into<String>, flags: u8, kind: DescKind) -> Self {
        Self {
            name: name.into(),
            uid: 0,
            flags,
            kind,
            fields: Vec::new(),
            super_desc: None,
        }
    }

    pub fn serializable(name: impl Into<String>) -> Self {
        Self::new(name, SC_SERIALIZABLE, DescKind::Class)
    }

    /// An externalizable type with block-framed data.
    pub fn externalizable(name: impl Into<String>) -> Self {
        Self::new(name, SC_EXTERNALIZABLE | SC_BLOCK_DATA, DescKind::Class)
    }

    /// An enum type, chained to the `java.lang.Enum` descriptor.
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, SC_SERIALIZABLE | SC_ENUM, DescKind::Class)
            .extends(Self::new(ENUM_TYPE, SC_SERIALIZABLE | SC_ENUM, DescKind::Class))
    }

    /// An array type named by its signature, e.g. `[I` or `[LPoint;`.
    pub fn array(signature: impl Into<String>) -> Self {
        Self::serializable(signature)
    }

    pub fn proxy<I, S>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let interfaces: Vec<String> = interfaces.into_iter().map(Into::into).collect();
        let name = format!("$Proxy[{}]", interfaces.join(","));
        Self::new(name, SC_SERIALIZABLE, DescKind::Proxy { interfaces })
    }

    pub fn uid(mut self, uid: i64) -> Self {
        self.uid = uid;
        self
    }

    /// Replaces the flag byte.
    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Marks the type as writing custom data after its fields.
    pub fn write_method(mut self) -> Self {
        self.flags |= SC_WRITE_METHOD;
        self
    }

    pub fn field(mut self, name: impl Into<String>, type_code: TypeCode) -> Self {
        let field = match type_code {
            TypeCode::Object => FieldDesc::object(name, "Ljava/lang/Object;"),
            TypeCode::Array => FieldDesc::object(name, "[Ljava/lang/Object;"),
            code => FieldDesc::primitive(name, code),
        };
        self.fields.push(field);
        self
    }

    pub fn object_field(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.fields.push(FieldDesc::object(name, signature));
        self
    }

    pub fn extends(mut self, super_desc: impl Into<Arc<DescSpec>>) -> Self {
        self.super_desc = Some(super_desc.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }
}

/// Builds an object stream.
///
/// Handles are numbered from 1 in write order, matching the numbering the
/// decoder assigns. Descriptors and field type strings are written once and
/// back-referenced afterwards.
#[derive(Debug)]
pub struct StreamWriter {
    out: Writer,
    block: Vec<u8>,
    block_mode: bool,
    modes: Vec<bool>,
    handles: u32,
    descs: HashMap<String, Handle>,
    type_strings: HashMap<String, Handle>,
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWriter {
    /// Writes the stream header. The stream starts in block mode.
    pub fn new() -> Self {
        let mut out = Writer::new();
        out.u16(STREAM_MAGIC);
        out.u16(STREAM_VERSION);
        Self {
            out,
            block: Vec::with_capacity(MAX_BLOCK_SIZE),
            block_mode: true,
            modes: Vec::new(),
            handles: 0,
            descs: HashMap::new(),
            type_strings: HashMap::new(),
        }
    }

    /// The handle the next record will receive.
    pub fn next_handle(&self) -> Handle {
        Handle::new(self.handles + 1)
    }

    fn assign(&mut self) -> Handle {
        self.handles += 1;
        Handle::new(self.handles)
    }

    fn drain(&mut self) {
        for chunk in self.block.chunks(MAX_BLOCK_SIZE) {
            if chunk.len() <= MAX_SHORT_BLOCK {
                self.out.u8(TC_BLOCKDATA);
                self.out.u8(chunk.len() as u8);
            } else {
                self.out.u8(TC_BLOCKDATALONG);
                self.out.i32(chunk.len() as i32);
            }
            self.out.buf(chunk);
        }
        self.block.clear();
    }

    fn set_block_mode(&mut self, on: bool) {
        if self.block_mode && !on {
            self.drain();
        }
        self.block_mode = on;
    }

    fn begin_record(&mut self) {
        self.modes.push(self.block_mode);
        self.set_block_mode(false);
    }

    fn end_record(&mut self) {
        let mode = self.modes.pop().unwrap_or(true);
        self.set_block_mode(mode);
    }

    fn data(&mut self, mut bytes: &[u8]) {
        if !self.block_mode {
            self.out.buf(bytes);
            return;
        }
        while !bytes.is_empty() {
            let room = MAX_BLOCK_SIZE - self.block.len();
            let (now, rest) = bytes.split_at(room.min(bytes.len()));
            self.block.extend_from_slice(now);
            bytes = rest;
            if self.block.len() == MAX_BLOCK_SIZE {
                self.drain();
            }
        }
    }

    pub fn write_bool(&mut self, v: bool) {
        self.data(&[v as u8]);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.data(&[v as u8]);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data(&[v]);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.data(&v.to_be_bytes());
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data(&v.to_be_bytes());
    }

    /// Writes one UTF-16 code unit.
    pub fn write_char(&mut self, v: u16) {
        self.data(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.data(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.data(&v.to_be_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.data(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data(bytes);
    }

    /// Writes text with a u16 length prefix.
    pub fn write_utf(&mut self, s: &str) -> Result<(), BufferError> {
        let len = mutf8::encoded_len(s);
        if len > u16::MAX as usize {
            return Err(BufferError::TextTooLong(len));
        }
        self.write_u16(len as u16);
        self.data(&mutf8::encode(s));
        Ok(())
    }

    /// Appends bytes verbatim after any pending block data.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.drain();
        self.out.buf(bytes);
    }

    pub fn null(&mut self) {
        self.begin_record();
        self.out.u8(TC_NULL);
        self.end_record();
    }

    pub fn back_ref(&mut self, handle: Handle) {
        self.begin_record();
        self.out.u8(TC_REFERENCE);
        self.out.i32(handle.to_wire());
        self.end_record();
    }

    /// Writes a string record, in long form when it needs more than 65535 bytes.
    pub fn string(&mut self, s: &str) -> Handle {
        self.begin_record();
        self.string_body(s);
        let handle = self.assign();
        self.end_record();
        handle
    }

    fn string_body(&mut self, s: &str) {
        let len = mutf8::encoded_len(s);
        if len <= u16::MAX as usize {
            self.out.u8(TC_STRING);
            self.out.u16(len as u16);
        } else {
            self.out.u8(TC_LONGSTRING);
            self.out.i64(len as i64);
        }
        self.out.mutf8(s);
    }

    fn type_string(&mut self, s: &str) {
        match self.type_strings.get(s) {
            Some(handle) => {
                self.out.u8(TC_REFERENCE);
                self.out.i32(handle.to_wire());
            }
            None => {
                self.string_body(s);
                let handle = self.assign();
                self.type_strings.insert(s.to_owned(), handle);
            }
        }
    }

    /// Writes a descriptor record, or a back-reference if one with the same
    /// name was already written. `None` writes a null.
    pub fn descriptor(&mut self, spec: Option<&DescSpec>) -> Handle {
        self.begin_record();
        let handle = self.desc(spec, false);
        self.end_record();
        handle
    }

    /// Writes a new descriptor record even if the name was written before.
    pub fn fresh_descriptor(&mut self, spec: &DescSpec) -> Handle {
        self.begin_record();
        let handle = self.desc(Some(spec), true);
        self.end_record();
        handle
    }

    fn desc(&mut self, spec: Option<&DescSpec>, fresh: bool) -> Handle {
        let Some(spec) = spec else {
            self.out.u8(TC_NULL);
            return Handle::NULL;
        };
        if !fresh {
            if let Some(&handle) = self.descs.get(&spec.name) {
                self.out.u8(TC_REFERENCE);
                self.out.i32(handle.to_wire());
                return handle;
            }
        }
        let handle = match &spec.kind {
            DescKind::Proxy { interfaces } => {
                self.out.u8(TC_PROXYCLASSDESC);
                let handle = self.assign();
                self.out.i32(interfaces.len() as i32);
                for name in interfaces {
                    self.utf(name);
                }
                handle
            }
            DescKind::Class => {
                self.out.u8(TC_CLASSDESC);
                self.utf(&spec.name);
                self.out.i64(spec.uid);
                self.out.u8(spec.flags);
                self.out.u16(spec.fields.len() as u16);
                let handle = self.assign();
                for field in &spec.fields {
                    self.out.u8(field.type_code().code());
                    self.utf(field.name());
                    if let Some(sig) = field.signature() {
                        self.type_string(sig);
                    }
                }
                handle
            }
        };
        self.descs.insert(spec.name.clone(), handle);
        // no class annotations
        self.out.u8(TC_ENDBLOCKDATA);
        self.desc(spec.super_desc.as_deref(), false);
        handle
    }

    fn utf(&mut self, s: &str) {
        // names longer than 65535 bytes cannot be represented; cut them
        let bytes = mutf8::encode(s);
        let len = bytes.len().min(u16::MAX as usize);
        self.out.u16(len as u16);
        self.out.buf(&bytes[..len]);
    }

    /// Starts an object record. Field data follows in plain mode: the packed
    /// primitive values, then one record per reference field.
    pub fn begin_object(&mut self, desc: &DescSpec) -> Handle {
        self.begin_record();
        self.out.u8(TC_OBJECT);
        self.desc(Some(desc), false);
        self.assign()
    }

    pub fn end_object(&mut self) {
        self.end_record();
    }

    /// Switches to block mode for a layer's custom data or external data.
    pub fn begin_custom_data(&mut self) {
        self.set_block_mode(true);
    }

    /// Flushes custom data and writes the end-of-block marker.
    pub fn end_custom_data(&mut self) {
        self.set_block_mode(false);
        self.out.u8(TC_ENDBLOCKDATA);
    }

    /// Starts an array record; `len` elements follow.
    pub fn begin_array(&mut self, desc: &DescSpec, len: usize) -> Handle {
        self.begin_record();
        self.out.u8(TC_ARRAY);
        self.desc(Some(desc), false);
        let handle = self.assign();
        self.out.i32(len as i32);
        handle
    }

    pub fn end_array(&mut self) {
        self.end_record();
    }

    pub fn int_array(&mut self, values: &[i32]) -> Handle {
        let handle = self.begin_array(&DescSpec::array("[I"), values.len());
        for v in values {
            self.write_i32(*v);
        }
        self.end_array();
        handle
    }

    /// Writes a type literal.
    pub fn class_literal(&mut self, desc: &DescSpec) -> Handle {
        self.begin_record();
        self.out.u8(TC_CLASS);
        self.desc(Some(desc), false);
        let handle = self.assign();
        self.end_record();
        handle
    }

    pub fn enum_constant(&mut self, desc: &DescSpec, constant: &str) -> Handle {
        self.begin_record();
        self.out.u8(TC_ENUM);
        self.desc(Some(desc), false);
        let handle = self.assign();
        self.string(constant);
        self.end_record();
        handle
    }

    fn clear(&mut self) {
        self.handles = 0;
        self.descs.clear();
        self.type_strings.clear();
    }

    /// Writes a reset marker; handle numbering starts over.
    pub fn reset(&mut self) {
        self.begin_record();
        self.out.u8(TC_RESET);
        self.clear();
        self.end_record();
    }

    /// Writes a fatal-exception marker followed by the record `build` writes.
    pub fn fatal_exception(&mut self, build: impl FnOnce(&mut Self)) {
        self.begin_record();
        self.clear();
        self.out.u8(TC_EXCEPTION);
        build(self);
        self.clear();
        self.end_record();
    }

    /// Flushes pending block data and returns the stream bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.drain();
        self.out.flush()
    }
}
