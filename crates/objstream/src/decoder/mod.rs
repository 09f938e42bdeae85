//! Graph decoder.
//!
//! [`ObjectDecoder`] reads records from an object stream and materializes
//! them into a [`Heap`]. Every record gets a handle in read order so later
//! back-references resolve to the same value. A record whose type cannot be
//! materialized is still consumed from the stream; its handle carries the
//! fault and so does every record that refers to it.
//!
//! ```
//! use std::sync::Arc;
//! use objstream::{ObjectDecoder, TypeRegistry};
//!
//! // header, then the string "hi"
//! let bytes = [0xac, 0xed, 0x00, 0x05, 0x74, 0x00, 0x02, b'h', b'i'];
//! let mut decoder = ObjectDecoder::new(&bytes[..], Arc::new(TypeRegistry::new())).unwrap();
//! let value = decoder.read_object().unwrap();
//! assert_eq!(decoder.heap().str(value), Some("hi"));
//! ```

mod input;
mod validation;

use std::collections::HashMap;
use std::result::Result as StdResult;
use std::sync::Arc;

use objstream_buffers::{ByteSource, Reader};
use tracing::{debug, trace};

pub use input::{GetFields, ObjectInput};
pub use validation::Validation;

use crate::block::BlockReader;
use crate::constants::*;
use crate::descriptor::{data_slots, ClassDesc, DescKind, FieldDesc, FieldOffset, RawDesc, TypeCode};
use crate::error::{DecodeError, Fault, Result, StreamError};
use crate::handles::{Handle, HandleTable};
use crate::options::{DecoderOptions, TypeFilter};
use crate::registry::{ClassKind, LocalClass, ReadObjectHook, TypeRegistry};
use crate::value::{ArrayData, ArrayRecord, EnumRecord, Heap, ObjRef, ObjectRecord, Record, Value};

use validation::ValidationList;

/// What a handle stands for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    Shared(Value),
    /// Read with `read_unshared`; back-references to it are rejected.
    Unshared,
}

/// Replacement applied to every string, array, enum and object record.
pub type ResolveObject<'a> = Box<dyn FnMut(&mut Heap, Value) -> Result<Value> + 'a>;

#[derive(Debug, Clone, Copy)]
struct Decoded {
    value: Value,
    handle: Handle,
}

impl Decoded {
    const NULL: Decoded = Decoded {
        value: Value::Null,
        handle: Handle::NULL,
    };
}

struct DescRead {
    desc: Arc<ClassDesc>,
    handle: Handle,
    record: ObjRef,
}

/// Slots of one type layer inside an object record.
#[derive(Debug, Clone, Copy)]
struct Target {
    obj: ObjRef,
    offset: usize,
}

/// State of the `read_object` hook currently running.
struct HookContext {
    target: Target,
    desc: Arc<ClassDesc>,
    used: bool,
}

/// Decodes object graphs from a byte stream.
pub struct ObjectDecoder<'a> {
    bin: BlockReader<'a>,
    registry: Arc<TypeRegistry>,
    options: DecoderOptions,
    filter: TypeFilter,
    handles: HandleTable<Binding>,
    heap: Heap,
    /// Handle of the record whose data is being decoded.
    active: Handle,
    context: Option<HookContext>,
    validations: ValidationList,
    enums: HashMap<(String, String), ObjRef>,
    resolve_object: Option<ResolveObject<'a>>,
    last_handle: Handle,
    closed: bool,
}

impl<'a> ObjectDecoder<'a> {
    /// Reads and checks the stream header.
    pub fn new(source: impl ByteSource + 'a, registry: Arc<TypeRegistry>) -> StdResult<Self, StreamError> {
        Self::with_options(source, registry, DecoderOptions::default())
    }

    pub fn with_options(
        source: impl ByteSource + 'a,
        registry: Arc<TypeRegistry>,
        options: DecoderOptions,
    ) -> StdResult<Self, StreamError> {
        let filter = options.type_filter()?;
        let mut bin = BlockReader::with_max_depth(source, options.max_depth);
        let magic = bin.read_u16()?;
        let version = bin.read_u16()?;
        if magic != STREAM_MAGIC || version != STREAM_VERSION {
            return Err(StreamError::BadHeader(magic, version));
        }
        bin.set_block_mode(true)?;
        Ok(Self {
            bin,
            registry,
            options,
            filter,
            handles: HandleTable::new(),
            heap: Heap::new(),
            active: Handle::NULL,
            context: None,
            validations: ValidationList::default(),
            enums: HashMap::new(),
            resolve_object: None,
            last_handle: Handle::NULL,
            closed: false,
        })
    }

    /// Decodes the next top-level record.
    ///
    /// A record that faulted, or depends on one that did, comes back as
    /// [`DecodeError::Unresolved`]; the stream stays usable. Any other error
    /// leaves the stream unusable and clears the handle table.
    pub fn read_object(&mut self) -> Result<Value> {
        self.read_top(false)
    }

    /// Like [`read_object`](Self::read_object), but the record cannot be
    /// back-referenced afterwards.
    pub fn read_unshared(&mut self) -> Result<Value> {
        self.read_top(true)
    }

    /// Decodes every remaining top-level record. Faulted records are kept in
    /// place; the first fatal error ends the read.
    pub fn read_all(&mut self) -> StdResult<Vec<StdResult<Value, Arc<Fault>>>, StreamError> {
        let mut out = Vec::new();
        loop {
            if self.closed {
                return Err(StreamError::Closed);
            }
            if self.bin.is_at_end()? {
                return Ok(out);
            }
            match self.read_top(false) {
                Ok(value) => out.push(Ok(value)),
                Err(DecodeError::Unresolved(fault)) => out.push(Err(fault)),
                Err(DecodeError::Stream(err)) => return Err(err),
            }
        }
    }

    /// Installs a replacement hook applied to each decoded record.
    pub fn set_resolve_object<F>(&mut self, resolve: F)
    where
        F: FnMut(&mut Heap, Value) -> Result<Value> + 'a,
    {
        self.resolve_object = Some(Box::new(resolve));
    }

    pub fn clear_resolve_object(&mut self) {
        self.resolve_object = None;
    }

    /// Releases the source and all session state.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.clear();
        self.bin = BlockReader::new(&[0u8; 0][..]);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records of the current generation. A stream reset releases every
    /// record decoded before it, so values read earlier stop resolving once
    /// a read crosses the reset.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn into_heap(self) -> Heap {
        self.heap
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    pub fn handles(&self) -> &HandleTable<Binding> {
        &self.handles
    }

    /// Handle of the most recent top-level record.
    pub fn last_handle(&self) -> Handle {
        self.last_handle
    }

    /// Value bound to `handle`, unless it is faulted or unshared.
    pub fn lookup(&self, handle: Handle) -> Option<Value> {
        match self.handles.lookup(handle) {
            Some(Binding::Shared(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn lookup_fault(&self, handle: Handle) -> Option<&Arc<Fault>> {
        self.handles.lookup_fault(handle)
    }

    /// Bytes consumed from the source.
    pub fn position(&self) -> u64 {
        self.bin.position()
    }

    fn clear(&mut self) {
        debug!(
            handles = self.handles.len(),
            validations = self.validations.len(),
            "clearing handle table"
        );
        self.handles.reset();
        self.validations.clear();
    }

    /// Applies a reset the framer consumed between blocks.
    fn sync_reset(&mut self) {
        if self.bin.take_reset() {
            debug!(records = self.heap.len(), "stream reset");
            self.clear();
            self.enums.clear();
            self.heap.release();
        }
    }

    fn read_top(&mut self, unshared: bool) -> Result<Value> {
        if self.closed {
            return Err(StreamError::Closed.into());
        }
        let top = self.bin.depth() == 0;
        if top {
            self.sync_reset();
        }
        let outer = self.active;
        let result = self.read_object0(unshared).and_then(|decoded| {
            self.handles.mark_dependency(outer, decoded.handle);
            if top {
                self.last_handle = decoded.handle;
            }
            match self.handles.lookup_fault(decoded.handle) {
                Some(fault) => Err(DecodeError::Unresolved(fault.clone())),
                None => Ok(decoded.value),
            }
        });
        if !top {
            return result;
        }
        match result {
            Ok(value) => {
                self.validations.run(&mut self.heap)?;
                Ok(value)
            }
            Err(err) => {
                self.validations.clear();
                match &err {
                    DecodeError::Stream(StreamError::OptionalData { .. }) => {}
                    DecodeError::Stream(e) => {
                        debug!(error = %e, "fatal stream error");
                        self.handles.reset();
                    }
                    DecodeError::Unresolved(_) => {}
                }
                Err(err)
            }
        }
    }

    fn read_object0(&mut self, unshared: bool) -> Result<Decoded> {
        let old_mode = self.bin.block_mode();
        if old_mode {
            let remain = self.bin.current_block_remaining()?;
            if remain > 0 {
                return Err(StreamError::OptionalData {
                    eof: false,
                    length: remain,
                }
                .into());
            }
            if self.bin.default_data_end() {
                return Err(StreamError::OptionalData { eof: true, length: 0 }.into());
            }
            self.bin.set_block_mode(false)?;
        }
        let mut tag = self.bin.peek_byte()?;
        while tag == TC_RESET {
            self.bin.read_u8()?;
            self.bin.handle_reset()?;
            self.sync_reset();
            tag = self.bin.peek_byte()?;
        }
        self.options.check_stream_bytes(self.bin.position())?;
        let result = match self.bin.enter() {
            Ok(()) => {
                let r = self.read_record(tag, unshared, old_mode);
                self.bin.leave();
                r
            }
            Err(e) => Err(e.into()),
        };
        let restored = self.bin.set_block_mode(old_mode);
        let decoded = result?;
        restored?;
        Ok(decoded)
    }

    fn read_record(&mut self, tag: u8, unshared: bool, block_mode: bool) -> Result<Decoded> {
        match tag {
            TC_NULL => {
                self.bin.read_u8()?;
                Ok(Decoded::NULL)
            }
            TC_REFERENCE => self.read_handle(unshared),
            TC_CLASS => self.read_class(unshared),
            TC_CLASSDESC | TC_PROXYCLASSDESC => {
                let read = self.read_class_desc(unshared)?.ok_or(StreamError::NotADescriptor)?;
                Ok(Decoded {
                    value: Value::Ref(read.record),
                    handle: read.handle,
                })
            }
            TC_STRING | TC_LONGSTRING => {
                let decoded = self.read_string(unshared)?;
                self.check_resolve(decoded, unshared)
            }
            TC_ARRAY => {
                let decoded = self.read_array(unshared)?;
                self.check_resolve(decoded, unshared)
            }
            TC_ENUM => {
                let decoded = self.read_enum(unshared)?;
                self.check_resolve(decoded, unshared)
            }
            TC_OBJECT => {
                let decoded = self.read_ordinary_object(unshared)?;
                self.check_resolve(decoded, unshared)
            }
            TC_EXCEPTION => Err(self.read_fatal_exception()?.into()),
            TC_BLOCKDATA | TC_BLOCKDATALONG => {
                if !block_mode {
                    return Err(StreamError::UnexpectedBlockData.into());
                }
                self.bin.set_block_mode(true)?;
                self.bin.peek()?;
                Err(StreamError::OptionalData {
                    eof: false,
                    length: self.bin.current_block_remaining()?,
                }
                .into())
            }
            TC_ENDBLOCKDATA => {
                if block_mode {
                    Err(StreamError::OptionalData { eof: true, length: 0 }.into())
                } else {
                    Err(StreamError::UnexpectedEndOfBlockData.into())
                }
            }
            tag => Err(StreamError::InvalidTag { tag }.into()),
        }
    }

    fn assign(&mut self, value: Value, unshared: bool) -> Result<Handle> {
        self.options.check_references(self.handles.len() + 1)?;
        let binding = if unshared {
            Binding::Unshared
        } else {
            Binding::Shared(value)
        };
        Ok(self.handles.assign(binding))
    }

    /// Reads a back-reference and returns the target's handle and raw value.
    fn read_back_reference(&mut self, unshared: bool) -> Result<(Handle, Value)> {
        self.bin.read_u8()?;
        let wire = self.bin.read_i32()?;
        let handle = Handle::from_wire(wire)
            .filter(|h| self.handles.contains(*h))
            .ok_or(StreamError::InvalidHandle(wire))?;
        if unshared {
            return Err(StreamError::BackReferenceAsUnshared.into());
        }
        match self.handles.get(handle) {
            Some(Binding::Shared(value)) => Ok((handle, *value)),
            Some(Binding::Unshared) => Err(StreamError::UnsharedBackReference.into()),
            None => Err(StreamError::InvalidHandle(wire).into()),
        }
    }

    fn read_handle(&mut self, unshared: bool) -> Result<Decoded> {
        let (handle, value) = self.read_back_reference(unshared)?;
        let value = if self.handles.lookup_fault(handle).is_some() {
            Value::Null
        } else {
            value
        };
        trace!(handle = handle.get(), "back-reference");
        Ok(Decoded { value, handle })
    }

    fn check_resolve(&mut self, decoded: Decoded, unshared: bool) -> Result<Decoded> {
        let Some(resolve) = self.resolve_object.as_mut() else {
            return Ok(decoded);
        };
        if self.handles.lookup_fault(decoded.handle).is_some() {
            return Ok(decoded);
        }
        let replacement = resolve(&mut self.heap, decoded.value)?;
        if replacement != decoded.value && !unshared {
            self.handles
                .set_object(decoded.handle, Binding::Shared(replacement));
        }
        Ok(Decoded {
            value: replacement,
            handle: decoded.handle,
        })
    }

    fn read_string(&mut self, unshared: bool) -> Result<Decoded> {
        let text = match self.bin.read_u8()? {
            TC_STRING => self.bin.read_utf()?,
            TC_LONGSTRING => self.bin.read_long_utf()?,
            tag => return Err(StreamError::InvalidTag { tag }.into()),
        };
        let record = self.heap.alloc(Record::Str(text));
        let value = Value::Ref(record);
        let handle = self.assign(value, unshared)?;
        self.handles.finish(handle);
        trace!(handle = handle.get(), "string");
        Ok(Decoded { value, handle })
    }

    /// Reads a field type signature: a string record, a back-reference to
    /// one, or null.
    fn read_type_string(&mut self) -> Result<Option<String>> {
        let decoded = match self.bin.peek_byte()? {
            TC_NULL => {
                self.bin.read_u8()?;
                return Ok(None);
            }
            TC_REFERENCE => self.read_handle(false)?,
            TC_STRING | TC_LONGSTRING => self.read_string(false)?,
            tag => return Err(StreamError::InvalidTag { tag }.into()),
        };
        match self.heap.str(decoded.value) {
            Some(s) => Ok(Some(s.to_owned())),
            None => Err(StreamError::InvalidObject("type string is not a string record".into()).into()),
        }
    }

    fn read_class_desc(&mut self, unshared: bool) -> Result<Option<DescRead>> {
        match self.bin.peek_byte()? {
            TC_NULL => {
                self.bin.read_u8()?;
                Ok(None)
            }
            TC_REFERENCE => {
                let (handle, value) = self.read_back_reference(unshared)?;
                let found = value
                    .as_obj()
                    .and_then(|r| self.heap.get(r).map(|record| (r, record)));
                match found {
                    Some((record, Record::Descriptor(desc))) => Ok(Some(DescRead {
                        desc: desc.clone(),
                        handle,
                        record,
                    })),
                    _ => Err(StreamError::NotADescriptor.into()),
                }
            }
            TC_CLASSDESC => self.read_non_proxy_desc(unshared).map(Some),
            TC_PROXYCLASSDESC => self.read_proxy_desc(unshared).map(Some),
            tag => Err(StreamError::InvalidTag { tag }.into()),
        }
    }

    fn read_required_desc(&mut self) -> Result<DescRead> {
        self.read_class_desc(false)?
            .ok_or_else(|| StreamError::NotADescriptor.into())
    }

    fn read_non_proxy_desc(&mut self, unshared: bool) -> Result<DescRead> {
        self.bin.read_u8()?;
        let handle = self.assign(Value::Null, unshared)?;
        let name = self.bin.read_utf()?;
        let uid = self.bin.read_i64()?;
        let flags = self.bin.read_u8()?;
        let count = self.bin.read_i16()?;
        let count = usize::try_from(count).map_err(|_| {
            StreamError::InvalidDescriptor(name.clone(), format!("negative field count {count}"))
        })?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(self.read_field_desc()?);
        }
        self.filter.check(&name)?;
        let raw = RawDesc {
            name,
            uid,
            flags,
            kind: DescKind::Class,
            fields,
        };
        self.bin.set_block_mode(true)?;
        self.skip_custom_data()?;
        let super_desc = self.read_super_desc()?;
        self.finish_desc(raw, super_desc, handle, unshared)
    }

    fn read_field_desc(&mut self) -> Result<FieldDesc> {
        let code = self.bin.read_u8()?;
        let name = self.bin.read_utf()?;
        let type_code = TypeCode::from_code(code).ok_or_else(|| StreamError::InvalidTypeCode {
            field: name.clone(),
            code: code as char,
        })?;
        if type_code.is_primitive() {
            return Ok(FieldDesc::with_code(name, type_code, None));
        }
        let signature = self.read_type_string()?;
        match signature {
            Some(sig) if sig.starts_with('L') || sig.starts_with('[') => {
                let type_code = if sig.starts_with('[') {
                    TypeCode::Array
                } else {
                    TypeCode::Object
                };
                Ok(FieldDesc::with_code(name, type_code, Some(sig)))
            }
            _ => Err(StreamError::InvalidDescriptor(
                name,
                "invalid field type signature".into(),
            )
            .into()),
        }
    }

    fn read_proxy_desc(&mut self, unshared: bool) -> Result<DescRead> {
        self.bin.read_u8()?;
        let handle = self.assign(Value::Null, unshared)?;
        let count = self.bin.read_i32()?;
        if !(0..=MAX_PROXY_INTERFACES).contains(&count) {
            return Err(StreamError::InvalidDescriptor(
                "proxy".into(),
                format!("interface limit exceeded: {count}"),
            )
            .into());
        }
        let mut interfaces = Vec::with_capacity((count as usize).min(64));
        for _ in 0..count {
            interfaces.push(self.bin.read_utf()?);
        }
        for name in &interfaces {
            self.filter.check(name)?;
        }
        self.bin.set_block_mode(true)?;
        self.skip_custom_data()?;
        let super_desc = self.read_super_desc()?;
        let raw = RawDesc {
            name: format!("$Proxy[{}]", interfaces.join(",")),
            uid: 0,
            flags: SC_SERIALIZABLE,
            kind: DescKind::Proxy { interfaces },
            fields: Vec::new(),
        };
        self.finish_desc(raw, super_desc, handle, unshared)
    }

    fn read_super_desc(&mut self) -> Result<Option<DescRead>> {
        self.bin.enter()?;
        let result = self.read_class_desc(false);
        self.bin.leave();
        result
    }

    fn finish_desc(
        &mut self,
        raw: RawDesc,
        super_read: Option<DescRead>,
        handle: Handle,
        unshared: bool,
    ) -> Result<DescRead> {
        let super_handle = super_read.as_ref().map_or(Handle::NULL, |s| s.handle);
        let desc = Arc::new(ClassDesc::resolve(
            raw,
            super_read.map(|s| s.desc),
            &self.registry,
        ));
        let record = self.heap.alloc(Record::Descriptor(desc.clone()));
        if !unshared {
            self.handles
                .set_object(handle, Binding::Shared(Value::Ref(record)));
        }
        if let Some(fault) = desc.fault() {
            debug!(name = desc.name(), %fault, "type descriptor did not resolve");
            self.handles.mark_fault(handle, fault.clone());
        }
        self.handles.mark_dependency(handle, super_handle);
        self.handles.finish(handle);
        trace!(handle = handle.get(), name = desc.name(), "descriptor");
        Ok(DescRead {
            desc,
            handle,
            record,
        })
    }

    /// Skips block data and records up to the end-of-block marker.
    fn skip_custom_data(&mut self) -> Result<()> {
        loop {
            if self.bin.block_mode() {
                self.bin.skip_block_data()?;
                self.bin.set_block_mode(false)?;
            }
            match self.bin.peek_byte()? {
                TC_BLOCKDATA | TC_BLOCKDATALONG => {
                    self.bin.set_block_mode(true)?;
                }
                TC_ENDBLOCKDATA => {
                    self.bin.read_u8()?;
                    return Ok(());
                }
                _ => {
                    self.read_object0(false)?;
                }
            }
        }
    }

    /// Requires the custom data of `type_name` to be fully consumed and
    /// reads the end-of-block marker.
    fn expect_end_of_custom_data(&mut self, type_name: &str) -> Result<()> {
        if self.bin.block_mode() {
            if self.bin.peek()?.is_some() {
                return Err(StreamError::UnconsumedCustomData(type_name.to_owned()).into());
            }
            self.bin.set_block_mode(false)?;
        }
        match self.bin.peek_byte()? {
            TC_ENDBLOCKDATA => {
                self.bin.read_u8()?;
                Ok(())
            }
            _ => Err(StreamError::UnconsumedCustomData(type_name.to_owned()).into()),
        }
    }

    fn read_class(&mut self, unshared: bool) -> Result<Decoded> {
        self.bin.read_u8()?;
        let desc = self.read_required_desc()?;
        let record = self.heap.alloc(Record::Class(desc.desc.clone()));
        let value = Value::Ref(record);
        let handle = self.assign(value, unshared)?;
        self.handles.mark_dependency(handle, desc.handle);
        self.handles.finish(handle);
        trace!(handle = handle.get(), name = desc.desc.name(), "type literal");
        Ok(Decoded { value, handle })
    }

    fn read_array(&mut self, unshared: bool) -> Result<Decoded> {
        self.bin.read_u8()?;
        let desc = self.read_required_desc()?;
        let len = self.bin.read_i32()?;
        let len = usize::try_from(len).map_err(|_| StreamError::NegativeArrayLength(len))?;
        self.options.check_array_length(len)?;
        let element = desc.desc.element_type().ok_or_else(|| {
            StreamError::InvalidDescriptor(desc.desc.name().to_owned(), "not an array type".into())
        })?;
        let record = desc.desc.fault().is_none().then(|| {
            self.heap.alloc(Record::Array(ArrayRecord {
                desc: desc.desc.clone(),
                data: empty_array(element),
            }))
        });
        let value = record.map_or(Value::Null, Value::Ref);
        let handle = self.assign(value, unshared)?;
        self.handles.mark_dependency(handle, desc.handle);
        let data = if element.is_primitive() {
            self.read_prim_array(element, len)?
        } else {
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                let item = self.read_object0(false)?;
                self.handles.mark_dependency(handle, item.handle);
                items.push(item.value);
            }
            ArrayData::Ref(items)
        };
        if let Some(Record::Array(array)) = record.and_then(|r| self.heap.get_mut(r)) {
            array.data = data;
        }
        self.handles.finish(handle);
        trace!(handle = handle.get(), name = desc.desc.name(), len, "array");
        Ok(Decoded { value, handle })
    }

    fn read_prim_array(&mut self, element: TypeCode, len: usize) -> Result<ArrayData> {
        let bin = &mut self.bin;
        Ok(match element {
            TypeCode::Boolean => ArrayData::Bool(read_vec(bin, len, BlockReader::read_bool)?),
            TypeCode::Byte => ArrayData::Byte(read_vec(bin, len, BlockReader::read_i8)?),
            TypeCode::Char => ArrayData::Char(read_vec(bin, len, BlockReader::read_u16)?),
            TypeCode::Short => ArrayData::Short(read_vec(bin, len, BlockReader::read_i16)?),
            TypeCode::Int => ArrayData::Int(read_vec(bin, len, BlockReader::read_i32)?),
            TypeCode::Long => ArrayData::Long(read_vec(bin, len, BlockReader::read_i64)?),
            TypeCode::Float => ArrayData::Float(read_vec(bin, len, BlockReader::read_f32)?),
            TypeCode::Double => ArrayData::Double(read_vec(bin, len, BlockReader::read_f64)?),
            TypeCode::Object | TypeCode::Array => ArrayData::Ref(Vec::new()),
        })
    }

    fn read_enum(&mut self, unshared: bool) -> Result<Decoded> {
        self.bin.read_u8()?;
        let desc = self.read_required_desc()?;
        if !desc.desc.is_enum() {
            return Err(StreamError::NotAnEnum(desc.desc.name().to_owned()).into());
        }
        let handle = self.assign(Value::Null, unshared)?;
        self.handles.mark_dependency(handle, desc.handle);
        let name = self.read_string(false)?;
        let constant = self.heap.str(name.value).unwrap_or_default().to_owned();
        let mut value = Value::Null;
        if let Some(local) = desc.desc.local().cloned() {
            if local.constants().iter().any(|c| *c == constant) {
                value = Value::Ref(self.intern_enum(&local, constant));
                if !unshared {
                    self.handles.set_object(handle, Binding::Shared(value));
                }
            } else {
                let fault = Fault::UnknownEnumConstant {
                    name: local.name().to_owned(),
                    constant,
                };
                debug!(%fault, "enum constant did not resolve");
                self.handles.mark_fault(handle, Arc::new(fault));
            }
        }
        self.handles.finish(handle);
        trace!(handle = handle.get(), name = desc.desc.name(), "enum");
        Ok(Decoded { value, handle })
    }

    /// One record per constant for the decoder's lifetime.
    fn intern_enum(&mut self, class: &Arc<LocalClass>, constant: String) -> ObjRef {
        let key = (class.name().to_owned(), constant);
        if let Some(r) = self.enums.get(&key) {
            return *r;
        }
        let r = self.heap.alloc(Record::Enum(EnumRecord {
            class: class.clone(),
            constant: key.1.clone(),
        }));
        self.enums.insert(key, r);
        r
    }

    fn read_ordinary_object(&mut self, unshared: bool) -> Result<Decoded> {
        self.bin.read_u8()?;
        let desc_read = self.read_required_desc()?;
        let desc = desc_read.desc.clone();
        if desc.is_array() || desc.is_enum() {
            return Err(StreamError::IllegalObjectType(desc.name().to_owned()).into());
        }
        let local = desc.local().cloned();
        if let Some(local) = &local {
            if !matches!(
                local.kind(),
                ClassKind::Serializable | ClassKind::Externalizable
            ) {
                return Err(StreamError::IllegalObjectType(desc.name().to_owned()).into());
            }
        }
        let mut fault = None;
        let obj = match &local {
            Some(local) if self.registry.is_instantiable(local) => {
                let layout = self.registry.instance_layout(local);
                Some(
                    self.heap
                        .alloc(Record::Object(ObjectRecord::new(local.clone(), layout))),
                )
            }
            Some(local) => {
                fault = Some(Arc::new(Fault::NoConstructor(local.name().to_owned())));
                None
            }
            None => None,
        };
        let value = obj.map_or(Value::Null, Value::Ref);
        let handle = self.assign(value, unshared)?;
        self.handles.mark_dependency(handle, desc_read.handle);
        if let Some(fault) = fault {
            debug!(%fault, "object cannot be instantiated");
            self.handles.mark_fault(handle, fault);
        }
        if desc.is_externalizable() {
            self.read_external_data(obj, &desc, handle)?;
        } else {
            self.read_serial_data(obj, &desc, handle)?;
        }
        self.handles.finish(handle);
        trace!(handle = handle.get(), name = desc.name(), "object");

        let mut decoded = Decoded { value, handle };
        let resolve = local.as_ref().and_then(|l| l.read_resolve_hook());
        if let (Some(r), Some(hook)) = (obj, resolve) {
            if self.handles.lookup_fault(handle).is_none() {
                let mut replacement = hook(&mut self.heap, r)?;
                if unshared {
                    replacement = self.clone_array(replacement);
                }
                if replacement != value {
                    if !unshared {
                        self.handles
                            .set_object(handle, Binding::Shared(replacement));
                    }
                    decoded.value = replacement;
                }
            }
        }
        Ok(decoded)
    }

    /// Copies an array record so an unshared read owns its result.
    fn clone_array(&mut self, value: Value) -> Value {
        match self.heap.array(value).cloned() {
            Some(array) => Value::Ref(self.heap.alloc(Record::Array(array))),
            None => value,
        }
    }

    fn read_external_data(
        &mut self,
        obj: Option<ObjRef>,
        desc: &Arc<ClassDesc>,
        handle: Handle,
    ) -> Result<()> {
        let old_context = self.context.take();
        let old_active = std::mem::replace(&mut self.active, handle);
        let result = self.read_external_body(obj, desc, handle);
        self.context = old_context;
        self.active = old_active;
        result
    }

    fn read_external_body(
        &mut self,
        obj: Option<ObjRef>,
        desc: &Arc<ClassDesc>,
        handle: Handle,
    ) -> Result<()> {
        let blocked = desc.has_block_external_data();
        if blocked {
            self.bin.set_block_mode(true)?;
        }
        let hook = desc.local().and_then(|l| l.read_external_hook());
        let outcome = match (obj, hook) {
            (Some(r), Some(hook)) if self.handles.lookup_fault(handle).is_none() => hook(self, r),
            _ if blocked => return self.skip_custom_data(),
            _ => return Err(StreamError::UnskippableExternalData(desc.name().to_owned()).into()),
        };
        match outcome {
            Ok(()) if blocked => self.expect_end_of_custom_data(desc.name()),
            Ok(()) => Ok(()),
            Err(DecodeError::Unresolved(fault)) => {
                self.handles.mark_fault(handle, fault);
                if blocked {
                    self.skip_custom_data()
                } else {
                    Err(StreamError::UnskippableExternalData(desc.name().to_owned()).into())
                }
            }
            Err(e) => Err(e),
        }
    }

    fn read_serial_data(
        &mut self,
        obj: Option<ObjRef>,
        desc: &Arc<ClassDesc>,
        handle: Handle,
    ) -> Result<()> {
        let layout = desc.local().map(|l| self.registry.instance_layout(l));
        for slot in data_slots(desc, &self.registry) {
            let Some(slot_desc) = &slot.desc else {
                // local layer the writer did not know about
                if let (Some(r), Some(local)) = (obj, &slot.local) {
                    if self.handles.lookup_fault(handle).is_none() {
                        if let Some(hook) = local.no_data_hook() {
                            hook(&mut self.heap, r)?;
                        }
                    }
                }
                continue;
            };
            let target = match (obj, &slot.local, &layout) {
                (Some(r), Some(local), Some(layout)) => layout
                    .offset_of(local.name())
                    .map(|offset| Target { obj: r, offset }),
                _ => None,
            };
            let target = target.filter(|_| self.handles.lookup_fault(handle).is_none());
            let hook = slot.local.as_ref().and_then(|l| l.read_object_hook());
            match (target, hook) {
                (Some(target), Some(hook)) => {
                    self.invoke_read_object(hook, target, slot_desc, handle)?;
                }
                (target, _) => {
                    self.default_read_fields(target, slot_desc, handle)?;
                    if slot_desc.has_write_object_data() {
                        self.skip_custom_data()?;
                    } else {
                        self.bin.set_block_mode(false)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn invoke_read_object(
        &mut self,
        hook: ReadObjectHook,
        target: Target,
        desc: &Arc<ClassDesc>,
        handle: Handle,
    ) -> Result<()> {
        let old_context = self.context.replace(HookContext {
            target,
            desc: desc.clone(),
            used: false,
        });
        let old_active = std::mem::replace(&mut self.active, handle);
        let outcome = match self.bin.set_block_mode(true) {
            Ok(_) => hook(self, target.obj),
            Err(e) => Err(e.into()),
        };
        let used = self.context.as_ref().is_some_and(|c| c.used);
        self.context = old_context;
        self.active = old_active;
        self.bin.set_default_data_end(false);
        match outcome {
            Ok(()) if desc.has_write_object_data() => self.expect_end_of_custom_data(desc.name()),
            Ok(()) if !used && !desc.fields().is_empty() => {
                Err(StreamError::UnconsumedCustomData(desc.name().to_owned()).into())
            }
            Ok(()) => {
                self.bin.set_block_mode(false)?;
                Ok(())
            }
            Err(DecodeError::Unresolved(fault)) => {
                self.handles.mark_fault(handle, fault);
                if desc.has_write_object_data() {
                    return self.skip_custom_data();
                }
                self.bin.set_block_mode(false)?;
                if !used {
                    self.default_read_fields(None, desc, handle)?;
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Decodes one layer's field values into `target`, or discards them.
    fn default_read_fields(
        &mut self,
        target: Option<Target>,
        desc: &ClassDesc,
        handle: Handle,
    ) -> Result<()> {
        let values = self.read_field_values(desc)?;
        let Some(target) = target else {
            return Ok(());
        };
        for (i, (value, field_handle)) in values.into_iter().enumerate() {
            let Some(j) = desc.binding(i) else {
                continue;
            };
            self.handles.mark_dependency(handle, field_handle);
            if let Some(obj) = self.heap.object_mut(target.obj) {
                obj.set_slot(target.offset + j, value);
            }
        }
        Ok(())
    }

    /// Reads one layer's field values in stream field order: the packed
    /// primitive run, then one record per reference field.
    fn read_field_values(&mut self, desc: &ClassDesc) -> Result<Vec<(Value, Handle)>> {
        let layout = desc.layout();
        let mut prims = vec![0u8; layout.prim_data_size()];
        self.bin.read_fully(&mut prims)?;
        let mut objs = Vec::with_capacity(layout.num_obj_fields());
        for _ in 0..layout.num_obj_fields() {
            objs.push(self.read_object0(false)?);
        }
        let mut prim_reader = Reader::new(&prims);
        let mut values = Vec::with_capacity(desc.fields().len());
        for (i, field) in desc.fields().iter().enumerate() {
            let value = match layout.offset(i) {
                Some(FieldOffset::Prim(at)) => {
                    prim_reader.x = at;
                    (field.type_code().decode(&mut prim_reader)?, Handle::NULL)
                }
                Some(FieldOffset::Obj(k)) => objs
                    .get(k)
                    .map_or((Value::Null, Handle::NULL), |d| (d.value, d.handle)),
                None => (Value::Null, Handle::NULL),
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Reads the exception record a writer emits when it aborts.
    fn read_fatal_exception(&mut self) -> Result<StreamError> {
        self.bin.read_u8()?;
        self.clear();
        let decoded = self.read_object0(false)?;
        let (type_name, message) = match self.heap.object(decoded.value) {
            Some(obj) => (
                obj.type_name().to_owned(),
                obj.get("detailMessage")
                    .and_then(|m| self.heap.str(m))
                    .map(str::to_owned),
            ),
            None => ("<unresolved>".to_owned(), None),
        };
        self.clear();
        debug!(%type_name, "writer aborted the stream");
        Ok(StreamError::WriteAborted { type_name, message })
    }
}

fn empty_array(element: TypeCode) -> ArrayData {
    match element {
        TypeCode::Boolean => ArrayData::Bool(Vec::new()),
        TypeCode::Byte => ArrayData::Byte(Vec::new()),
        TypeCode::Char => ArrayData::Char(Vec::new()),
        TypeCode::Short => ArrayData::Short(Vec::new()),
        TypeCode::Int => ArrayData::Int(Vec::new()),
        TypeCode::Long => ArrayData::Long(Vec::new()),
        TypeCode::Float => ArrayData::Float(Vec::new()),
        TypeCode::Double => ArrayData::Double(Vec::new()),
        TypeCode::Object | TypeCode::Array => ArrayData::Ref(Vec::new()),
    }
}

fn read_vec<'a, T>(
    bin: &mut BlockReader<'a>,
    len: usize,
    read: fn(&mut BlockReader<'a>) -> StdResult<T, StreamError>,
) -> StdResult<Vec<T>, StreamError> {
    let mut out = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        out.push(read(bin)?);
    }
    Ok(out)
}
