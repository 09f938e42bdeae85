//! The view custom decode hooks get of the stream.

use crate::error::{DecodeError, Result, StreamError};
use crate::value::{Heap, Value};

use super::{ObjectDecoder, Validation};

/// Stream access for custom decode hooks.
///
/// Inside a `read_object` hook the stream is in block mode: primitive reads
/// consume the layer's custom data, and [`read_object`](Self::read_object)
/// decodes nested records. A hook must consume everything its writer wrote;
/// leftover data fails the stream.
pub trait ObjectInput {
    /// Decodes the next record. A fault on it is returned as
    /// [`DecodeError::Unresolved`] and also taints the object being decoded.
    fn read_object(&mut self) -> Result<Value>;

    /// Like [`read_object`](Self::read_object), but the record may not be
    /// referenced again.
    fn read_unshared(&mut self) -> Result<Value>;

    /// Decodes the current layer's fields into the object.
    fn default_read_object(&mut self) -> Result<()>;

    /// Decodes the current layer's fields without storing them.
    fn read_fields(&mut self) -> Result<GetFields>;

    /// Queues `callback` to run once the top-level record is complete.
    fn register_validation(&mut self, priority: i32, callback: Validation) -> Result<()>;

    fn read_bool(&mut self) -> Result<bool>;
    fn read_i8(&mut self) -> Result<i8>;
    fn read_u8(&mut self) -> Result<u8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_u16(&mut self) -> Result<u16>;
    /// Reads one UTF-16 code unit.
    fn read_char(&mut self) -> Result<u16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_f32(&mut self) -> Result<f32>;
    fn read_f64(&mut self) -> Result<f64>;
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()>;
    /// Reads up to `buf.len()` bytes; 0 means end of data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn skip_bytes(&mut self, n: usize) -> Result<usize>;
    fn read_utf(&mut self) -> Result<String>;
    fn available(&mut self) -> Result<usize>;

    fn heap(&self) -> &Heap;
    fn heap_mut(&mut self) -> &mut Heap;

    /// Reads a record that must be a string or null.
    fn read_string(&mut self) -> Result<Option<String>> {
        let value = self.read_object()?;
        if value.is_null() {
            return Ok(None);
        }
        match self.heap().str(value) {
            Some(s) => Ok(Some(s.to_owned())),
            None => Err(DecodeError::invalid_object("expected a string record")),
        }
    }
}

/// Field values of one layer, as read by [`ObjectInput::read_fields`].
#[derive(Debug, Clone, Default)]
pub struct GetFields {
    values: Vec<(String, Value)>,
}

impl GetFields {
    /// Value of a field the stream carried.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Value of `name`, or `default` when the stream has no such field.
    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name).unwrap_or(default)
    }

    /// `true` when the stream did not carry `name`.
    pub fn defaulted(&self, name: &str) -> bool {
        self.get(name).is_none()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl ObjectInput for ObjectDecoder<'_> {
    fn read_object(&mut self) -> Result<Value> {
        self.read_top(false)
    }

    fn read_unshared(&mut self) -> Result<Value> {
        self.read_top(true)
    }

    fn default_read_object(&mut self) -> Result<()> {
        let Some(ctx) = self.context.as_mut() else {
            return Err(StreamError::NotActive("not in call to read_object").into());
        };
        if ctx.used {
            return Err(StreamError::NotActive("fields already read").into());
        }
        ctx.used = true;
        let (target, desc) = (ctx.target, ctx.desc.clone());
        let handle = self.active;
        self.bin.set_block_mode(false)?;
        self.default_read_fields(Some(target), &desc, handle)?;
        self.bin.set_block_mode(true)?;
        if !desc.has_write_object_data() {
            self.bin.set_default_data_end(true);
        }
        match self.handles.lookup_fault(handle) {
            Some(fault) => Err(DecodeError::Unresolved(fault.clone())),
            None => Ok(()),
        }
    }

    fn read_fields(&mut self) -> Result<GetFields> {
        let Some(ctx) = self.context.as_mut() else {
            return Err(StreamError::NotActive("not in call to read_object").into());
        };
        if ctx.used {
            return Err(StreamError::NotActive("fields already read").into());
        }
        ctx.used = true;
        let desc = ctx.desc.clone();
        let handle = self.active;
        self.bin.set_block_mode(false)?;
        let read = self.read_field_values(&desc)?;
        self.bin.set_block_mode(true)?;
        if !desc.has_write_object_data() {
            self.bin.set_default_data_end(true);
        }
        let mut values = Vec::with_capacity(read.len());
        for (field, (value, field_handle)) in desc.fields().iter().zip(read) {
            self.handles.mark_dependency(handle, field_handle);
            let value = if self.handles.lookup_fault(field_handle).is_some() {
                Value::Null
            } else {
                value
            };
            values.push((field.name().to_owned(), value));
        }
        Ok(GetFields { values })
    }

    fn register_validation(&mut self, priority: i32, callback: Validation) -> Result<()> {
        if self.bin.depth() == 0 {
            return Err(StreamError::NotActive("stream inactive").into());
        }
        self.validations.register(priority, callback);
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.bin.read_bool()?)
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.bin.read_i8()?)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.bin.read_u8()?)
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.bin.read_i16()?)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(self.bin.read_u16()?)
    }

    fn read_char(&mut self) -> Result<u16> {
        Ok(self.bin.read_u16()?)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.bin.read_i32()?)
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.bin.read_i64()?)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(self.bin.read_f32()?)
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(self.bin.read_f64()?)
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        Ok(self.bin.read_fully(buf)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.bin.read(buf)?)
    }

    fn skip_bytes(&mut self, n: usize) -> Result<usize> {
        Ok(self.bin.skip_bytes(n)?)
    }

    fn read_utf(&mut self) -> Result<String> {
        Ok(self.bin.read_utf()?)
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.bin.available()?)
    }

    fn heap(&self) -> &Heap {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }
}
