//! Decoded values and the record arena.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Number};

use crate::descriptor::ClassDesc;
use crate::registry::{InstanceLayout, LocalClass};

/// Index of a record in a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A field, array element or top-level value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Byte(i8),
    /// A UTF-16 code unit.
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(ObjRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widens any integral value (chars included) to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(v as i64),
            Value::Char(v) => Some(v as i64),
            Value::Short(v) => Some(v as i64),
            Value::Int(v) => Some(v as i64),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }
}

/// Element storage of an array record.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Ref(Vec<Value>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Ref(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` as a [`Value`].
    pub fn get(&self, i: usize) -> Option<Value> {
        match self {
            ArrayData::Bool(v) => v.get(i).map(|x| Value::Bool(*x)),
            ArrayData::Byte(v) => v.get(i).map(|x| Value::Byte(*x)),
            ArrayData::Char(v) => v.get(i).map(|x| Value::Char(*x)),
            ArrayData::Short(v) => v.get(i).map(|x| Value::Short(*x)),
            ArrayData::Int(v) => v.get(i).map(|x| Value::Int(*x)),
            ArrayData::Long(v) => v.get(i).map(|x| Value::Long(*x)),
            ArrayData::Float(v) => v.get(i).map(|x| Value::Float(*x)),
            ArrayData::Double(v) => v.get(i).map(|x| Value::Double(*x)),
            ArrayData::Ref(v) => v.get(i).copied(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArrayRecord {
    pub desc: Arc<ClassDesc>,
    pub data: ArrayData,
}

#[derive(Debug, Clone)]
pub struct EnumRecord {
    pub class: Arc<LocalClass>,
    pub constant: String,
}

/// An instance of a local type. Slots cover the whole serializable
/// hierarchy, root type first.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub class: Arc<LocalClass>,
    layout: Arc<InstanceLayout>,
    slots: Vec<Value>,
}

impl ObjectRecord {
    pub(crate) fn new(class: Arc<LocalClass>, layout: Arc<InstanceLayout>) -> Self {
        let slots = layout.defaults();
        Self {
            class,
            layout,
            slots,
        }
    }

    pub fn type_name(&self) -> &str {
        self.class.name()
    }

    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Field value by name. A field of a subtype shadows a same-named field
    /// of its supertype.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.layout
            .find(field)
            .and_then(|i| self.slots.get(i).copied())
    }

    /// Field value declared by a specific type of the hierarchy.
    pub fn get_in(&self, class: &str, field: &str) -> Option<Value> {
        self.layout
            .slot(class, field)
            .and_then(|i| self.slots.get(i).copied())
    }

    /// Sets a field by name; returns `false` if the type has no such field.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        match self.layout.find(field) {
            Some(i) => self.set_slot(i, value),
            None => false,
        }
    }

    pub(crate) fn set_slot(&mut self, i: usize, value: Value) -> bool {
        match self.slots.get_mut(i) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// A decoded record.
#[derive(Debug, Clone)]
pub enum Record {
    Str(String),
    Descriptor(Arc<ClassDesc>),
    /// A type literal.
    Class(Arc<ClassDesc>),
    Array(ArrayRecord),
    Enum(EnumRecord),
    Object(ObjectRecord),
}

/// Arena owning the records of one session generation.
///
/// [`Heap::release`] drops every record and starts a new generation.
/// Numbering continues across generations, so a released `ObjRef` resolves
/// to nothing instead of to a newer record.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    base: u32,
    records: Vec<Record>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live records in the current generation.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn alloc(&mut self, record: Record) -> ObjRef {
        let r = ObjRef(self.base.wrapping_add(self.records.len() as u32));
        self.records.push(record);
        r
    }

    /// Ends the current generation, returning its records.
    pub fn release(&mut self) -> Heap {
        let next = Heap {
            base: self.base.wrapping_add(self.records.len() as u32),
            records: Vec::new(),
        };
        std::mem::replace(self, next)
    }

    fn slot(&self, r: ObjRef) -> Option<usize> {
        r.0.checked_sub(self.base).map(|i| i as usize)
    }

    pub fn get(&self, r: ObjRef) -> Option<&Record> {
        self.slot(r).and_then(|i| self.records.get(i))
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut Record> {
        self.slot(r).and_then(|i| self.records.get_mut(i))
    }

    /// The record behind `value`, if it is a reference.
    pub fn record(&self, value: Value) -> Option<&Record> {
        value.as_obj().and_then(|r| self.get(r))
    }

    pub fn str(&self, value: Value) -> Option<&str> {
        match self.record(value)? {
            Record::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn object(&self, value: Value) -> Option<&ObjectRecord> {
        match self.record(value)? {
            Record::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn object_mut(&mut self, r: ObjRef) -> Option<&mut ObjectRecord> {
        match self.get_mut(r)? {
            Record::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn array(&self, value: Value) -> Option<&ArrayRecord> {
        match self.record(value)? {
            Record::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Renders a decoded graph as JSON.
    ///
    /// Objects and arrays carry `"$id"` and `"$type"`; a record reached a
    /// second time renders as `{"$ref": id}`, so shared and cyclic graphs
    /// stay finite. Strings always render inline.
    pub fn to_json(&self, value: Value) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.render(value, &mut seen)
    }

    fn render(&self, value: Value, seen: &mut HashSet<ObjRef>) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Byte(v) => json!(v),
            Value::Char(c) => match char::from_u32(c as u32) {
                Some(ch) => json!(ch.to_string()),
                None => json!(c),
            },
            Value::Short(v) => json!(v),
            Value::Int(v) => json!(v),
            Value::Long(v) => json!(v),
            Value::Float(v) => float(v as f64),
            Value::Double(v) => float(v),
            Value::Ref(r) => self.render_record(r, seen),
        }
    }

    fn render_record(&self, r: ObjRef, seen: &mut HashSet<ObjRef>) -> serde_json::Value {
        let Some(record) = self.get(r) else {
            return serde_json::Value::Null;
        };
        match record {
            Record::Str(s) => return json!(s),
            Record::Descriptor(d) | Record::Class(d) => return json!({ "$class": d.name() }),
            Record::Enum(e) => return json!({ "$type": e.class.name(), "$enum": e.constant }),
            Record::Array(_) | Record::Object(_) => {}
        }
        if !seen.insert(r) {
            return json!({ "$ref": r.index() });
        }
        let mut out = Map::new();
        out.insert("$id".into(), json!(r.index()));
        match record {
            Record::Array(a) => {
                out.insert("$type".into(), json!(a.desc.name()));
                let items = (0..a.data.len())
                    .filter_map(|i| a.data.get(i))
                    .map(|v| self.render(v, seen))
                    .collect();
                out.insert("$items".into(), serde_json::Value::Array(items));
            }
            Record::Object(o) => {
                out.insert("$type".into(), json!(o.type_name()));
                for (name, slot) in o.layout.field_names() {
                    let v = o.slots.get(slot).copied().unwrap_or_default();
                    let rendered = self.render(v, seen);
                    out.insert(name.to_owned(), rendered);
                }
            }
            _ => {}
        }
        serde_json::Value::Object(out)
    }
}

fn float(v: f64) -> serde_json::Value {
    Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::Char(65).as_i64(), Some(65));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert!(Value::default().is_null());
        assert_eq!(Value::Bool(true).as_obj(), None);
    }

    #[test]
    fn test_array_data_get() {
        let data = ArrayData::Int(vec![1, 2, 3]);
        assert_eq!(data.len(), 3);
        assert_eq!(data.get(1), Some(Value::Int(2)));
        assert_eq!(data.get(3), None);
    }

    #[test]
    fn test_heap_strings_render_inline() {
        let mut heap = Heap::new();
        let s = heap.alloc(Record::Str("hi".into()));
        assert_eq!(heap.str(Value::Ref(s)), Some("hi"));
        assert_eq!(heap.to_json(Value::Ref(s)), json!("hi"));
        assert_eq!(heap.to_json(Value::Null), serde_json::Value::Null);
        assert_eq!(heap.to_json(Value::Char(0x41)), json!("A"));
    }

    #[test]
    fn test_release_starts_new_generation() {
        let mut heap = Heap::new();
        let a = heap.alloc(Record::Str("a".into()));
        heap.alloc(Record::Str("b".into()));
        let old = heap.release();
        assert!(heap.is_empty());
        assert_eq!(old.str(Value::Ref(a)), Some("a"));
        assert_eq!(heap.get(a).map(|_| ()), None);

        let c = heap.alloc(Record::Str("c".into()));
        assert_ne!(a, c);
        assert_eq!(c.index(), 2);
        assert_eq!(heap.str(Value::Ref(c)), Some("c"));
        assert_eq!(old.get(c).map(|_| ()), None);
    }
}
