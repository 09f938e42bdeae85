//! Type descriptors.
//!
//! A [`ClassDesc`] is the self-description of a type as the writer saw it:
//! name, version UID, flags and field list, chained to its supertype's
//! descriptor. When a descriptor is read it is resolved against the
//! [`TypeRegistry`] once; any mismatch is recorded as a [`Fault`] on the
//! descriptor instead of failing the stream.

mod layout;

use std::fmt;
use std::sync::Arc;

pub use layout::{match_fields, FieldLayout, FieldOffset};

use objstream_buffers::{BufferError, Reader};

use crate::constants::*;
use crate::error::Fault;
use crate::registry::{ClassKind, LocalClass, TypeRegistry};
use crate::value::Value;

/// Field type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object,
    Array,
}

impl TypeCode {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'B' => TypeCode::Byte,
            b'C' => TypeCode::Char,
            b'D' => TypeCode::Double,
            b'F' => TypeCode::Float,
            b'I' => TypeCode::Int,
            b'J' => TypeCode::Long,
            b'S' => TypeCode::Short,
            b'Z' => TypeCode::Boolean,
            b'L' => TypeCode::Object,
            b'[' => TypeCode::Array,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        match self {
            TypeCode::Byte => b'B',
            TypeCode::Char => b'C',
            TypeCode::Double => b'D',
            TypeCode::Float => b'F',
            TypeCode::Int => b'I',
            TypeCode::Long => b'J',
            TypeCode::Short => b'S',
            TypeCode::Boolean => b'Z',
            TypeCode::Object => b'L',
            TypeCode::Array => b'[',
        }
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, TypeCode::Object | TypeCode::Array)
    }

    /// Encoded width of a primitive; 0 for references.
    pub fn size(self) -> usize {
        match self {
            TypeCode::Byte | TypeCode::Boolean => 1,
            TypeCode::Char | TypeCode::Short => 2,
            TypeCode::Int | TypeCode::Float => 4,
            TypeCode::Long | TypeCode::Double => 8,
            TypeCode::Object | TypeCode::Array => 0,
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            TypeCode::Byte => Value::Byte(0),
            TypeCode::Char => Value::Char(0),
            TypeCode::Double => Value::Double(0.0),
            TypeCode::Float => Value::Float(0.0),
            TypeCode::Int => Value::Int(0),
            TypeCode::Long => Value::Long(0),
            TypeCode::Short => Value::Short(0),
            TypeCode::Boolean => Value::Bool(false),
            TypeCode::Object | TypeCode::Array => Value::Null,
        }
    }

    /// Reads one big-endian primitive at the reader's cursor.
    pub(crate) fn decode(self, r: &mut Reader<'_>) -> Result<Value, BufferError> {
        Ok(match self {
            TypeCode::Byte => Value::Byte(r.i8()?),
            TypeCode::Boolean => Value::Bool(r.u8()? != 0),
            TypeCode::Char => Value::Char(r.u16()?),
            TypeCode::Short => Value::Short(r.i16()?),
            TypeCode::Int => Value::Int(r.i32()?),
            TypeCode::Float => Value::Float(r.f32()?),
            TypeCode::Long => Value::Long(r.i64()?),
            TypeCode::Double => Value::Double(r.f64()?),
            TypeCode::Object | TypeCode::Array => Value::Null,
        })
    }
}

/// One serializable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDesc {
    name: String,
    type_code: TypeCode,
    /// Type signature of reference fields, e.g. `Ljava/lang/String;`.
    signature: Option<String>,
}

impl FieldDesc {
    pub fn primitive(name: impl Into<String>, type_code: TypeCode) -> Self {
        Self {
            name: name.into(),
            type_code,
            signature: None,
        }
    }

    /// A reference field; the type code comes from the signature's first byte.
    pub fn object(name: impl Into<String>, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let type_code = if signature.starts_with('[') {
            TypeCode::Array
        } else {
            TypeCode::Object
        };
        Self {
            name: name.into(),
            type_code,
            signature: Some(signature),
        }
    }

    pub(crate) fn with_code(name: String, type_code: TypeCode, signature: Option<String>) -> Self {
        Self {
            name,
            type_code,
            signature,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

/// Identity of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescKind {
    /// A named type with an explicit field list.
    Class,
    /// A proxy type identified by the interfaces it implements.
    Proxy { interfaces: Vec<String> },
}

/// Descriptor fields as read from the stream, before resolution.
#[derive(Debug, Clone)]
pub(crate) struct RawDesc {
    pub name: String,
    pub uid: i64,
    pub flags: u8,
    pub kind: DescKind,
    pub fields: Vec<FieldDesc>,
}

/// A type descriptor read from a stream, resolved against the local registry.
pub struct ClassDesc {
    name: String,
    uid: i64,
    flags: u8,
    kind: DescKind,
    fields: Vec<FieldDesc>,
    layout: FieldLayout,
    super_desc: Option<Arc<ClassDesc>>,
    local: Option<Arc<LocalClass>>,
    /// Local field index for each stream field.
    bindings: Vec<Option<usize>>,
    fault: Option<Arc<Fault>>,
}

impl fmt::Debug for ClassDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDesc")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("flags", &self.flags)
            .field("fields", &self.fields)
            .field("super", &self.super_desc.as_ref().map(|d| d.name()))
            .field("resolved", &self.local.is_some())
            .field("fault", &self.fault)
            .finish()
    }
}

impl ClassDesc {
    /// Resolves a descriptor read from the stream.
    pub(crate) fn resolve(
        mut raw: RawDesc,
        super_desc: Option<Arc<ClassDesc>>,
        registry: &TypeRegistry,
    ) -> Self {
        let layout = FieldLayout::compute(&raw.fields);
        let local = match &raw.kind {
            DescKind::Class => registry.get(&raw.name).cloned(),
            DescKind::Proxy { interfaces } => registry.proxy(interfaces).cloned(),
        };
        if let (DescKind::Proxy { .. }, Some(local)) = (&raw.kind, &local) {
            raw.name = local.name().to_owned();
        }
        let unbound = vec![None; raw.fields.len()];
        let checked = check(&raw, &layout, local.as_deref(), super_desc.as_deref(), registry)
            .and_then(|()| match &local {
                Some(local) => match_fields(&raw.fields, local),
                None => Ok(unbound.clone()),
            });
        let (bindings, fault) = match checked {
            Ok(bindings) => (bindings, super_desc.as_ref().and_then(|s| s.fault.clone())),
            Err(fault) => (unbound, Some(Arc::new(fault))),
        };
        Self {
            name: raw.name,
            uid: raw.uid,
            flags: raw.flags,
            kind: raw.kind,
            fields: raw.fields,
            layout,
            super_desc,
            local: if fault.is_some() { None } else { local },
            bindings,
            fault,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn kind(&self) -> &DescKind {
        &self.kind
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, DescKind::Proxy { .. })
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }

    pub fn super_desc(&self) -> Option<&Arc<ClassDesc>> {
        self.super_desc.as_ref()
    }

    /// The local type this descriptor resolved to.
    pub fn local(&self) -> Option<&Arc<LocalClass>> {
        self.local.as_ref()
    }

    pub fn fault(&self) -> Option<&Arc<Fault>> {
        self.fault.as_ref()
    }

    pub(crate) fn binding(&self, field: usize) -> Option<usize> {
        self.bindings.get(field).copied().flatten()
    }

    pub fn is_enum(&self) -> bool {
        self.flags & SC_ENUM != 0
    }

    pub fn is_externalizable(&self) -> bool {
        self.flags & SC_EXTERNALIZABLE != 0
    }

    pub fn is_serializable(&self) -> bool {
        self.flags & SC_SERIALIZABLE != 0
    }

    /// Custom data follows the default fields, terminated by an end-of-block marker.
    pub fn has_write_object_data(&self) -> bool {
        self.is_serializable() && self.flags & SC_WRITE_METHOD != 0
    }

    /// External data is block-framed.
    pub fn has_block_external_data(&self) -> bool {
        self.is_externalizable() && self.flags & SC_BLOCK_DATA != 0
    }

    pub fn is_array(&self) -> bool {
        self.name.starts_with('[')
    }

    /// Element type of an array descriptor.
    pub fn element_type(&self) -> Option<TypeCode> {
        array_element(&self.name).map(|(code, _)| code)
    }
}

/// Splits an array type name into its element type code and, for reference
/// arrays, the innermost component name.
pub(crate) fn array_element(name: &str) -> Option<(TypeCode, Option<&str>)> {
    let rest = name.strip_prefix('[')?;
    let code = TypeCode::from_code(*rest.as_bytes().first()?)?;
    let inner = rest.trim_start_matches('[');
    let component = match *inner.as_bytes().first()? {
        b'L' => Some(inner.strip_prefix('L')?.strip_suffix(';')?),
        c if inner.len() == 1 && TypeCode::from_code(c).is_some_and(TypeCode::is_primitive) => None,
        _ => return None,
    };
    if code == TypeCode::Object && component.is_none() {
        return None;
    }
    Some((code, component))
}

fn check(
    raw: &RawDesc,
    layout: &FieldLayout,
    local: Option<&LocalClass>,
    super_desc: Option<&ClassDesc>,
    registry: &TypeRegistry,
) -> Result<(), Fault> {
    let name = raw.name.as_str();
    let mut ancestor = super_desc;
    while let Some(desc) = ancestor {
        if desc.name == name {
            return Err(Fault::invalid(name, "circular reference"));
        }
        ancestor = desc.super_desc.as_deref();
    }
    if raw.flags & SC_SERIALIZABLE != 0 && raw.flags & SC_EXTERNALIZABLE != 0 {
        return Err(Fault::invalid(name, "serializable and externalizable flags conflict"));
    }
    if raw.flags & SC_ENUM != 0 {
        if raw.uid != 0 {
            return Err(Fault::invalid(name, "enum descriptor has non-zero serialVersionUID"));
        }
        if !raw.fields.is_empty() {
            return Err(Fault::invalid(name, "enum descriptor has non-zero field count"));
        }
    }
    if let Some(i) = layout.violation() {
        return Err(Fault::invalid(
            name,
            format!("illegal field order at {}", raw.fields[i].name()),
        ));
    }
    if name.starts_with('[') {
        return match array_element(name) {
            None => Err(Fault::invalid(name, "malformed array type name")),
            Some((_, Some(component))) if registry.get(component).is_none() => {
                Err(Fault::TypeNotFound(component.to_owned()))
            }
            Some(_) => Ok(()),
        };
    }
    let Some(local) = local else {
        return Err(Fault::TypeNotFound(match &raw.kind {
            DescKind::Class => name.to_owned(),
            DescKind::Proxy { interfaces } => interfaces.join(","),
        }));
    };
    let is_enum = raw.flags & SC_ENUM != 0;
    let local_enum = matches!(local.kind(), ClassKind::Enum { .. }) || local.name() == ENUM_TYPE;
    match (local_enum, is_enum) {
        (true, false) => {
            return Err(Fault::invalid(name, "cannot bind non-enum descriptor to an enum type"))
        }
        (true, true) => return Ok(()),
        (false, true) => {
            return Err(Fault::invalid(name, "cannot bind enum descriptor to a non-enum type"))
        }
        (false, false) => {}
    }
    match local.kind() {
        ClassKind::Special | ClassKind::Enum { .. } => return Ok(()),
        ClassKind::Plain => return Err(Fault::invalid(name, "type invalid for deserialization")),
        ClassKind::Externalizable if raw.flags & SC_EXTERNALIZABLE == 0 => {
            return Err(Fault::invalid(name, "Serializable incompatible with Externalizable"))
        }
        ClassKind::Serializable if raw.flags & SC_EXTERNALIZABLE != 0 => {
            return Err(Fault::invalid(name, "Serializable incompatible with Externalizable"))
        }
        ClassKind::Serializable | ClassKind::Externalizable => {}
    }
    if let Some(uid) = local.version_uid() {
        if uid != raw.uid && raw.kind == DescKind::Class {
            return Err(Fault::invalid(
                name,
                format!(
                    "local class incompatible: stream classdesc serialVersionUID = {}, local class serialVersionUID = {}",
                    raw.uid, uid
                ),
            ));
        }
    }
    Ok(())
}

/// One layer of an instance's data, root type first.
#[derive(Debug, Clone)]
pub(crate) struct DataSlot {
    /// Stream descriptor of the layer; `None` for local-only layers.
    pub desc: Option<Arc<ClassDesc>>,
    /// Local type the layer's fields land in.
    pub local: Option<Arc<LocalClass>>,
}

/// Pairs the stream's descriptor chain with the local serializable hierarchy.
///
/// Stream layers without a local counterpart are decoded and discarded; local
/// layers missing from the stream get a no-data slot.
pub(crate) fn data_slots(desc: &Arc<ClassDesc>, registry: &TypeRegistry) -> Vec<DataSlot> {
    let chain = match &desc.local {
        Some(local) => registry.serializable_chain(local),
        None => Vec::new(),
    };
    let mut slots = Vec::new();
    let mut start = 0;
    let mut cursor = Some(desc.clone());
    while let Some(d) = cursor {
        let matched = chain[start..]
            .iter()
            .position(|c| c.name() == d.name())
            .map(|p| start + p);
        let local = match matched {
            Some(m) => {
                for c in &chain[start..m] {
                    slots.push(DataSlot {
                        desc: None,
                        local: Some(c.clone()),
                    });
                }
                start = m + 1;
                Some(chain[m].clone())
            }
            None => None,
        };
        cursor = d.super_desc.clone();
        slots.push(DataSlot {
            desc: Some(d),
            local,
        });
    }
    for c in &chain[start..] {
        slots.push(DataSlot {
            desc: None,
            local: Some(c.clone()),
        });
    }
    slots.reverse();
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, uid: i64, flags: u8, fields: Vec<FieldDesc>) -> RawDesc {
        RawDesc {
            name: name.into(),
            uid,
            flags,
            kind: DescKind::Class,
            fields,
        }
    }

    fn registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        reg.register(
            LocalClass::serializable("Point")
                .uid(7)
                .field("x", TypeCode::Int)
                .field("y", TypeCode::Int),
        );
        reg.register(LocalClass::serializable("Base").field("id", TypeCode::Long));
        reg.register(
            LocalClass::serializable("Mid")
                .extends("Base")
                .field("m", TypeCode::Int),
        );
        reg.register(
            LocalClass::serializable("Leaf")
                .extends("Mid")
                .field("l", TypeCode::Int),
        );
        reg.register(LocalClass::enumeration("Color", ["RED", "GREEN"]));
        reg
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(TypeCode::from_code(b'J'), Some(TypeCode::Long));
        assert_eq!(TypeCode::from_code(b'Q'), None);
        assert_eq!(TypeCode::Long.size(), 8);
        assert!(!TypeCode::Array.is_primitive());
        let bytes = [0, 0, 1, 0, 0, 0x41, 1];
        let mut r = Reader::new(&bytes);
        assert_eq!(TypeCode::Int.decode(&mut r).unwrap(), Value::Int(256));
        assert_eq!(TypeCode::Char.decode(&mut r).unwrap(), Value::Char(0x41));
        assert_eq!(TypeCode::Boolean.decode(&mut r).unwrap(), Value::Bool(true));
        assert_eq!(TypeCode::Object.decode(&mut r).unwrap(), Value::Null);
        assert!(matches!(TypeCode::Short.decode(&mut r), Err(BufferError::EndOfBuffer)));
    }

    #[test]
    fn test_array_names() {
        assert_eq!(array_element("[I"), Some((TypeCode::Int, None)));
        assert_eq!(
            array_element("[LPoint;"),
            Some((TypeCode::Object, Some("Point")))
        );
        assert_eq!(array_element("[[J"), Some((TypeCode::Array, None)));
        assert_eq!(
            array_element("[[LPoint;"),
            Some((TypeCode::Array, Some("Point")))
        );
        assert_eq!(array_element("[Q"), None);
        assert_eq!(array_element("[LPoint"), None);
        assert_eq!(array_element("Point"), None);
    }

    #[test]
    fn test_resolves_known_type() {
        let reg = registry();
        let fields = vec![
            FieldDesc::primitive("x", TypeCode::Int),
            FieldDesc::primitive("y", TypeCode::Int),
        ];
        let desc = ClassDesc::resolve(raw("Point", 7, SC_SERIALIZABLE, fields), None, &reg);
        assert!(desc.fault().is_none());
        assert_eq!(desc.local().unwrap().name(), "Point");
        assert_eq!(desc.binding(1), Some(1));
        assert_eq!(desc.layout().prim_data_size(), 8);
    }

    #[test]
    fn test_unknown_type_is_fault() {
        let desc = ClassDesc::resolve(raw("Gone", 1, SC_SERIALIZABLE, vec![]), None, &registry());
        assert_eq!(desc.fault().map(|f| &**f), Some(&Fault::TypeNotFound("Gone".into())));
        assert!(desc.local().is_none());
    }

    #[test]
    fn test_uid_mismatch_is_fault() {
        let desc = ClassDesc::resolve(raw("Point", 8, SC_SERIALIZABLE, vec![]), None, &registry());
        assert!(desc
            .fault()
            .unwrap()
            .to_string()
            .contains("serialVersionUID = 8"));
    }

    #[test]
    fn test_conflicting_flags_is_fault() {
        let flags = SC_SERIALIZABLE | SC_EXTERNALIZABLE;
        let desc = ClassDesc::resolve(raw("Point", 7, flags, vec![]), None, &registry());
        assert!(desc.fault().is_some());
    }

    #[test]
    fn test_enum_binding_rules() {
        let reg = registry();
        let ok = ClassDesc::resolve(raw("Color", 0, SC_SERIALIZABLE | SC_ENUM, vec![]), None, &reg);
        assert!(ok.fault().is_none());
        let not_enum = ClassDesc::resolve(raw("Color", 0, SC_SERIALIZABLE, vec![]), None, &reg);
        assert!(not_enum.fault().is_some());
        let bad_uid = ClassDesc::resolve(raw("Color", 3, SC_SERIALIZABLE | SC_ENUM, vec![]), None, &reg);
        assert!(bad_uid.fault().is_some());
        let base = ClassDesc::resolve(raw(ENUM_TYPE, 0, SC_SERIALIZABLE | SC_ENUM, vec![]), None, &reg);
        assert!(base.fault().is_none());
    }

    #[test]
    fn test_kind_checks_cover_every_local_kind() {
        let reg = registry();
        let enum_on_class = ClassDesc::resolve(raw("Point", 0, SC_SERIALIZABLE | SC_ENUM, vec![]), None, &reg);
        assert!(enum_on_class.fault().unwrap().to_string().contains("enum descriptor"));
        let enum_base_as_class = ClassDesc::resolve(raw(ENUM_TYPE, 0, SC_SERIALIZABLE, vec![]), None, &reg);
        assert!(enum_base_as_class.fault().is_some());
        let string = ClassDesc::resolve(raw(STRING_TYPE, 0, SC_SERIALIZABLE, vec![]), None, &reg);
        assert!(string.fault().is_none());
        let ext = ClassDesc::resolve(raw("Color", 0, SC_EXTERNALIZABLE | SC_ENUM, vec![]), None, &reg);
        assert!(ext.fault().is_none());
    }

    #[test]
    fn test_super_fault_is_inherited() {
        let reg = registry();
        let parent = Arc::new(ClassDesc::resolve(raw("Gone", 1, SC_SERIALIZABLE, vec![]), None, &reg));
        let child = ClassDesc::resolve(raw("Point", 7, SC_SERIALIZABLE, vec![]), Some(parent.clone()), &reg);
        assert!(Arc::ptr_eq(child.fault().unwrap(), parent.fault().unwrap()));
    }

    #[test]
    fn test_circular_names_are_fault() {
        let reg = registry();
        let parent = Arc::new(ClassDesc::resolve(raw("Point", 7, SC_SERIALIZABLE, vec![]), None, &reg));
        let child = ClassDesc::resolve(raw("Point", 7, SC_SERIALIZABLE, vec![]), Some(parent), &reg);
        assert!(child.fault().unwrap().to_string().contains("circular"));
    }

    #[test]
    fn test_arrays_resolve_by_component() {
        let reg = registry();
        let ints = ClassDesc::resolve(raw("[I", 0, SC_SERIALIZABLE, vec![]), None, &reg);
        assert!(ints.fault().is_none());
        assert_eq!(ints.element_type(), Some(TypeCode::Int));
        let points = ClassDesc::resolve(raw("[LPoint;", 0, SC_SERIALIZABLE, vec![]), None, &reg);
        assert!(points.fault().is_none());
        let gone = ClassDesc::resolve(raw("[[LGone;", 0, SC_SERIALIZABLE, vec![]), None, &reg);
        assert_eq!(gone.fault().map(|f| &**f), Some(&Fault::TypeNotFound("Gone".into())));
    }

    #[test]
    fn test_data_slots_fill_missing_layers() {
        let reg = registry();
        // stream knows Leaf -> Base; Mid is local-only
        let base = Arc::new(ClassDesc::resolve(
            raw("Base", 0, SC_SERIALIZABLE, vec![FieldDesc::primitive("id", TypeCode::Long)]),
            None,
            &reg,
        ));
        let leaf = Arc::new(ClassDesc::resolve(
            raw("Leaf", 0, SC_SERIALIZABLE, vec![FieldDesc::primitive("l", TypeCode::Int)]),
            Some(base),
            &reg,
        ));
        let slots = data_slots(&leaf, &reg);
        let names: Vec<_> = slots
            .iter()
            .map(|s| (s.local.as_ref().map(|l| l.name().to_owned()), s.desc.is_some()))
            .collect();
        assert_eq!(
            names,
            vec![
                (Some("Base".into()), true),
                (Some("Mid".into()), false),
                (Some("Leaf".into()), true),
            ]
        );
    }

    #[test]
    fn test_data_slots_for_unknown_stream_layer() {
        let reg = registry();
        let gone = Arc::new(ClassDesc::resolve(raw("Gone", 0, SC_SERIALIZABLE, vec![]), None, &reg));
        let slots = data_slots(&gone, &reg);
        assert_eq!(slots.len(), 1);
        assert!(slots[0].desc.is_some());
        assert!(slots[0].local.is_none());
    }
}
