//! Local type registry.
//!
//! The embedding application describes the types it is willing to
//! materialize: their fields, version UID, supertype, and optional decode
//! hooks. Descriptors read from a stream are resolved against this registry by
//! exact name (or, for proxies, by interface list).
//!
//! ```
//! use objstream::{LocalClass, TypeCode, TypeRegistry};
//!
//! let registry = TypeRegistry::new().with(
//!     LocalClass::serializable("Point")
//!         .field("x", TypeCode::Int)
//!         .field("y", TypeCode::Int),
//! );
//! assert!(registry.get("Point").is_some());
//! assert!(registry.get("java.lang.String").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::constants::*;
use crate::decoder::ObjectInput;
use crate::descriptor::{FieldDesc, TypeCode};
use crate::error::Result;
use crate::value::{Heap, ObjRef, Value};

/// Custom decode of one type's layer, or of a whole externalizable instance.
pub type ReadObjectHook = Arc<dyn Fn(&mut dyn ObjectInput, ObjRef) -> Result<()> + Send + Sync>;
/// Called for a local layer the stream carries no data for.
pub type NoDataHook = Arc<dyn Fn(&mut Heap, ObjRef) -> Result<()> + Send + Sync>;
/// Replaces a fully decoded instance with another value.
pub type ReadResolveHook = Arc<dyn Fn(&mut Heap, ObjRef) -> Result<Value> + Send + Sync>;

/// How instances of a local type are materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassKind {
    /// Field-by-field decoding, optionally customized per layer.
    Serializable,
    /// The type decodes its whole state in its `read_external` hook.
    Externalizable,
    Enum { constants: Vec<String> },
    /// A non-serializable supertype.
    Plain,
    /// Built-in types the stream encodes with dedicated records.
    Special,
}

#[derive(Clone, Default)]
struct Hooks {
    read_object: Option<ReadObjectHook>,
    read_external: Option<ReadObjectHook>,
    read_object_no_data: Option<NoDataHook>,
    read_resolve: Option<ReadResolveHook>,
}

/// A locally known type.
#[derive(Clone)]
pub struct LocalClass {
    name: String,
    uid: Option<i64>,
    kind: ClassKind,
    super_name: Option<String>,
    fields: Vec<FieldDesc>,
    constructible: bool,
    hooks: Hooks,
}

impl fmt::Debug for LocalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClass")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("super_name", &self.super_name)
            .field("fields", &self.fields)
            .field("constructible", &self.constructible)
            .finish_non_exhaustive()
    }
}

impl LocalClass {
    fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            uid: None,
            kind,
            super_name: None,
            fields: Vec::new(),
            constructible: true,
            hooks: Hooks::default(),
        }
    }

    pub fn serializable(name: impl Into<String>) -> Self {
        Self::new(name, ClassKind::Serializable)
    }

    pub fn externalizable<F>(name: impl Into<String>, read_external: F) -> Self
    where
        F: Fn(&mut dyn ObjectInput, ObjRef) -> Result<()> + Send + Sync + 'static,
    {
        let mut class = Self::new(name, ClassKind::Externalizable);
        class.hooks.read_external = Some(Arc::new(read_external));
        class
    }

    pub fn enumeration<I, S>(name: impl Into<String>, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let constants = constants.into_iter().map(Into::into).collect();
        Self::new(name, ClassKind::Enum { constants }).extends(ENUM_TYPE)
    }

    /// A non-serializable supertype. Only its constructor matters.
    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, ClassKind::Plain)
    }

    pub(crate) fn special(name: &str) -> Self {
        Self::new(name, ClassKind::Special)
    }

    /// Pins the version UID; streams carrying another UID fail to resolve.
    pub fn uid(mut self, uid: i64) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    /// Declares a field. Reference codes get a `java.lang.Object` signature.
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

    /// Instances cannot be created; decoding one yields a fault.
    pub fn without_constructor(mut self) -> Self {
        self.constructible = false;
        self
    }

    pub fn on_read_object<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut dyn ObjectInput, ObjRef) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.read_object = Some(Arc::new(hook));
        self
    }

    pub fn on_read_object_no_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Heap, ObjRef) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.read_object_no_data = Some(Arc::new(hook));
        self
    }

    pub fn on_read_resolve<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Heap, ObjRef) -> Result<Value> + Send + Sync + 'static,
    {
        self.hooks.read_resolve = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version_uid(&self) -> Option<i64> {
        self.uid
    }

    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    pub fn super_name(&self) -> Option<&str> {
        self.super_name.as_deref()
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn constants(&self) -> &[String] {
        match &self.kind {
            ClassKind::Enum { constants } => constants,
            _ => &[],
        }
    }

    pub fn is_constructible(&self) -> bool {
        self.constructible
    }

    pub(crate) fn read_object_hook(&self) -> Option<ReadObjectHook> {
        self.hooks.read_object.clone()
    }

    pub(crate) fn read_external_hook(&self) -> Option<ReadObjectHook> {
        self.hooks.read_external.clone()
    }

    pub(crate) fn no_data_hook(&self) -> Option<NoDataHook> {
        self.hooks.read_object_no_data.clone()
    }

    pub(crate) fn read_resolve_hook(&self) -> Option<ReadResolveHook> {
        self.hooks.read_resolve.clone()
    }
}

#[derive(Debug)]
struct Layer {
    class: Arc<LocalClass>,
    offset: usize,
}

/// Slot assignment for instances of one local type: every serializable
/// layer's fields, root type first.
#[derive(Debug)]
pub struct InstanceLayout {
    layers: Vec<Layer>,
    len: usize,
}

impl InstanceLayout {
    fn build(chain: impl IntoIterator<Item = Arc<LocalClass>>) -> Self {
        let mut layers = Vec::new();
        let mut len = 0;
        for class in chain {
            let n = class.fields.len();
            layers.push(Layer { class, offset: len });
            len += n;
        }
        Self { layers, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Local types covered, root first.
    pub fn layers(&self) -> impl Iterator<Item = &Arc<LocalClass>> {
        self.layers.iter().map(|l| &l.class)
    }

    /// Slot of the first field declared by `class`.
    pub fn offset_of(&self, class: &str) -> Option<usize> {
        self.layers
            .iter()
            .find(|l| l.class.name == class)
            .map(|l| l.offset)
    }

    pub fn slot(&self, class: &str, field: &str) -> Option<usize> {
        let layer = self.layers.iter().find(|l| l.class.name == class)?;
        let i = layer.class.fields.iter().position(|f| f.name() == field)?;
        Some(layer.offset + i)
    }

    /// Slot of `field`, searching from the most-derived layer up.
    pub fn find(&self, field: &str) -> Option<usize> {
        self.layers.iter().rev().find_map(|l| {
            l.class
                .fields
                .iter()
                .position(|f| f.name() == field)
                .map(|i| l.offset + i)
        })
    }

    /// `(field name, slot)` pairs in slot order.
    pub fn field_names(&self) -> impl Iterator<Item = (&str, usize)> {
        self.layers.iter().flat_map(|l| {
            l.class
                .fields
                .iter()
                .enumerate()
                .map(move |(i, f)| (f.name(), l.offset + i))
        })
    }

    pub(crate) fn defaults(&self) -> Vec<Value> {
        self.layers
            .iter()
            .flat_map(|l| l.class.fields.iter().map(|f| f.type_code().default_value()))
            .collect()
    }
}

/// Types known to the decoding application.
///
/// Build it with [`register`](Self::register) or [`with`](Self::with), then
/// share it behind an `Arc` between decoders. Instance layouts are computed
/// lazily and cached.
pub struct TypeRegistry {
    classes: IndexMap<String, Arc<LocalClass>>,
    proxies: IndexMap<Vec<String>, Arc<LocalClass>>,
    layouts: RwLock<HashMap<String, Arc<InstanceLayout>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("proxies", &self.proxies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    /// A registry holding only the built-in special types.
    pub fn new() -> Self {
        let mut registry = Self {
            classes: IndexMap::new(),
            proxies: IndexMap::new(),
            layouts: RwLock::new(HashMap::new()),
        };
        for name in [OBJECT_TYPE, STRING_TYPE, CLASS_TYPE, DESCRIPTOR_TYPE, ENUM_TYPE] {
            registry.register(LocalClass::special(name));
        }
        registry
    }

    /// Adds or replaces a type.
    pub fn register(&mut self, class: LocalClass) -> Arc<LocalClass> {
        let class = Arc::new(class);
        self.classes.insert(class.name.clone(), class.clone());
        self.clear_layouts();
        class
    }

    pub fn with(mut self, class: LocalClass) -> Self {
        self.register(class);
        self
    }

    /// Adds a proxy type, matched by its exact interface list.
    pub fn register_proxy<I, S>(&mut self, interfaces: I, class: LocalClass) -> Arc<LocalClass>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = interfaces.into_iter().map(Into::into).collect();
        let class = Arc::new(class);
        self.proxies.insert(key, class.clone());
        self.clear_layouts();
        class
    }

    fn clear_layouts(&mut self) {
        if let Ok(cache) = self.layouts.get_mut() {
            cache.clear();
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<LocalClass>> {
        self.classes.get(name)
    }

    pub fn proxy(&self, interfaces: &[String]) -> Option<&Arc<LocalClass>> {
        self.proxies.get(interfaces)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Serializable types from `class` up its supertypes, most-derived first.
    /// Stops at the first non-serializable or unregistered supertype.
    pub fn serializable_chain(&self, class: &Arc<LocalClass>) -> Vec<Arc<LocalClass>> {
        let mut chain: Vec<Arc<LocalClass>> = Vec::new();
        let mut cursor = Some(class.clone());
        while let Some(c) = cursor {
            if c.kind != ClassKind::Serializable || chain.iter().any(|x| x.name == c.name) {
                break;
            }
            cursor = c.super_name().and_then(|n| self.get(n)).cloned();
            chain.push(c);
        }
        chain
    }

    /// First supertype that is not serializable, if registered.
    fn first_plain_super(&self, class: &LocalClass) -> Option<&Arc<LocalClass>> {
        let mut seen = 0;
        let mut cursor = class.super_name().and_then(|n| self.get(n));
        while let Some(c) = cursor {
            if c.kind != ClassKind::Serializable || seen > self.classes.len() {
                return Some(c);
            }
            seen += 1;
            cursor = c.super_name().and_then(|n| self.get(n));
        }
        None
    }

    /// Whether a blank instance of `class` can be created.
    pub fn is_instantiable(&self, class: &LocalClass) -> bool {
        if !class.constructible {
            return false;
        }
        match class.kind {
            ClassKind::Serializable => self
                .first_plain_super(class)
                .map_or(true, |c| c.constructible),
            ClassKind::Externalizable => true,
            _ => false,
        }
    }

    /// Slot layout of `class` instances.
    pub fn instance_layout(&self, class: &Arc<LocalClass>) -> Arc<InstanceLayout> {
        if let Ok(cache) = self.layouts.read() {
            if let Some(layout) = cache.get(&class.name) {
                return layout.clone();
            }
        }
        let layout = Arc::new(match class.kind {
            ClassKind::Serializable => {
                let mut chain = self.serializable_chain(class);
                chain.reverse();
                InstanceLayout::build(chain)
            }
            _ => InstanceLayout::build([class.clone()]),
        });
        if let Ok(mut cache) = self.layouts.write() {
            cache.insert(class.name.clone(), layout.clone());
        }
        layout
    }
}
