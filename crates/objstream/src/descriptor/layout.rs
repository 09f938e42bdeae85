//! Field layout and field matching.

use crate::error::Fault;
use crate::registry::LocalClass;

use super::FieldDesc;

/// Where a field's value lives while an instance is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOffset {
    /// Byte offset into the primitive scratch buffer.
    Prim(usize),
    /// Index into the reference value list.
    Obj(usize),
}

/// Offsets of a field list, in stream order.
///
/// Primitive data is one packed run of `prim_data_size` bytes followed by one
/// record per reference field, regardless of how the two kinds interleave in
/// the list. A list where a primitive follows a reference is still framed
/// this way but reports [`FieldLayout::violation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldLayout {
    offsets: Vec<FieldOffset>,
    prim_data_size: usize,
    num_obj_fields: usize,
    violation: Option<usize>,
}

impl FieldLayout {
    pub fn compute(fields: &[FieldDesc]) -> Self {
        let mut layout = FieldLayout::default();
        for (i, field) in fields.iter().enumerate() {
            let code = field.type_code();
            if code.is_primitive() {
                if layout.num_obj_fields > 0 && layout.violation.is_none() {
                    layout.violation = Some(i);
                }
                layout
                    .offsets
                    .push(FieldOffset::Prim(layout.prim_data_size));
                layout.prim_data_size += code.size();
            } else {
                layout.offsets.push(FieldOffset::Obj(layout.num_obj_fields));
                layout.num_obj_fields += 1;
            }
        }
        layout
    }

    pub fn offset(&self, field: usize) -> Option<FieldOffset> {
        self.offsets.get(field).copied()
    }

    pub fn prim_data_size(&self) -> usize {
        self.prim_data_size
    }

    pub fn num_obj_fields(&self) -> usize {
        self.num_obj_fields
    }

    /// Index of the first primitive field listed after a reference field.
    pub fn violation(&self) -> Option<usize> {
        self.violation
    }
}

/// Binds each stream field to the index of the same-named local field.
///
/// Fields missing locally bind to `None` and are decoded then discarded.
/// A same-named pair where either side is primitive must agree on the type
/// code exactly.
pub fn match_fields(stream: &[FieldDesc], local: &LocalClass) -> Result<Vec<Option<usize>>, Fault> {
    let mut bindings = Vec::with_capacity(stream.len());
    for field in stream {
        let found = local
            .fields()
            .iter()
            .position(|lf| lf.name() == field.name());
        if let Some(j) = found {
            let lf = &local.fields()[j];
            let (a, b) = (field.type_code(), lf.type_code());
            if (a.is_primitive() || b.is_primitive()) && a != b {
                return Err(Fault::invalid(
                    local.name(),
                    format!("incompatible types for field {}", field.name()),
                ));
            }
        }
        bindings.push(found);
    }
    Ok(bindings)
}
