//! Mutation accessors.
//!
//! Writes go through short-lived handles obtained from [`Holder::modify`].
//! A handle carries the dirty path from its target up to the root: every
//! ancestor mask bit, block bit and dynamic element bit that a successful
//! write must mark. Descending into a field consumes the handle and extends
//! the path; [`HolderMut::reborrow`] keeps the parent usable.
//!
//! Writes that leave a value unchanged mark nothing.

use schema::{ArrayBits, FieldKey, FieldKind, HolderSchema, ValueType};

use crate::dynamic::DynamicField;
use crate::holder::{Element, Holder, Slot};
use crate::mask::{ChangeMask, ElementMask};
use crate::optional::OptionalField;
use crate::value::FieldValue;

enum PathMark<'a> {
    Field {
        mask: &'a mut ChangeMask,
        bit: u32,
        block_bit: Option<u32>,
    },
    Element {
        mask: &'a mut ElementMask,
        index: usize,
    },
}

impl PathMark<'_> {
    fn mark(&mut self) {
        match self {
            Self::Field {
                mask,
                bit,
                block_bit,
            } => {
                mask.set(*bit);
                if let Some(block) = block_bit {
                    mask.set_block(*block);
                }
            }
            Self::Element { mask, index } => mask.set(*index),
        }
    }

    fn reborrow(&mut self) -> PathMark<'_> {
        match self {
            Self::Field {
                mask,
                bit,
                block_bit,
            } => PathMark::Field {
                mask: &mut **mask,
                bit: *bit,
                block_bit: *block_bit,
            },
            Self::Element { mask, index } => PathMark::Element {
                mask: &mut **mask,
                index: *index,
            },
        }
    }
}

/// Ancestor marks for the current handle, root first.
#[derive(Default)]
pub(crate) struct DirtyPath<'a> {
    marks: Vec<PathMark<'a>>,
}

impl<'a> DirtyPath<'a> {
    fn push_field(&mut self, mask: &'a mut ChangeMask, bit: u32, block_bit: Option<u32>) {
        self.marks.push(PathMark::Field {
            mask,
            bit,
            block_bit,
        });
    }

    fn push_element(&mut self, mask: &'a mut ElementMask, index: usize) {
        self.marks.push(PathMark::Element { mask, index });
    }

    fn mark(&mut self) {
        for mark in &mut self.marks {
            mark.mark();
        }
    }

    fn reborrow(&mut self) -> DirtyPath<'_> {
        DirtyPath {
            marks: self.marks.iter_mut().map(PathMark::reborrow).collect(),
        }
    }
}

/// Mutable handle to a holder at some depth.
pub struct HolderMut<'a> {
    schema: &'a HolderSchema,
    mask: &'a mut ChangeMask,
    slots: &'a mut [Slot],
    path: DirtyPath<'a>,
}

impl<'a> HolderMut<'a> {
    pub(crate) fn new(holder: &'a mut Holder) -> Self {
        Self::with_path(holder, DirtyPath::default())
    }

    fn with_path(holder: &'a mut Holder, path: DirtyPath<'a>) -> Self {
        let (schema, mask, slots) = holder.parts_mut();
        Self {
            schema,
            mask,
            slots,
            path,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &HolderSchema {
        self.schema
    }

    /// Number of ancestors this handle marks on a write.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.marks.len()
    }

    /// Returns a shorter-lived handle to the same holder.
    pub fn reborrow(&mut self) -> HolderMut<'_> {
        HolderMut {
            schema: self.schema,
            mask: &mut *self.mask,
            slots: &mut *self.slots,
            path: self.path.reborrow(),
        }
    }

    /// Reads a scalar field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        match self.slots.get(self.schema.key(name)?.index())? {
            Slot::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Sets a scalar field, returning `true` if the value changed.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> bool {
        self.reborrow()
            .scalar(name)
            .is_some_and(|mut scalar| scalar.set(value))
    }

    /// Sets one slot of a fixed array, returning `true` if it changed.
    pub fn set_at(&mut self, name: &str, index: usize, value: impl Into<FieldValue>) -> bool {
        self.reborrow()
            .array(name)
            .is_some_and(|mut array| array.set(index, value))
    }

    /// Descends into a field by name.
    pub fn field(self, name: &str) -> Option<FieldMut<'a>> {
        let key = self.schema.key(name);
        debug_assert!(
            key.is_some(),
            "no field '{name}' in '{}'",
            self.schema.name()
        );
        self.field_by_key(key?)
    }

    /// Descends into a field by key.
    pub fn field_by_key(self, key: FieldKey) -> Option<FieldMut<'a>> {
        let Self {
            schema,
            mask,
            slots,
            mut path,
        } = self;
        let field = schema.field(key)?;
        let handle = match slots.get_mut(key.index())? {
            Slot::Array(values) => {
                let FieldKind::Array { bits, .. } = &field.kind else {
                    return None;
                };
                FieldMut::Array(ArrayMut {
                    values,
                    mask,
                    bit: field.bit,
                    block_bit: field.block_bit,
                    per_slot: *bits == ArrayBits::PerSlot,
                    path,
                })
            }
            Slot::Value(value) => {
                path.push_field(mask, field.bit, field.block_bit);
                FieldMut::Scalar(ScalarMut { value, path })
            }
            Slot::Struct(holder) => {
                path.push_field(mask, field.bit, field.block_bit);
                FieldMut::Nested(HolderMut::with_path(holder, path))
            }
            Slot::Dynamic(dynamic) => {
                let FieldKind::Dynamic { element, .. } = &field.kind else {
                    return None;
                };
                path.push_field(mask, field.bit, field.block_bit);
                FieldMut::Dynamic(DynamicMut {
                    field: dynamic,
                    element,
                    path,
                })
            }
            Slot::Optional(optional) => {
                let FieldKind::Optional { value, .. } = &field.kind else {
                    return None;
                };
                path.push_field(mask, field.bit, field.block_bit);
                FieldMut::Optional(OptionalMut {
                    field: optional,
                    value,
                    path,
                })
            }
        };
        Some(handle)
    }

    pub fn scalar(self, name: &str) -> Option<ScalarMut<'a>> {
        self.field(name)?.into_scalar()
    }

    pub fn nested(self, name: &str) -> Option<HolderMut<'a>> {
        self.field(name)?.into_nested()
    }

    pub fn array(self, name: &str) -> Option<ArrayMut<'a>> {
        self.field(name)?.into_array()
    }

    pub fn dynamic(self, name: &str) -> Option<DynamicMut<'a>> {
        self.field(name)?.into_dynamic()
    }

    pub fn optional(self, name: &str) -> Option<OptionalMut<'a>> {
        self.field(name)?.into_optional()
    }
}

/// Mutable handle to one field.
pub enum FieldMut<'a> {
    Scalar(ScalarMut<'a>),
    Array(ArrayMut<'a>),
    Dynamic(DynamicMut<'a>),
    Optional(OptionalMut<'a>),
    Nested(HolderMut<'a>),
}

impl<'a> FieldMut<'a> {
    pub fn into_scalar(self) -> Option<ScalarMut<'a>> {
        match self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn into_nested(self) -> Option<HolderMut<'a>> {
        match self {
            Self::Nested(holder) => Some(holder),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<ArrayMut<'a>> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn into_dynamic(self) -> Option<DynamicMut<'a>> {
        match self {
            Self::Dynamic(dynamic) => Some(dynamic),
            _ => None,
        }
    }

    pub fn into_optional(self) -> Option<OptionalMut<'a>> {
        match self {
            Self::Optional(optional) => Some(optional),
            _ => None,
        }
    }
}

fn same_kind(current: &FieldValue, value: &FieldValue) -> bool {
    std::mem::discriminant(current) == std::mem::discriminant(value)
}

/// Handle to a scalar field or scalar element.
pub struct ScalarMut<'a> {
    value: &'a mut FieldValue,
    path: DirtyPath<'a>,
}

impl ScalarMut<'_> {
    #[must_use]
    pub fn get(&self) -> &FieldValue {
        self.value
    }

    /// Stores `value`; marks the path only if it differs.
    pub fn set(&mut self, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        debug_assert!(
            same_kind(self.value, &value),
            "cannot store {} into a {} slot",
            value.kind_name(),
            self.value.kind_name()
        );
        if *self.value == value {
            return false;
        }
        *self.value = value;
        self.path.mark();
        true
    }
}

/// Handle to a fixed-size array.
pub struct ArrayMut<'a> {
    values: &'a mut [FieldValue],
    mask: &'a mut ChangeMask,
    bit: u32,
    block_bit: Option<u32>,
    per_slot: bool,
    path: DirtyPath<'a>,
}

impl ArrayMut<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    /// Stores one slot. Marks the shared bit, or the slot's own bit when the
    /// array tracks slots individually.
    pub fn set(&mut self, index: usize, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        debug_assert!(index < self.values.len(), "array slot {index} out of range");
        let Some(slot) = self.values.get_mut(index) else {
            return false;
        };
        debug_assert!(same_kind(slot, &value), "array slot kind mismatch");
        if *slot == value {
            return false;
        }
        *slot = value;
        let bit = if self.per_slot {
            self.bit + index as u32
        } else {
            self.bit
        };
        self.mask.set(bit);
        if let Some(block) = self.block_bit {
            self.mask.set_block(block);
        }
        self.path.mark();
        true
    }
}

/// Handle to a dynamic collection.
pub struct DynamicMut<'a> {
    field: &'a mut DynamicField,
    element: &'a ValueType,
    path: DirtyPath<'a>,
}

impl<'a> DynamicMut<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.field.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.field.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Element> {
        self.field.get(index)
    }

    fn accepts(&self, value: &FieldValue) -> bool {
        matches!(self.element, ValueType::Scalar(codec) if value.matches(*codec))
    }

    /// Appends a scalar element.
    pub fn push(&mut self, value: impl Into<FieldValue>) {
        let value = value.into();
        debug_assert!(self.accepts(&value), "element kind mismatch");
        self.field.push(Element::Value(value));
        self.path.mark();
    }

    /// Appends a struct element; the whole element is marked.
    pub fn push_holder(&mut self, mut holder: Holder) {
        debug_assert!(
            self.element
                .as_struct()
                .is_some_and(|schema| schema.hash() == holder.schema().hash()),
            "element schema mismatch"
        );
        holder.mark_all();
        self.field.push(Element::Struct(holder));
        self.path.mark();
    }

    /// Appends a default element and returns its index.
    pub fn push_default(&mut self) -> usize {
        let mut element = Element::new(self.element);
        element.mark_all();
        self.field.push(element);
        self.path.mark();
        self.field.len() - 1
    }

    /// Inserts a scalar element; `index > len` is a no-op.
    pub fn insert(&mut self, index: usize, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        debug_assert!(self.accepts(&value), "element kind mismatch");
        if !self.field.insert(index, Element::Value(value)) {
            return false;
        }
        self.path.mark();
        true
    }

    /// Removes the element at `index`, shifting later elements down.
    pub fn remove(&mut self, index: usize) -> Option<Element> {
        let removed = self.field.remove(index)?;
        self.path.mark();
        Some(removed)
    }

    pub fn clear(&mut self) {
        if self.field.clear() {
            self.path.mark();
        }
    }

    /// Replaces a scalar element in place.
    pub fn set(&mut self, index: usize, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        match self.field.elements_mut().get_mut(index) {
            Some(Element::Value(current)) if *current != value => {
                debug_assert!(same_kind(current, &value), "element kind mismatch");
                *current = value;
            }
            _ => return false,
        }
        self.field.mark_changed(index);
        self.path.mark();
        true
    }

    /// Descends into a struct element.
    pub fn element(self, index: usize) -> Option<HolderMut<'a>> {
        let DynamicMut {
            field, mut path, ..
        } = self;
        let (elements, changed, _) = field.parts_mut();
        let Element::Struct(holder) = elements.get_mut(index)? else {
            return None;
        };
        path.push_element(changed, index);
        Some(HolderMut::with_path(holder, path))
    }
}

/// Handle to an optional field's present value.
pub enum ElementMut<'a> {
    Value(ScalarMut<'a>),
    Struct(HolderMut<'a>),
}

/// Handle to an optional field.
pub struct OptionalMut<'a> {
    field: &'a mut OptionalField,
    value: &'a ValueType,
    path: DirtyPath<'a>,
}

impl<'a> OptionalMut<'a> {
    #[must_use]
    pub fn is_some(&self) -> bool {
        self.field.is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&Element> {
        self.field.get()
    }

    /// Stores a scalar value, constructing it if absent.
    pub fn set(&mut self, value: impl Into<FieldValue>) -> bool {
        let value = value.into();
        debug_assert!(
            matches!(self.value, ValueType::Scalar(codec) if value.matches(*codec)),
            "optional kind mismatch"
        );
        match self.field.get_mut() {
            Some(Element::Value(current)) => {
                if *current == value {
                    return false;
                }
                *current = value;
            }
            Some(Element::Struct(_)) => return false,
            None => {
                self.field.insert(Element::Value(value));
            }
        }
        self.path.mark();
        true
    }

    /// Returns the value, constructing a default (fully marked) if absent.
    pub fn get_or_insert(self) -> ElementMut<'a> {
        let OptionalMut {
            field,
            value: ty,
            mut path,
        } = self;
        if field.is_none() {
            path.mark();
        }
        let element = field.get_or_insert_with(|| {
            let mut element = Element::new(ty);
            element.mark_all();
            element
        });
        match element {
            Element::Value(value) => ElementMut::Value(ScalarMut { value, path }),
            Element::Struct(holder) => ElementMut::Struct(HolderMut::with_path(holder, path)),
        }
    }

    /// Descends into a struct value, constructing it if absent.
    pub fn holder_mut(self) -> Option<HolderMut<'a>> {
        if !self.value.is_struct() {
            return None;
        }
        match self.get_or_insert() {
            ElementMut::Struct(holder) => Some(holder),
            ElementMut::Value(_) => None,
        }
    }

    /// Removes the value; a no-op when already absent.
    pub fn remove(&mut self) -> bool {
        if self.field.take().is_none() {
            return false;
        }
        self.path.mark();
        true
    }
}
