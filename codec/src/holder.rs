//! Holders: field storage plus a change mask, shaped by a [`HolderSchema`].

use std::sync::Arc;

use schema::{FieldDef, FieldKey, FieldKind, HolderSchema, ValueType};

use crate::accessor::{FieldMut, HolderMut};
use crate::dynamic::DynamicField;
use crate::error::{CodecError, ValueReason};
use crate::mask::{ChangeMask, SetBits};
use crate::optional::OptionalField;
use crate::value::FieldValue;

/// Storage for one field.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Value(FieldValue),
    Struct(Holder),
    Array(Vec<FieldValue>),
    Dynamic(DynamicField),
    Optional(OptionalField),
}

impl Slot {
    fn new(field: &FieldDef) -> Self {
        match &field.kind {
            FieldKind::Scalar(ValueType::Scalar(codec)) => {
                Self::Value(FieldValue::default_for(*codec))
            }
            FieldKind::Scalar(ValueType::Struct(schema)) => {
                Self::Struct(Holder::new(Arc::clone(schema)))
            }
            FieldKind::Array { element, len, .. } => {
                Self::Array(vec![FieldValue::default_for(*element); usize::from(*len)])
            }
            FieldKind::Dynamic { .. } => Self::Dynamic(DynamicField::new()),
            FieldKind::Optional { storage, .. } => Self::Optional(OptionalField::new(*storage)),
        }
    }

    const fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
            Self::Dynamic(_) => "dynamic",
            Self::Optional(_) => "optional",
        }
    }

    fn clear_changes(&mut self) {
        match self {
            Self::Struct(holder) => holder.clear_changes(),
            Self::Dynamic(dynamic) => dynamic.clear_changes(),
            Self::Optional(optional) => optional.clear_changes(),
            Self::Value(_) | Self::Array(_) => {}
        }
    }

    fn mark_all(&mut self) {
        match self {
            Self::Struct(holder) => holder.mark_all(),
            Self::Dynamic(dynamic) => dynamic.mark_all(),
            Self::Optional(optional) => optional.mark_all(),
            Self::Value(_) | Self::Array(_) => {}
        }
    }
}

pub(crate) fn slot_mismatch(field: &FieldDef, slot: &Slot) -> CodecError {
    let expected = match &field.kind {
        FieldKind::Scalar(ValueType::Scalar(_)) => "value",
        FieldKind::Scalar(ValueType::Struct(_)) => "struct",
        FieldKind::Array { .. } => "array",
        FieldKind::Dynamic { .. } => "dynamic",
        FieldKind::Optional { .. } => "optional",
    };
    CodecError::InvalidValue {
        field: field.name.clone(),
        reason: ValueReason::TypeMismatch {
            expected,
            found: slot.kind_name(),
        },
    }
}

pub(crate) fn element_mismatch(field: &FieldDef, element: &Element) -> CodecError {
    let (expected, found) = match element {
        Element::Value(_) => ("struct", "value"),
        Element::Struct(_) => ("value", "struct"),
    };
    CodecError::InvalidValue {
        field: field.name.clone(),
        reason: ValueReason::TypeMismatch { expected, found },
    }
}

/// An element of a dynamic collection or the value of an optional field.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Value(FieldValue),
    Struct(Holder),
}

impl Element {
    /// Creates the default element for `ty`.
    #[must_use]
    pub fn new(ty: &ValueType) -> Self {
        match ty {
            ValueType::Scalar(codec) => Self::Value(FieldValue::default_for(*codec)),
            ValueType::Struct(schema) => Self::Struct(Holder::new(Arc::clone(schema))),
        }
    }

    #[must_use]
    pub const fn as_value(&self) -> Option<&FieldValue> {
        match self {
            Self::Value(value) => Some(value),
            Self::Struct(_) => None,
        }
    }

    #[must_use]
    pub const fn as_holder(&self) -> Option<&Holder> {
        match self {
            Self::Struct(holder) => Some(holder),
            Self::Value(_) => None,
        }
    }

    pub(crate) fn clear_changes(&mut self) {
        if let Self::Struct(holder) = self {
            holder.clear_changes();
        }
    }

    pub(crate) fn mark_all(&mut self) {
        if let Self::Struct(holder) = self {
            holder.mark_all();
        }
    }
}

/// Read-only view of one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRef<'a> {
    Value(&'a FieldValue),
    Struct(&'a Holder),
    Array(&'a [FieldValue]),
    Dynamic(&'a DynamicField),
    Optional(&'a OptionalField),
}

/// A schema-shaped aggregate of field slots plus one change mask.
///
/// Created with every field at its default and an empty mask. All writes go
/// through [`Holder::modify`], which marks the mask; the replication pass
/// clears it once per tick with [`Holder::clear_changes`].
///
/// Equality compares values only; change state is ignored.
#[derive(Debug, Clone)]
pub struct Holder {
    schema: Arc<HolderSchema>,
    mask: ChangeMask,
    slots: Vec<Slot>,
}

impl Holder {
    /// Creates a holder with default values and an empty mask.
    #[must_use]
    pub fn new(schema: Arc<HolderSchema>) -> Self {
        let slots = schema.fields().iter().map(Slot::new).collect();
        Self {
            mask: ChangeMask::new(schema.bit_count()),
            slots,
            schema,
        }
    }

    /// Returns the holder's schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<HolderSchema> {
        &self.schema
    }

    /// Returns the change mask.
    #[must_use]
    pub fn mask(&self) -> &ChangeMask {
        &self.mask
    }

    /// Returns `true` if anything changed since the last clear.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.mask.is_empty()
    }

    /// Iterates changed bits in ascending order.
    #[must_use]
    pub fn changes(&self) -> SetBits<'_> {
        self.mask.iter()
    }

    /// Clears this mask and every nested mask, element mask and
    /// constructed flag.
    pub fn clear_changes(&mut self) {
        self.mask.clear_all();
        for slot in &mut self.slots {
            slot.clear_changes();
        }
    }

    /// Marks every field (and every nested field) as changed.
    pub fn mark_all(&mut self) {
        for (field, slot) in self.schema.fields().iter().zip(self.slots.iter_mut()) {
            for offset in 0..field.bit_span() {
                self.mask.set(field.bit + offset);
            }
            if let Some(block) = field.block_bit {
                self.mask.set_block(block);
            }
            slot.mark_all();
        }
    }

    /// Returns a read-only view of a field.
    #[must_use]
    pub fn field(&self, key: FieldKey) -> Option<FieldRef<'_>> {
        let view = match self.slots.get(key.index())? {
            Slot::Value(value) => FieldRef::Value(value),
            Slot::Struct(holder) => FieldRef::Struct(holder),
            Slot::Array(values) => FieldRef::Array(values),
            Slot::Dynamic(dynamic) => FieldRef::Dynamic(dynamic),
            Slot::Optional(optional) => FieldRef::Optional(optional),
        };
        Some(view)
    }

    /// Returns a read-only view of a field by name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<FieldRef<'_>> {
        self.field(self.schema.key(name)?)
    }

    /// Returns a scalar field's value by key.
    #[must_use]
    pub fn value(&self, key: FieldKey) -> Option<&FieldValue> {
        match self.field(key)? {
            FieldRef::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns a scalar field's value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        match self.field_by_name(name)? {
            FieldRef::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns a nested holder.
    #[must_use]
    pub fn nested(&self, name: &str) -> Option<&Self> {
        match self.field_by_name(name)? {
            FieldRef::Struct(holder) => Some(holder),
            _ => None,
        }
    }

    /// Returns a fixed array's slots.
    #[must_use]
    pub fn array(&self, name: &str) -> Option<&[FieldValue]> {
        match self.field_by_name(name)? {
            FieldRef::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns a dynamic collection.
    #[must_use]
    pub fn dynamic(&self, name: &str) -> Option<&DynamicField> {
        match self.field_by_name(name)? {
            FieldRef::Dynamic(dynamic) => Some(dynamic),
            _ => None,
        }
    }

    /// Returns an optional field.
    #[must_use]
    pub fn optional(&self, name: &str) -> Option<&OptionalField> {
        match self.field_by_name(name)? {
            FieldRef::Optional(optional) => Some(optional),
            _ => None,
        }
    }

    /// Starts a mutation at the root of this holder.
    pub fn modify(&mut self) -> HolderMut<'_> {
        HolderMut::new(self)
    }

    /// Starts a mutation of one field.
    pub fn modify_field(&mut self, name: &str) -> Option<FieldMut<'_>> {
        self.modify().field(name)
    }

    /// Sets a scalar field, returning `true` if the value changed.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> bool {
        self.modify().set(name, value)
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn parts_mut(&mut self) -> (&HolderSchema, &mut ChangeMask, &mut [Slot]) {
        (&self.schema, &mut self.mask, &mut self.slots)
    }
}

impl PartialEq for Holder {
    fn eq(&self, other: &Self) -> bool {
        self.schema.hash() == other.schema.hash() && self.slots == other.slots
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use serde::ser::{SerializeMap, SerializeSeq};
    use serde::{Serialize, Serializer};

    use super::{Element, FieldRef, Holder};
    use crate::dynamic::DynamicField;
    use crate::optional::OptionalField;

    impl Serialize for Holder {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.schema.len()))?;
            for (key, field) in self.schema.entries() {
                if let Some(view) = self.field(key) {
                    map.serialize_entry(&field.name, &view)?;
                }
            }
            map.end()
        }
    }

    impl Serialize for FieldRef<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Value(value) => value.serialize(serializer),
                Self::Struct(holder) => holder.serialize(serializer),
                Self::Array(values) => values.serialize(serializer),
                Self::Dynamic(dynamic) => dynamic.serialize(serializer),
                Self::Optional(optional) => optional.serialize(serializer),
            }
        }
    }

    impl Serialize for Element {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Value(value) => value.serialize(serializer),
                Self::Struct(holder) => holder.serialize(serializer),
            }
        }
    }

    impl Serialize for DynamicField {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut seq = serializer.serialize_seq(Some(self.len()))?;
            for element in self.iter() {
                seq.serialize_element(element)?;
            }
            seq.end()
        }
    }

    impl Serialize for OptionalField {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.get().serialize(serializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use schema::{FieldCodec, FieldDef, Visibility};

    use super::*;

    fn inner() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("stats")
                .field(FieldDef::scalar("hp", 0, FieldCodec::uint(16)))
                .field(FieldDef::scalar("mp", 1, FieldCodec::uint(16)))
                .build()
                .unwrap(),
        )
    }

    fn outer() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("unit")
                .field(FieldDef::scalar("name", 0, FieldCodec::string(16)))
                .field(FieldDef::nested("stats", 1, inner()))
                .field(FieldDef::array("slots", 2, FieldCodec::uint(8), 3).per_slot())
                .field(FieldDef::dynamic("history", 5, inner()).block_bit(0))
                .field(FieldDef::optional("pet", 6, inner()).visibility(Visibility::OWNER))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn new_holder_is_clean_with_defaults() {
        let holder = Holder::new(outer());
        assert!(!holder.has_changes());
        assert_eq!(holder.get("name"), Some(&FieldValue::Str(String::new())));
        assert_eq!(holder.array("slots").map(<[FieldValue]>::len), Some(3));
        assert!(holder.dynamic("history").unwrap().is_empty());
        assert!(holder.optional("pet").unwrap().is_none());
        assert_eq!(
            holder.nested("stats").unwrap().get("hp"),
            Some(&FieldValue::UInt(0))
        );
        assert!(holder.get("stats").is_none());
        assert!(holder.get("missing").is_none());
    }

    #[test]
    fn mark_all_sets_every_bit_and_nested() {
        let mut holder = Holder::new(outer());
        holder.mark_all();
        assert_eq!(holder.changes().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(holder.mask().test_block(0));
        assert!(holder.nested("stats").unwrap().has_changes());
    }

    #[test]
    fn clear_changes_is_recursive() {
        let mut holder = Holder::new(outer());
        holder.mark_all();
        holder.clear_changes();
        assert!(!holder.has_changes());
        assert!(!holder.nested("stats").unwrap().has_changes());
    }

    #[test]
    fn equality_ignores_change_state() {
        let schema = outer();
        let mut a = Holder::new(Arc::clone(&schema));
        let b = Holder::new(schema);
        a.mark_all();
        assert_eq!(a, b);
        a.set("name", "rex");
        assert_ne!(a, b);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_name_keyed_map() {
        use serde_json::json;

        let mut holder = Holder::new(outer());
        holder.set("name", "rex");
        holder.modify().nested("stats").unwrap().set("hp", 7u64);
        holder.modify().set_at("slots", 1, 2u64);
        {
            let mut history = holder.modify().dynamic("history").unwrap();
            let index = history.push_default();
            history.element(index).unwrap().set("mp", 3u64);
        }
        holder
            .modify()
            .optional("pet")
            .unwrap()
            .holder_mut()
            .unwrap()
            .set("hp", 1u64);

        let value = serde_json::to_value(&holder).unwrap();
        assert_eq!(
            value,
            json!({
                "name": { "Str": "rex" },
                "stats": { "hp": { "UInt": 7 }, "mp": { "UInt": 0 } },
                "slots": [{ "UInt": 0 }, { "UInt": 2 }, { "UInt": 0 }],
                "history": [{ "hp": { "UInt": 0 }, "mp": { "UInt": 3 } }],
                "pet": { "hp": { "UInt": 1 }, "mp": { "UInt": 0 } },
            })
        );

        holder.modify().optional("pet").unwrap().remove();
        let value = serde_json::to_value(&holder).unwrap();
        assert_eq!(value["pet"], serde_json::Value::Null);
    }
}
