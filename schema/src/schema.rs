//! Holder schemas: the per-type field descriptor table.

use std::collections::HashMap;

use crate::error::{SchemaError, SchemaResult};
use crate::hash::compute_hash;
use crate::{FieldCodec, FieldDef, FieldKind, FixedPoint, ValueType};

/// Highest mask bit (exclusive) a field may use.
pub const MAX_MASK_BITS: u32 = 1 << 16;

/// Index of a field in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FieldKey(u16);

impl FieldKey {
    /// Creates a key from a declaration index.
    #[must_use]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Returns the declaration index.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Returns the declaration index as `usize`.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The field (and array slot) that owns a mask bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSlot {
    pub field: FieldKey,
    /// Array slot for per-slot arrays, otherwise 0.
    pub slot: u16,
}

/// A validated, named list of field definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HolderSchema {
    name: String,
    fields: Vec<FieldDef>,
    bit_count: u32,
    hash: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    by_bit: Vec<Option<BitSlot>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    by_name: HashMap<String, FieldKey>,
}

impl HolderSchema {
    /// Creates a schema from fields after validation.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> SchemaResult<Self> {
        let name = name.into();
        if fields.len() > usize::from(u16::MAX) {
            return Err(SchemaError::TooManyFields {
                count: fields.len(),
                max: usize::from(u16::MAX),
            });
        }

        let mut by_name = HashMap::with_capacity(fields.len());
        let mut bit_count = 0u32;
        for (index, field) in fields.iter().enumerate() {
            if by_name
                .insert(field.name.clone(), FieldKey(index as u16))
                .is_some()
            {
                return Err(SchemaError::DuplicateFieldName {
                    name: field.name.clone(),
                });
            }
            validate_kind(field)?;
            let end = field.bit.saturating_add(field.bit_span());
            if end > MAX_MASK_BITS {
                return Err(SchemaError::BitOutOfRange {
                    field: field.name.clone(),
                    bit: end - 1,
                    max: MAX_MASK_BITS - 1,
                });
            }
            bit_count = bit_count.max(end);
        }

        let mut by_bit: Vec<Option<BitSlot>> = vec![None; bit_count as usize];
        for (index, field) in fields.iter().enumerate() {
            for slot in 0..field.bit_span() {
                let bit = field.bit + slot;
                let entry = &mut by_bit[bit as usize];
                if let Some(existing) = entry {
                    return Err(SchemaError::BitAliased {
                        bit,
                        field: field.name.clone(),
                        other: fields[existing.field.index()].name.clone(),
                    });
                }
                *entry = Some(BitSlot {
                    field: FieldKey(index as u16),
                    slot: slot as u16,
                });
            }
        }

        let block_count = bit_count.div_ceil(32);
        for field in &fields {
            if let Some(block_bit) = field.block_bit {
                if block_bit >= block_count {
                    return Err(SchemaError::BlockBitOutOfRange {
                        field: field.name.clone(),
                        block_bit,
                        block_count,
                    });
                }
            }
        }

        let hash = compute_hash(&name, &fields);
        Ok(Self {
            name,
            fields,
            bit_count,
            hash,
            by_bit,
            by_name,
        })
    }

    /// Creates a schema builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> HolderSchemaBuilder {
        HolderSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Returns the schema name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the field for `key`.
    #[must_use]
    pub fn field(&self, key: FieldKey) -> Option<&FieldDef> {
        self.fields.get(key.index())
    }

    /// Looks up a field key by name.
    #[must_use]
    pub fn key(&self, name: &str) -> Option<FieldKey> {
        self.by_name.get(name).copied()
    }

    /// Iterates field keys with their definitions.
    pub fn entries(&self) -> impl Iterator<Item = (FieldKey, &FieldDef)> + '_ {
        self.fields
            .iter()
            .enumerate()
            .map(|(index, field)| (FieldKey(index as u16), field))
    }

    /// Returns the field and slot owning `bit`.
    #[must_use]
    pub fn lookup_bit(&self, bit: u32) -> Option<BitSlot> {
        self.by_bit.get(bit as usize).copied().flatten()
    }

    /// Number of mask bits (one past the highest used bit).
    #[must_use]
    pub const fn bit_count(&self) -> u32 {
        self.bit_count
    }

    /// Number of 32-bit blocks in the mask.
    #[must_use]
    pub const fn block_count(&self) -> u32 {
        self.bit_count.div_ceil(32)
    }

    /// Returns the deterministic schema hash.
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }
}

/// Builder for `HolderSchema`.
#[derive(Debug)]
pub struct HolderSchemaBuilder {
    name: String,
    fields: Vec<FieldDef>,
}

impl HolderSchemaBuilder {
    /// Adds a field definition.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Builds the schema after validation.
    pub fn build(self) -> SchemaResult<HolderSchema> {
        HolderSchema::new(self.name, self.fields)
    }
}

fn validate_kind(field: &FieldDef) -> SchemaResult<()> {
    match &field.kind {
        FieldKind::Scalar(value) => validate_value(field, value),
        FieldKind::Array { element, len, .. } => {
            if *len == 0 {
                return Err(SchemaError::EmptyArray {
                    field: field.name.clone(),
                });
            }
            validate_codec(field, *element)
        }
        FieldKind::Dynamic { element, len_bits } => {
            if *len_bits == 0 || *len_bits > 32 {
                return Err(SchemaError::InvalidLengthBits {
                    field: field.name.clone(),
                    bits: *len_bits,
                });
            }
            validate_value(field, element)
        }
        FieldKind::Optional { value, .. } => validate_value(field, value),
    }
}

fn validate_value(field: &FieldDef, value: &ValueType) -> SchemaResult<()> {
    match value {
        ValueType::Scalar(codec) => validate_codec(field, *codec),
        // Nested schemas were validated when they were built.
        ValueType::Struct(_) => Ok(()),
    }
}

fn validate_codec(field: &FieldDef, codec: FieldCodec) -> SchemaResult<()> {
    match codec {
        FieldCodec::UInt { bits } | FieldCodec::SInt { bits } => {
            if bits == 0 || bits > 64 {
                return Err(SchemaError::InvalidBitWidth { bits });
            }
        }
        FieldCodec::FixedPoint(fp) => validate_fixed_point(fp)?,
        FieldCodec::Str { max_len } => {
            if max_len == 0 {
                return Err(SchemaError::ZeroStringCapacity {
                    field: field.name.clone(),
                });
            }
        }
        FieldCodec::Bool | FieldCodec::VarUInt | FieldCodec::VarSInt | FieldCodec::Guid => {}
    }
    Ok(())
}

fn validate_fixed_point(fp: FixedPoint) -> SchemaResult<()> {
    if fp.scale == 0 {
        return Err(SchemaError::InvalidFixedPointScale { scale: fp.scale });
    }
    if fp.min_q > fp.max_q {
        return Err(SchemaError::InvalidFixedPointRange {
            min_q: fp.min_q,
            max_q: fp.max_q,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{ArrayBits, Visibility};

    fn profile() -> HolderSchema {
        HolderSchema::builder("profile")
            .field(FieldDef::scalar("level", 0, FieldCodec::uint(32)))
            .field(FieldDef::scalar("favorite_color", 1, FieldCodec::string(32)))
            .field(FieldDef::dynamic("tags", 2, FieldCodec::uint(32)).block_bit(0))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_roundtrip() {
        let schema = profile();
        assert_eq!(schema.name(), "profile");
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.bit_count(), 3);
        assert_eq!(schema.block_count(), 1);
        assert_eq!(schema.key("tags"), Some(FieldKey::new(2)));
        assert_eq!(schema.key("missing"), None);
    }

    #[test]
    fn lookup_bit_maps_per_slot_arrays() {
        let schema = HolderSchema::builder("bag")
            .field(FieldDef::scalar("gold", 0, FieldCodec::var_uint()))
            .field(FieldDef::array("slots", 1, FieldCodec::uint(16), 4).per_slot())
            .field(FieldDef::array("shared", 5, FieldCodec::uint(16), 4))
            .build()
            .unwrap();
        assert_eq!(schema.bit_count(), 6);
        assert_eq!(
            schema.lookup_bit(3),
            Some(BitSlot {
                field: FieldKey::new(1),
                slot: 2
            })
        );
        assert_eq!(schema.lookup_bit(5).map(|s| s.field), Some(FieldKey::new(2)));
        assert_eq!(schema.lookup_bit(6), None);
        assert!(matches!(
            schema.field(FieldKey::new(2)).unwrap().kind,
            FieldKind::Array {
                bits: ArrayBits::Shared,
                ..
            }
        ));
    }

    #[test]
    fn block_count_rounds_up() {
        let schema = HolderSchema::builder("wide")
            .field(FieldDef::scalar("a", 0, FieldCodec::bool()))
            .field(FieldDef::scalar("b", 40, FieldCodec::bool()).block_bit(1))
            .build()
            .unwrap();
        assert_eq!(schema.bit_count(), 41);
        assert_eq!(schema.block_count(), 2);
        assert_eq!(schema.lookup_bit(20), None);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = HolderSchema::builder("dup")
            .field(FieldDef::scalar("a", 0, FieldCodec::bool()))
            .field(FieldDef::scalar("a", 1, FieldCodec::bool()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateFieldName { .. }));
    }

    #[test]
    fn rejects_aliased_bits() {
        let err = HolderSchema::builder("alias")
            .field(FieldDef::scalar("a", 3, FieldCodec::bool()))
            .field(FieldDef::scalar("b", 3, FieldCodec::bool()))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::BitAliased {
                bit: 3,
                field: "b".to_string(),
                other: "a".to_string(),
            }
        );
    }

    #[test]
    fn rejects_per_slot_range_overlap() {
        let err = HolderSchema::builder("alias")
            .field(FieldDef::array("slots", 0, FieldCodec::uint(8), 4).per_slot())
            .field(FieldDef::scalar("b", 2, FieldCodec::bool()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::BitAliased { bit: 2, .. }));
    }

    #[test]
    fn rejects_block_bit_out_of_range() {
        let err = HolderSchema::builder("blocks")
            .field(FieldDef::dynamic("tags", 0, FieldCodec::uint(8)).block_bit(1))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::BlockBitOutOfRange {
                block_bit: 1,
                block_count: 1,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_length_bits() {
        for bits in [0, 33] {
            let err = HolderSchema::builder("len")
                .field(FieldDef::dynamic("tags", 0, FieldCodec::uint(8)).len_bits(bits))
                .build()
                .unwrap_err();
            assert!(matches!(err, SchemaError::InvalidLengthBits { .. }));
        }
    }

    #[test]
    fn rejects_empty_array() {
        let err = HolderSchema::builder("arr")
            .field(FieldDef::array("slots", 0, FieldCodec::uint(8), 0))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::EmptyArray { .. }));
    }

    #[test]
    fn rejects_invalid_codecs() {
        let cases = [
            (FieldCodec::uint(0), "bit width"),
            (FieldCodec::sint(65), "bit width"),
            (FieldCodec::fixed_point(-10, 10, 0), "scale"),
            (FieldCodec::fixed_point(10, -10, 100), "range"),
            (FieldCodec::string(0), "capacity"),
        ];
        for (codec, needle) in cases {
            let err = HolderSchema::builder("codec")
                .field(FieldDef::optional("v", 0, codec))
                .build()
                .unwrap_err();
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn rejects_bits_past_mask_width() {
        let err = HolderSchema::builder("far")
            .field(FieldDef::scalar("a", MAX_MASK_BITS, FieldCodec::bool()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::BitOutOfRange { .. }));
    }

    #[test]
    fn nested_schema_is_shared() {
        let inner = Arc::new(profile());
        let outer = HolderSchema::builder("outer")
            .field(FieldDef::nested("profile", 0, Arc::clone(&inner)))
            .field(
                FieldDef::dynamic("history", 1, Arc::clone(&inner))
                    .visibility(Visibility::OWNER),
            )
            .build()
            .unwrap();
        assert_eq!(Arc::strong_count(&inner), 3);
        assert_eq!(outer.bit_count(), 2);
    }

    #[test]
    fn empty_schema() {
        let schema = HolderSchema::builder("empty").build().unwrap();
        assert!(schema.is_empty());
        assert_eq!(schema.bit_count(), 0);
        assert_eq!(schema.block_count(), 0);
    }
}
