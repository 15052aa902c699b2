//! Deterministic schema hashing.

use blake3::Hasher;

use crate::{
    ArrayBits, FieldCodec, FieldDef, FieldKind, FixedPoint, HolderSchema, OptionalStorage,
    ValueType,
};

/// Computes a deterministic hash for schema validation.
///
/// Covers names, bits, block bits, visibility and kinds, recursing into
/// nested schemas through their cached hashes.
#[must_use]
pub fn schema_hash(schema: &HolderSchema) -> u64 {
    compute_hash(schema.name(), schema.fields())
}

pub(crate) fn compute_hash(name: &str, fields: &[FieldDef]) -> u64 {
    let mut hasher = Hasher::new();
    write_str(&mut hasher, name);
    write_u32(&mut hasher, fields.len() as u32);

    for field in fields {
        write_str(&mut hasher, &field.name);
        write_u32(&mut hasher, field.bit);
        match field.block_bit {
            Some(block) => {
                write_u8(&mut hasher, 1);
                write_u32(&mut hasher, block);
            }
            None => write_u8(&mut hasher, 0),
        }
        write_u8(&mut hasher, field.visibility.bits());
        write_kind(&mut hasher, &field.kind);
    }

    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

fn write_kind(hasher: &mut Hasher, kind: &FieldKind) {
    match kind {
        FieldKind::Scalar(value) => {
            write_u8(hasher, 0);
            write_value(hasher, value);
        }
        FieldKind::Array { element, len, bits } => {
            write_u8(hasher, 1);
            write_codec(hasher, *element);
            write_u32(hasher, u32::from(*len));
            write_u8(
                hasher,
                match bits {
                    ArrayBits::Shared => 0,
                    ArrayBits::PerSlot => 1,
                },
            );
        }
        FieldKind::Dynamic { element, len_bits } => {
            write_u8(hasher, 2);
            write_value(hasher, element);
            write_u8(hasher, *len_bits);
        }
        FieldKind::Optional { value, storage } => {
            write_u8(hasher, 3);
            write_value(hasher, value);
            write_u8(
                hasher,
                match storage {
                    OptionalStorage::Inline => 0,
                    OptionalStorage::Boxed => 1,
                },
            );
        }
    }
}

fn write_value(hasher: &mut Hasher, value: &ValueType) {
    match value {
        ValueType::Scalar(codec) => {
            write_u8(hasher, 0);
            write_codec(hasher, *codec);
        }
        ValueType::Struct(schema) => {
            write_u8(hasher, 1);
            hasher.update(&schema.hash().to_le_bytes());
        }
    }
}

fn write_codec(hasher: &mut Hasher, codec: FieldCodec) {
    match codec {
        FieldCodec::Bool => {
            write_u8(hasher, 0);
        }
        FieldCodec::UInt { bits } => {
            write_u8(hasher, 1);
            write_u8(hasher, bits);
        }
        FieldCodec::SInt { bits } => {
            write_u8(hasher, 2);
            write_u8(hasher, bits);
        }
        FieldCodec::VarUInt => {
            write_u8(hasher, 3);
        }
        FieldCodec::VarSInt => {
            write_u8(hasher, 4);
        }
        FieldCodec::FixedPoint(fp) => {
            write_u8(hasher, 5);
            write_fixed_point(hasher, fp);
        }
        FieldCodec::Str { max_len } => {
            write_u8(hasher, 6);
            write_u32(hasher, max_len);
        }
        FieldCodec::Guid => {
            write_u8(hasher, 7);
        }
    }
}

fn write_fixed_point(hasher: &mut Hasher, fp: FixedPoint) {
    write_i64(hasher, fp.min_q);
    write_i64(hasher, fp.max_q);
    write_u32(hasher, fp.scale);
}

fn write_str(hasher: &mut Hasher, value: &str) {
    write_u32(hasher, value.len() as u32);
    hasher.update(value.as_bytes());
}

fn write_u8(hasher: &mut Hasher, value: u8) {
    hasher.update(&[value]);
}

fn write_u32(hasher: &mut Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

fn write_i64(hasher: &mut Hasher, value: i64) {
    hasher.update(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::Visibility;

    fn build(fields: Vec<FieldDef>) -> HolderSchema {
        HolderSchema::new("h", fields).unwrap()
    }

    #[test]
    fn schema_hash_is_stable() {
        let fields = vec![
            FieldDef::scalar("a", 0, FieldCodec::bool()),
            FieldDef::scalar("b", 1, FieldCodec::fixed_point(-500, 500, 100)),
        ];
        let a = build(fields.clone());
        let b = build(fields);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(schema_hash(&a), a.hash());
    }

    #[test]
    fn schema_hash_changes_with_field_order() {
        let a = build(vec![
            FieldDef::scalar("a", 0, FieldCodec::bool()),
            FieldDef::scalar("b", 1, FieldCodec::uint(8)),
        ]);
        let b = build(vec![
            FieldDef::scalar("b", 1, FieldCodec::uint(8)),
            FieldDef::scalar("a", 0, FieldCodec::bool()),
        ]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn schema_hash_covers_visibility_and_block_bits() {
        let base = build(vec![FieldDef::dynamic("t", 0, FieldCodec::uint(8))]);
        let hidden = build(vec![
            FieldDef::dynamic("t", 0, FieldCodec::uint(8)).visibility(Visibility::OWNER)
        ]);
        let blocked = build(vec![FieldDef::dynamic("t", 0, FieldCodec::uint(8)).block_bit(0)]);
        assert_ne!(base.hash(), hidden.hash());
        assert_ne!(base.hash(), blocked.hash());
        assert_ne!(hidden.hash(), blocked.hash());
    }

    #[test]
    fn schema_hash_recurses_into_nested() {
        let inner_a = Arc::new(build(vec![FieldDef::scalar("x", 0, FieldCodec::uint(8))]));
        let inner_b = Arc::new(build(vec![FieldDef::scalar("x", 0, FieldCodec::uint(9))]));
        let a = build(vec![FieldDef::nested("n", 0, inner_a)]);
        let b = build(vec![FieldDef::nested("n", 0, inner_b)]);
        assert_ne!(a.hash(), b.hash());
    }
}
