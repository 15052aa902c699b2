//! Baseline payloads: every visible field of a holder, in schema order.
//!
//! # Wire layout
//!
//! ```text
//! granted:4 | field payloads...
//! ```
//!
//! Each visible field writes its payload in declaration order:
//!
//! - scalar: the value in its codec
//! - nested: the nested holder's fields, recursively (no prefix)
//! - array: every slot
//! - dynamic: `len:len_bits` then each element
//! - optional: a presence bit, then the value when present
//!
//! Fields whose visibility does not intersect `granted` are skipped. The
//! granted set leads the payload so the receiver can skip the same fields.

use bitstream::{BitReader, BitWriter};
use schema::{FieldDef, FieldKind, ValueType, Visibility};

use crate::dynamic::DynamicField;
use crate::error::{CodecError, CodecResult, LimitKind};
use crate::holder::{element_mismatch, slot_mismatch, Element, Holder, Slot};
use crate::limits::CodecLimits;
use crate::optional::OptionalField;
use crate::value::{read_value, store, write_value};

/// Width of the granted-visibility prefix.
pub(crate) const GRANTED_BITS: u8 = 4;

/// Encodes every field visible to `granted`.
pub fn encode_baseline(holder: &Holder, granted: Visibility) -> CodecResult<Vec<u8>> {
    let mut writer = BitWriter::with_capacity(64);
    write_granted(&mut writer, granted)?;
    write_holder(holder, granted, &mut writer)?;
    let bytes = writer.finish();
    log::trace!(
        "baseline '{}' for {granted}: {} bytes",
        holder.schema().name(),
        bytes.len()
    );
    Ok(bytes)
}

/// Overwrites the fields carried by a baseline payload.
///
/// Fields the sender's granted set hid keep their current values. Fields
/// whose value changes are marked on `holder`.
pub fn apply_baseline(holder: &mut Holder, bytes: &[u8], limits: &CodecLimits) -> CodecResult<()> {
    let mut reader = BitReader::new(bytes);
    let granted = read_granted(&mut reader)?;
    read_holder(holder, granted, &mut reader, limits, 0)?;
    ensure_consumed(&reader)
}

pub(crate) fn write_granted(writer: &mut BitWriter, granted: Visibility) -> CodecResult<()> {
    writer.write_bits(u64::from(granted.bits()), GRANTED_BITS)?;
    Ok(())
}

pub(crate) fn read_granted(reader: &mut BitReader<'_>) -> CodecResult<Visibility> {
    let bits = reader.read_bits(GRANTED_BITS)?;
    Ok(Visibility::from_bits_truncate(bits as u8))
}

pub(crate) fn ensure_consumed(reader: &BitReader<'_>) -> CodecResult<()> {
    let remaining_bits = reader.bits_remaining();
    if remaining_bits >= 8 {
        return Err(CodecError::TrailingData { remaining_bits });
    }
    Ok(())
}

pub(crate) fn ensure_depth(depth: usize, limits: &CodecLimits) -> CodecResult<()> {
    if depth > limits.max_depth {
        return Err(CodecError::DepthExceeded {
            limit: limits.max_depth,
        });
    }
    Ok(())
}

/// Writes a dynamic length, refusing lengths the field cannot express.
pub(crate) fn write_len(
    field: &FieldDef,
    len: usize,
    len_bits: u8,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    let max = if len_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << len_bits) - 1
    };
    let fits = u64::try_from(len).is_ok_and(|len| len <= max);
    debug_assert!(
        fits,
        "length {len} of '{}' overflows its {len_bits}-bit length field",
        field.name
    );
    if !fits {
        log::error!(
            "refusing to encode '{}': length {len} overflows its {len_bits}-bit length field",
            field.name
        );
        return Err(CodecError::LengthOverflow {
            field: field.name.clone(),
            len,
            len_bits,
        });
    }
    writer.write_bits(len as u64, len_bits)?;
    Ok(())
}

pub(crate) fn read_len(
    reader: &mut BitReader<'_>,
    len_bits: u8,
    limits: &CodecLimits,
) -> CodecResult<usize> {
    let raw = reader.read_bits(len_bits)?;
    let len = usize::try_from(raw).unwrap_or(usize::MAX);
    if len > limits.max_dynamic_len {
        return Err(CodecError::LimitsExceeded {
            kind: LimitKind::DynamicLen,
            limit: limits.max_dynamic_len,
            actual: len,
        });
    }
    Ok(len)
}

pub(crate) fn write_holder(
    holder: &Holder,
    granted: Visibility,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    for (field, slot) in holder.schema().fields().iter().zip(holder.slots()) {
        if field.visibility.intersects(granted) {
            write_slot(field, slot, granted, writer)?;
        }
    }
    Ok(())
}

fn write_slot(
    field: &FieldDef,
    slot: &Slot,
    granted: Visibility,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    match (&field.kind, slot) {
        (FieldKind::Scalar(ValueType::Scalar(codec)), Slot::Value(value)) => {
            write_value(&field.name, *codec, value, writer)?;
        }
        (FieldKind::Scalar(ValueType::Struct(_)), Slot::Struct(nested)) => {
            write_holder(nested, granted, writer)?;
        }
        (FieldKind::Array { element, .. }, Slot::Array(values)) => {
            for value in values {
                write_value(&field.name, *element, value, writer)?;
            }
        }
        (FieldKind::Dynamic { element, len_bits }, Slot::Dynamic(dynamic)) => {
            write_len(field, dynamic.len(), *len_bits, writer)?;
            for item in dynamic.iter() {
                write_element(field, element, item, granted, writer)?;
            }
        }
        (FieldKind::Optional { value, .. }, Slot::Optional(optional)) => {
            writer.write_bit(optional.is_some());
            if let Some(item) = optional.get() {
                write_element(field, value, item, granted, writer)?;
            }
        }
        (_, slot) => return Err(slot_mismatch(field, slot)),
    }
    Ok(())
}

pub(crate) fn write_element(
    field: &FieldDef,
    ty: &ValueType,
    element: &Element,
    granted: Visibility,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    match (ty, element) {
        (ValueType::Scalar(codec), Element::Value(value)) => {
            write_value(&field.name, *codec, value, writer)
        }
        (ValueType::Struct(_), Element::Struct(holder)) => write_holder(holder, granted, writer),
        (_, element) => Err(element_mismatch(field, element)),
    }
}

/// Reads a holder's visible fields in place; returns `true` if any value
/// changed.
pub(crate) fn read_holder(
    holder: &mut Holder,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    ensure_depth(depth, limits)?;
    let (schema, mask, slots) = holder.parts_mut();
    let mut any = false;
    for (field, slot) in schema.fields().iter().zip(slots.iter_mut()) {
        if !field.visibility.intersects(granted) {
            continue;
        }
        let changed = match (&field.kind, slot) {
            (FieldKind::Scalar(ValueType::Scalar(codec)), Slot::Value(current)) => {
                store(current, read_value(&field.name, *codec, reader, limits)?)
            }
            (FieldKind::Scalar(ValueType::Struct(_)), Slot::Struct(nested)) => {
                read_holder(nested, granted, reader, limits, depth + 1)?
            }
            (FieldKind::Array { element, .. }, Slot::Array(values)) => {
                let mut changed = false;
                for (index, current) in values.iter_mut().enumerate() {
                    let value = read_value(&field.name, *element, reader, limits)?;
                    if store(current, value) {
                        changed = true;
                        if field.bit_span() > 1 {
                            mask.set(field.bit + index as u32);
                        }
                    }
                }
                changed
            }
            (FieldKind::Dynamic { element, len_bits }, Slot::Dynamic(dynamic)) => {
                let len = read_len(reader, *len_bits, limits)?;
                read_dynamic(field, element, len, dynamic, granted, reader, limits, depth)?
            }
            (FieldKind::Optional { value, .. }, Slot::Optional(optional)) => {
                read_optional(field, value, optional, granted, reader, limits, depth)?
            }
            (_, slot) => return Err(slot_mismatch(field, slot)),
        };
        if changed {
            if field.bit_span() == 1 {
                mask.set(field.bit);
            }
            if let Some(block) = field.block_bit {
                mask.set_block(block);
            }
            any = true;
        }
    }
    Ok(any)
}

#[allow(clippy::too_many_arguments)]
fn read_dynamic(
    field: &FieldDef,
    ty: &ValueType,
    len: usize,
    dynamic: &mut DynamicField,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    let mut changed = dynamic.resize_default(len, ty);
    for index in 0..len {
        let Some(element) = dynamic.elements_mut().get_mut(index) else {
            break;
        };
        if read_element(field, ty, element, granted, reader, limits, depth)? {
            dynamic.mark_changed(index);
            changed = true;
        }
    }
    Ok(changed)
}

fn read_optional(
    field: &FieldDef,
    ty: &ValueType,
    optional: &mut OptionalField,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    if !reader.read_bit()? {
        return Ok(optional.take().is_some());
    }
    let created = optional.is_none();
    let element = optional.get_or_insert_with(|| Element::new(ty));
    let changed = read_element(field, ty, element, granted, reader, limits, depth)?;
    Ok(changed || created)
}

/// Reads one element's baseline in place.
pub(crate) fn read_element(
    field: &FieldDef,
    ty: &ValueType,
    element: &mut Element,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    match (ty, element) {
        (ValueType::Scalar(codec), Element::Value(current)) => Ok(store(
            current,
            read_value(&field.name, *codec, reader, limits)?,
        )),
        (ValueType::Struct(_), Element::Struct(holder)) => {
            read_holder(holder, granted, reader, limits, depth + 1)
        }
        (_, element) => Err(element_mismatch(field, element)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use schema::{FieldCodec, HolderSchema};

    use super::*;
    use crate::value::FieldValue;

    fn schema() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("crate")
                .field(FieldDef::scalar("open", 0, FieldCodec::bool()))
                .field(FieldDef::scalar("count", 1, FieldCodec::uint(6)))
                .field(
                    FieldDef::scalar("key", 2, FieldCodec::uint(8)).visibility(Visibility::OWNER),
                )
                .field(FieldDef::dynamic("loot", 3, FieldCodec::uint(4)).len_bits(3))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn baseline_bit_layout() {
        let mut holder = Holder::new(schema());
        holder.set("open", true);
        holder.set("count", 5u64);
        holder.set("key", 200u64);
        holder.modify().dynamic("loot").unwrap().push(9u64);

        let bytes = encode_baseline(&holder, Visibility::ANY_OBSERVER).unwrap();
        // 0100 | 1 | 000101 | 001 | 1001 -> 18 bits
        assert_eq!(bytes, vec![0b0100_1000, 0b1010_0110, 0b0100_0000]);
    }

    #[test]
    fn hidden_fields_keep_replica_values() {
        let mut source = Holder::new(schema());
        source.set("count", 7u64);
        source.set("key", 9u64);
        let bytes = encode_baseline(&source, Visibility::ANY_OBSERVER).unwrap();

        let mut replica = Holder::new(schema());
        replica.set("key", 1u64);
        replica.clear_changes();
        apply_baseline(&mut replica, &bytes, &CodecLimits::for_testing()).unwrap();
        assert_eq!(replica.get("count"), Some(&FieldValue::UInt(7)));
        assert_eq!(replica.get("key"), Some(&FieldValue::UInt(1)));
        assert_eq!(replica.changes().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let holder = Holder::new(schema());
        let mut bytes = encode_baseline(&holder, Visibility::ALL).unwrap();
        bytes.push(0);
        let err = apply_baseline(
            &mut Holder::new(schema()),
            &bytes,
            &CodecLimits::for_testing(),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::TrailingData { .. }));
    }

    #[test]
    fn dynamic_length_limit_enforced() {
        let mut holder = Holder::new(schema());
        {
            let mut loot = holder.modify().dynamic("loot").unwrap();
            for _ in 0..5 {
                loot.push(1u64);
            }
        }
        let bytes = encode_baseline(&holder, Visibility::ANY_OBSERVER).unwrap();
        let limits = CodecLimits {
            max_dynamic_len: 4,
            ..CodecLimits::for_testing()
        };
        let err = apply_baseline(&mut Holder::new(schema()), &bytes, &limits).unwrap_err();
        assert_eq!(
            err,
            CodecError::LimitsExceeded {
                kind: LimitKind::DynamicLen,
                limit: 4,
                actual: 5
            }
        );
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "overflows"))]
    fn length_overflow_is_refused() {
        let mut holder = Holder::new(schema());
        {
            let mut loot = holder.modify().dynamic("loot").unwrap();
            for _ in 0..8 {
                loot.push(1u64);
            }
        }
        let err = encode_baseline(&holder, Visibility::ANY_OBSERVER).unwrap_err();
        assert!(matches!(err, CodecError::LengthOverflow { len: 8, len_bits: 3, .. }));
    }
}
