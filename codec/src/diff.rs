//! Diff payloads: only the fields marked since the last clear.
//!
//! # Wire layout
//!
//! ```text
//! granted:4 | holder diff
//!
//! holder diff := present:1 x block_count
//!                word:32 for each present block
//!                field payload for each set bit, ascending
//! ```
//!
//! The effective mask is the holder's mask filtered by visibility; a block
//! is present when its filtered word is nonzero. A set bit names its field,
//! so no field tags are written. Field payloads:
//!
//! - scalar / array slot: the value
//! - shared array: every slot
//! - nested: the nested holder diff
//! - dynamic: `len:len_bits`, then `ceil(len / 32)` flag words, then each
//!   flagged element. Struct elements lead with a full bit: 1 means a
//!   baseline of the element follows, 0 a nested holder diff.
//! - optional: a presence bit; when present, scalars write the value and
//!   structs write a constructed bit followed by a baseline (1) or a holder
//!   diff (0).

use std::sync::Arc;

use bitstream::{BitReader, BitWriter};
use schema::{ArrayBits, FieldDef, FieldKind, HolderSchema, ValueType, Visibility};

use crate::baseline::{
    ensure_consumed, ensure_depth, read_granted, read_holder, read_len, write_granted,
    write_holder, write_len,
};
use crate::dynamic::DynamicField;
use crate::error::{CodecError, CodecResult, MaskReason};
use crate::holder::{element_mismatch, slot_mismatch, Element, Holder, Slot};
use crate::limits::CodecLimits;
use crate::mask::{ChangeMask, ElementMask, WORD_BITS};
use crate::optional::OptionalField;
use crate::scratch::CodecScratch;
use crate::value::{read_value, store, write_value};

/// Encodes the changes visible to `granted`.
///
/// A holder with no visible changes still produces a valid (near-empty)
/// payload; callers skip it with [`has_visible_changes`](crate::has_visible_changes).
pub fn encode_diff(holder: &Holder, granted: Visibility) -> CodecResult<Vec<u8>> {
    encode_diff_with_scratch(holder, granted, &mut CodecScratch::new())
}

/// Encodes a diff, reusing cached visibility masks.
pub fn encode_diff_with_scratch(
    holder: &Holder,
    granted: Visibility,
    scratch: &mut CodecScratch,
) -> CodecResult<Vec<u8>> {
    let mut writer = BitWriter::with_capacity(32);
    write_granted(&mut writer, granted)?;
    write_holder_diff(holder, granted, scratch, &mut writer)?;
    let bytes = writer.finish();
    log::trace!(
        "diff '{}' for {granted}: {} bytes",
        holder.schema().name(),
        bytes.len()
    );
    Ok(bytes)
}

/// Applies a diff payload; returns `true` if any value changed.
///
/// Fields whose value changes are marked on `holder`, so applying the same
/// payload twice changes nothing the second time.
pub fn apply_diff(holder: &mut Holder, bytes: &[u8], limits: &CodecLimits) -> CodecResult<bool> {
    let mut reader = BitReader::new(bytes);
    let granted = read_granted(&mut reader)?;
    let changed = read_holder_diff(holder, granted, &mut reader, limits, 0)?;
    ensure_consumed(&reader)?;
    Ok(changed)
}

fn write_holder_diff(
    holder: &Holder,
    granted: Visibility,
    scratch: &mut CodecScratch,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    let schema = holder.schema();
    let effective = holder
        .mask()
        .and(scratch.visibility_mask(schema, granted));
    let blocks = schema.block_count() as usize;
    for block in 0..blocks {
        writer.write_bit(effective.word(block) != 0);
    }
    for block in 0..blocks {
        let word = effective.word(block);
        if word != 0 {
            writer.write_bits(u64::from(word), WORD_BITS as u8)?;
        }
    }

    for bit in &effective {
        let Some(owner) = schema.lookup_bit(bit) else {
            continue;
        };
        let index = owner.field.index();
        let (Some(field), Some(slot)) = (schema.fields().get(index), holder.slots().get(index))
        else {
            continue;
        };
        match (&field.kind, slot) {
            (FieldKind::Scalar(ValueType::Scalar(codec)), Slot::Value(value)) => {
                write_value(&field.name, *codec, value, writer)?;
            }
            (FieldKind::Scalar(ValueType::Struct(_)), Slot::Struct(nested)) => {
                write_holder_diff(nested, granted, scratch, writer)?;
            }
            (FieldKind::Array { element, bits, .. }, Slot::Array(values)) => match bits {
                ArrayBits::Shared => {
                    for value in values {
                        write_value(&field.name, *element, value, writer)?;
                    }
                }
                ArrayBits::PerSlot => {
                    let value = values
                        .get(usize::from(owner.slot))
                        .ok_or_else(|| slot_mismatch(field, slot))?;
                    write_value(&field.name, *element, value, writer)?;
                }
            },
            (FieldKind::Dynamic { element, len_bits }, Slot::Dynamic(dynamic)) => {
                write_dynamic_diff(field, element, *len_bits, dynamic, granted, scratch, writer)?;
            }
            (FieldKind::Optional { value, .. }, Slot::Optional(optional)) => {
                write_optional_diff(field, value, optional, granted, scratch, writer)?;
            }
            (_, slot) => return Err(slot_mismatch(field, slot)),
        }
    }
    Ok(())
}

fn write_dynamic_diff(
    field: &FieldDef,
    ty: &ValueType,
    len_bits: u8,
    dynamic: &DynamicField,
    granted: Visibility,
    scratch: &mut CodecScratch,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    let len = dynamic.len();
    write_len(field, len, len_bits, writer)?;
    for word in 0..len.div_ceil(WORD_BITS as usize) {
        let flags = dynamic.changed().word(word) | dynamic.replaced().word(word);
        writer.write_bits(u64::from(flags), WORD_BITS as u8)?;
    }
    for index in dynamic.flagged() {
        let Some(element) = dynamic.get(index) else {
            break;
        };
        match (ty, element) {
            (ValueType::Scalar(codec), Element::Value(value)) => {
                write_value(&field.name, *codec, value, writer)?;
            }
            (ValueType::Struct(_), Element::Struct(holder)) => {
                let full = dynamic.replaced().test(index);
                writer.write_bit(full);
                if full {
                    write_holder(holder, granted, writer)?;
                } else {
                    write_holder_diff(holder, granted, scratch, writer)?;
                }
            }
            (_, element) => return Err(element_mismatch(field, element)),
        }
    }
    Ok(())
}

fn write_optional_diff(
    field: &FieldDef,
    ty: &ValueType,
    optional: &OptionalField,
    granted: Visibility,
    scratch: &mut CodecScratch,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    let Some(element) = optional.get() else {
        writer.write_bit(false);
        return Ok(());
    };
    writer.write_bit(true);
    match (ty, element) {
        (ValueType::Scalar(codec), Element::Value(value)) => {
            write_value(&field.name, *codec, value, writer)
        }
        (ValueType::Struct(_), Element::Struct(holder)) => {
            let full = optional.is_constructed();
            writer.write_bit(full);
            if full {
                write_holder(holder, granted, writer)
            } else {
                write_holder_diff(holder, granted, scratch, writer)
            }
        }
        (_, element) => Err(element_mismatch(field, element)),
    }
}

fn read_holder_diff(
    holder: &mut Holder,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    ensure_depth(depth, limits)?;
    let (schema, mask, slots) = holder.parts_mut();

    let blocks = schema.block_count() as usize;
    let mut present = Vec::with_capacity(blocks);
    for _ in 0..blocks {
        present.push(reader.read_bit()?);
    }
    let mut received = ChangeMask::new(schema.bit_count());
    for (block, _) in present.iter().enumerate().filter(|(_, flag)| **flag) {
        let word = reader.read_bits(WORD_BITS as u8)? as u32;
        received.set_word(block, word);
    }

    let mut any = false;
    for bit in &received {
        let owner = schema.lookup_bit(bit).ok_or(CodecError::InvalidMask {
            reason: MaskReason::UnknownBit { bit },
        })?;
        let index = owner.field.index();
        let (Some(field), Some(slot)) = (schema.fields().get(index), slots.get_mut(index)) else {
            return Err(CodecError::InvalidMask {
                reason: MaskReason::UnknownBit { bit },
            });
        };
        let changed = match (&field.kind, slot) {
            (FieldKind::Scalar(ValueType::Scalar(codec)), Slot::Value(current)) => {
                store(current, read_value(&field.name, *codec, reader, limits)?)
            }
            (FieldKind::Scalar(ValueType::Struct(_)), Slot::Struct(nested)) => {
                read_holder_diff(nested, granted, reader, limits, depth + 1)?
            }
            (FieldKind::Array { element, bits, .. }, Slot::Array(values)) => match bits {
                ArrayBits::Shared => {
                    let mut changed = false;
                    for current in values.iter_mut() {
                        changed |= store(current, read_value(&field.name, *element, reader, limits)?);
                    }
                    changed
                }
                ArrayBits::PerSlot => {
                    let value = read_value(&field.name, *element, reader, limits)?;
                    match values.get_mut(usize::from(owner.slot)) {
                        Some(current) => store(current, value),
                        None => {
                            return Err(CodecError::InvalidMask {
                                reason: MaskReason::UnknownBit { bit },
                            })
                        }
                    }
                }
            },
            (FieldKind::Dynamic { element, len_bits }, Slot::Dynamic(dynamic)) => {
                read_dynamic_diff(field, element, *len_bits, dynamic, granted, reader, limits, depth)?
            }
            (FieldKind::Optional { value, .. }, Slot::Optional(optional)) => {
                read_optional_diff(field, value, optional, granted, reader, limits, depth)?
            }
            (_, slot) => return Err(slot_mismatch(field, slot)),
        };
        if changed {
            mask.set(bit);
            if let Some(block) = field.block_bit {
                mask.set_block(block);
            }
            any = true;
        }
    }
    Ok(any)
}

#[allow(clippy::too_many_arguments)]
fn read_dynamic_diff(
    field: &FieldDef,
    ty: &ValueType,
    len_bits: u8,
    dynamic: &mut DynamicField,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    let len = read_len(reader, len_bits, limits)?;
    let word_count = len.div_ceil(WORD_BITS as usize);
    let mut words = Vec::with_capacity(word_count);
    for _ in 0..word_count {
        words.push(reader.read_bits(WORD_BITS as u8)? as u32);
    }
    let flags = ElementMask::from_words(words);

    let mut changed = dynamic.resize_default(len, ty);
    for index in flags.iter() {
        let Some(element) = dynamic.elements_mut().get_mut(index) else {
            return Err(CodecError::InvalidMask {
                reason: MaskReason::ElementOutOfRange { index, len },
            });
        };
        let element_changed = match (ty, element) {
            (ValueType::Scalar(codec), Element::Value(current)) => {
                store(current, read_value(&field.name, *codec, reader, limits)?)
            }
            (ValueType::Struct(schema), Element::Struct(holder)) => {
                if reader.read_bit()? {
                    read_replacement(schema, holder, granted, reader, limits, depth)?
                } else {
                    read_holder_diff(holder, granted, reader, limits, depth + 1)?
                }
            }
            (_, element) => return Err(element_mismatch(field, element)),
        };
        if element_changed {
            dynamic.mark_changed(index);
            changed = true;
        }
    }
    Ok(changed)
}

/// Reads a full element into a fresh holder and swaps it in if it differs.
fn read_replacement(
    schema: &Arc<HolderSchema>,
    holder: &mut Holder,
    granted: Visibility,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
    depth: usize,
) -> CodecResult<bool> {
    let mut fresh = Holder::new(Arc::clone(schema));
    read_holder(&mut fresh, granted, reader, limits, depth + 1)?;
    if fresh == *holder {
        return Ok(false);
    }
    *holder = fresh;
    Ok(true)
}

fn read_optional_diff(
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
    match ty {
        ValueType::Scalar(codec) => {
            let value = read_value(&field.name, *codec, reader, limits)?;
            match optional.get_or_insert_with(|| Element::new(ty)) {
                Element::Value(current) => Ok(store(current, value) || created),
                element @ Element::Struct(_) => Err(element_mismatch(field, element)),
            }
        }
        ValueType::Struct(schema) => {
            let full = reader.read_bit()?;
            let element = optional.get_or_insert_with(|| Element::new(ty));
            let Element::Struct(holder) = element else {
                return Err(element_mismatch(field, element));
            };
            let changed = if full {
                read_replacement(schema, holder, granted, reader, limits, depth)?
            } else {
                read_holder_diff(holder, granted, reader, limits, depth + 1)?
            };
            Ok(changed || created)
        }
    }
}

#[cfg(test)]
mod tests {
    use schema::FieldCodec;

    use super::*;
    use crate::baseline::apply_baseline;
    use crate::value::FieldValue;

    fn schema() -> Arc<HolderSchema> {
        Arc::new(
            HolderSchema::builder("door")
                .field(FieldDef::scalar("open", 0, FieldCodec::bool()))
                .field(FieldDef::scalar("hp", 1, FieldCodec::uint(8)))
                .field(
                    FieldDef::scalar("lock", 2, FieldCodec::uint(8)).visibility(Visibility::OWNER),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn diff_bit_layout() {
        let mut holder = Holder::new(schema());
        holder.set("hp", 3u64);
        let bytes = encode_diff(&holder, Visibility::ANY_OBSERVER).unwrap();
        // 0100 | present 1 | word 0x0000_0002 | hp 00000011
        let mut writer = BitWriter::new();
        writer.write_bits(0b0100, 4).unwrap();
        writer.write_bit(true);
        writer.write_bits(2, 32).unwrap();
        writer.write_bits(3, 8).unwrap();
        assert_eq!(bytes, writer.finish());
    }

    #[test]
    fn hidden_change_yields_empty_diff() {
        let mut holder = Holder::new(schema());
        holder.set("lock", 1u64);
        let bytes = encode_diff(&holder, Visibility::ANY_OBSERVER).unwrap();
        // granted + a single clear presence bit
        assert_eq!(bytes, vec![0b0100_0000]);

        let mut replica = Holder::new(schema());
        assert!(!apply_diff(&mut replica, &bytes, &CodecLimits::for_testing()).unwrap());
        assert!(!replica.has_changes());
    }

    #[test]
    fn unknown_bit_rejected() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1111, 4).unwrap();
        writer.write_bit(true);
        writer.write_bits(1 << 9, 32).unwrap();
        let bytes = writer.finish();
        let err = apply_diff(
            &mut Holder::new(schema()),
            &bytes,
            &CodecLimits::for_testing(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidMask {
                reason: MaskReason::UnknownBit { bit: 9 }
            }
        );
    }

    #[test]
    fn truncated_diff_rejected() {
        let mut holder = Holder::new(schema());
        holder.set("hp", 3u64);
        let bytes = encode_diff(&holder, Visibility::ALL).unwrap();
        let err = apply_diff(
            &mut Holder::new(schema()),
            &bytes[..2],
            &CodecLimits::for_testing(),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::Bitstream(_)));
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut holder = Holder::new(schema());
        holder.set("open", true);
        holder.set("hp", 40u64);
        let bytes = encode_diff(&holder, Visibility::ALL).unwrap();

        let mut replica = Holder::new(schema());
        let limits = CodecLimits::for_testing();
        assert!(apply_diff(&mut replica, &bytes, &limits).unwrap());
        replica.clear_changes();
        assert!(!apply_diff(&mut replica, &bytes, &limits).unwrap());
        assert!(!replica.has_changes());
        assert_eq!(replica, holder);
    }

    #[test]
    fn baseline_then_diff_converges() {
        let mut holder = Holder::new(schema());
        holder.set("hp", 10u64);
        let baseline = crate::baseline::encode_baseline(&holder, Visibility::ALL).unwrap();
        holder.clear_changes();
        holder.set("lock", 5u64);
        let diff = encode_diff(&holder, Visibility::ALL).unwrap();

        let mut replica = Holder::new(schema());
        let limits = CodecLimits::for_testing();
        apply_baseline(&mut replica, &baseline, &limits).unwrap();
        apply_diff(&mut replica, &diff, &limits).unwrap();
        assert_eq!(replica, holder);
        assert_eq!(replica.get("lock"), Some(&FieldValue::UInt(5)));
    }
}
