//! Scalar field values and their bit-level codecs.

use bitstream::{bits_for, BitReader, BitWriter};
use schema::FieldCodec;

use crate::error::{CodecError, CodecResult, LimitKind, ValueReason};
use crate::guid::EntityGuid;
use crate::limits::CodecLimits;

/// A scalar field value.
///
/// Fixed-width and variable-length integers share `UInt`/`SInt`; fixed-point
/// values are stored quantized as `SInt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    Bool(bool),
    UInt(u64),
    SInt(i64),
    Str(String),
    Guid(EntityGuid),
}

impl FieldValue {
    /// Returns the schema default for `codec`.
    #[must_use]
    pub fn default_for(codec: FieldCodec) -> Self {
        match codec {
            FieldCodec::Bool => Self::Bool(false),
            FieldCodec::UInt { .. } | FieldCodec::VarUInt => Self::UInt(0),
            FieldCodec::SInt { .. } | FieldCodec::VarSInt => Self::SInt(0),
            FieldCodec::FixedPoint(fp) => Self::SInt(if fp.contains(0) { 0 } else { fp.min_q }),
            FieldCodec::Str { .. } => Self::Str(String::new()),
            FieldCodec::Guid => Self::Guid(EntityGuid::EMPTY),
        }
    }

    /// Returns `true` if the value has the representation `codec` expects.
    #[must_use]
    pub const fn matches(&self, codec: FieldCodec) -> bool {
        matches!(
            (self, codec),
            (Self::Bool(_), FieldCodec::Bool)
                | (Self::UInt(_), FieldCodec::UInt { .. } | FieldCodec::VarUInt)
                | (
                    Self::SInt(_),
                    FieldCodec::SInt { .. } | FieldCodec::VarSInt | FieldCodec::FixedPoint(_)
                )
                | (Self::Str(_), FieldCodec::Str { .. })
                | (Self::Guid(_), FieldCodec::Guid)
        )
    }

    /// Short name of the value's representation.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::UInt(_) => "uint",
            Self::SInt(_) => "sint",
            Self::Str(_) => "string",
            Self::Guid(_) => "guid",
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SInt(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_guid(&self) -> Option<EntityGuid> {
        match self {
            Self::Guid(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! impl_from_unsigned {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                Self::UInt(u64::from(value))
            }
        })*
    };
}

macro_rules! impl_from_signed {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                Self::SInt(i64::from(value))
            }
        })*
    };
}

impl_from_unsigned!(u8, u16, u32, u64);
impl_from_signed!(i8, i16, i32, i64);

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<EntityGuid> for FieldValue {
    fn from(value: EntityGuid) -> Self {
        Self::Guid(value)
    }
}

pub(crate) const fn codec_name(codec: FieldCodec) -> &'static str {
    match codec {
        FieldCodec::Bool => "bool",
        FieldCodec::UInt { .. } => "uint",
        FieldCodec::SInt { .. } => "sint",
        FieldCodec::VarUInt => "varuint",
        FieldCodec::VarSInt => "varsint",
        FieldCodec::FixedPoint(_) => "fixed-point",
        FieldCodec::Str { .. } => "string",
        FieldCodec::Guid => "guid",
    }
}

/// Stores `value` into `slot`, returning `true` if it differed.
pub(crate) fn store(slot: &mut FieldValue, value: FieldValue) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn invalid(field: &str, reason: ValueReason) -> CodecError {
    CodecError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
}

pub(crate) fn write_value(
    field: &str,
    codec: FieldCodec,
    value: &FieldValue,
    writer: &mut BitWriter,
) -> CodecResult<()> {
    match (codec, value) {
        (FieldCodec::Bool, FieldValue::Bool(v)) => writer.write_bit(*v),
        (FieldCodec::UInt { bits }, FieldValue::UInt(v)) => {
            if bits < 64 && *v >> bits != 0 {
                return Err(invalid(
                    field,
                    ValueReason::UnsignedOutOfRange { bits, value: *v },
                ));
            }
            writer.write_bits(*v, bits)?;
        }
        (FieldCodec::SInt { bits }, FieldValue::SInt(v)) => {
            let encoded = encode_sint(field, bits, *v)?;
            writer.write_bits(encoded, bits)?;
        }
        (FieldCodec::VarUInt, FieldValue::UInt(v)) => {
            writer.align_to_byte();
            writer.write_varu64(*v)?;
        }
        (FieldCodec::VarSInt, FieldValue::SInt(v)) => {
            writer.align_to_byte();
            writer.write_vars64(*v)?;
        }
        (FieldCodec::FixedPoint(fp), FieldValue::SInt(v)) => {
            if !fp.contains(*v) {
                return Err(invalid(
                    field,
                    ValueReason::FixedPointOutOfRange {
                        min_q: fp.min_q,
                        max_q: fp.max_q,
                        value: *v,
                    },
                ));
            }
            let bits = bits_for(fp.range());
            if bits > 0 {
                writer.write_bits(v.abs_diff(fp.min_q), bits)?;
            }
        }
        (FieldCodec::Str { max_len }, FieldValue::Str(v)) => {
            if v.len() > max_len as usize {
                return Err(invalid(
                    field,
                    ValueReason::StringTooLong {
                        len: v.len(),
                        max_len,
                    },
                ));
            }
            writer.write_bits(v.len() as u64, bits_for(u64::from(max_len)))?;
            writer.align_to_byte();
            writer.write_bytes_aligned(v.as_bytes())?;
        }
        (FieldCodec::Guid, FieldValue::Guid(v)) => v.write_packed(writer)?,
        _ => {
            return Err(invalid(
                field,
                ValueReason::TypeMismatch {
                    expected: codec_name(codec),
                    found: value.kind_name(),
                },
            ));
        }
    }
    Ok(())
}

pub(crate) fn read_value(
    field: &str,
    codec: FieldCodec,
    reader: &mut BitReader<'_>,
    limits: &CodecLimits,
) -> CodecResult<FieldValue> {
    let value = match codec {
        FieldCodec::Bool => FieldValue::Bool(reader.read_bit()?),
        FieldCodec::UInt { bits } => FieldValue::UInt(reader.read_bits(bits)?),
        FieldCodec::SInt { bits } => FieldValue::SInt(decode_sint(bits, reader.read_bits(bits)?)),
        FieldCodec::VarUInt => {
            reader.align_to_byte()?;
            FieldValue::UInt(reader.read_varu64()?)
        }
        FieldCodec::VarSInt => {
            reader.align_to_byte()?;
            FieldValue::SInt(reader.read_vars64()?)
        }
        FieldCodec::FixedPoint(fp) => {
            let bits = bits_for(fp.range());
            let offset = if bits == 0 {
                0
            } else {
                reader.read_bits(bits)?
            };
            let value = fp.min_q.wrapping_add(offset as i64);
            if offset > fp.range() {
                return Err(invalid(
                    field,
                    ValueReason::FixedPointOutOfRange {
                        min_q: fp.min_q,
                        max_q: fp.max_q,
                        value,
                    },
                ));
            }
            FieldValue::SInt(value)
        }
        FieldCodec::Str { max_len } => {
            let len = reader.read_bits(bits_for(u64::from(max_len)))? as usize;
            if len > max_len as usize {
                return Err(invalid(field, ValueReason::StringTooLong { len, max_len }));
            }
            if len > limits.max_string_bytes {
                return Err(CodecError::LimitsExceeded {
                    kind: LimitKind::StringBytes,
                    limit: limits.max_string_bytes,
                    actual: len,
                });
            }
            reader.align_to_byte()?;
            let bytes = reader.read_bytes_aligned(len)?;
            let text =
                std::str::from_utf8(bytes).map_err(|_| invalid(field, ValueReason::InvalidUtf8))?;
            FieldValue::Str(text.to_owned())
        }
        FieldCodec::Guid => FieldValue::Guid(EntityGuid::read_packed(reader)?),
    };
    Ok(value)
}

fn encode_sint(field: &str, bits: u8, value: i64) -> CodecResult<u64> {
    if bits < 64 {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value < min || value > max {
            return Err(invalid(field, ValueReason::SignedOutOfRange { bits, value }));
        }
        Ok((value as u64) & ((1u64 << bits) - 1))
    } else {
        Ok(value as u64)
    }
}

fn decode_sint(bits: u8, raw: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - u32::from(bits);
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::IdentityClass;

    fn roundtrip(codec: FieldCodec, value: FieldValue) -> FieldValue {
        let mut writer = BitWriter::new();
        write_value("f", codec, &value, &mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        read_value("f", codec, &mut reader, &CodecLimits::for_testing()).unwrap()
    }

    #[test]
    fn defaults_match_codecs() {
        let codecs = [
            FieldCodec::bool(),
            FieldCodec::uint(8),
            FieldCodec::sint(8),
            FieldCodec::var_uint(),
            FieldCodec::var_sint(),
            FieldCodec::fixed_point(10, 20, 100),
            FieldCodec::string(8),
            FieldCodec::guid(),
        ];
        for codec in codecs {
            assert!(FieldValue::default_for(codec).matches(codec), "{codec:?}");
        }
        assert_eq!(
            FieldValue::default_for(FieldCodec::fixed_point(10, 20, 100)),
            FieldValue::SInt(10)
        );
    }

    #[test]
    fn signed_values_sign_extend() {
        for value in [-8i64, -1, 0, 7] {
            assert_eq!(
                roundtrip(FieldCodec::sint(4), FieldValue::SInt(value)),
                FieldValue::SInt(value)
            );
        }
        assert_eq!(
            roundtrip(FieldCodec::sint(64), FieldValue::SInt(i64::MIN)),
            FieldValue::SInt(i64::MIN)
        );
    }

    #[test]
    fn fixed_point_offsets_from_min() {
        let codec = FieldCodec::fixed_point(-500, 500, 100);
        for value in [-500i64, 0, 499, 500] {
            assert_eq!(roundtrip(codec, FieldValue::SInt(value)), FieldValue::SInt(value));
        }
        let single = FieldCodec::fixed_point(7, 7, 1);
        let mut writer = BitWriter::new();
        write_value("f", single, &FieldValue::SInt(7), &mut writer).unwrap();
        assert_eq!(writer.bits_written(), 0);
    }

    #[test]
    fn strings_and_guids_roundtrip() {
        let text = FieldValue::from("red");
        assert_eq!(roundtrip(FieldCodec::string(32), text.clone()), text);
        let guid = FieldValue::from(EntityGuid::realm_specific(IdentityClass::Item, 3, 77));
        assert_eq!(roundtrip(FieldCodec::guid(), guid.clone()), guid);
        let big = FieldValue::UInt(u64::MAX);
        assert_eq!(roundtrip(FieldCodec::var_uint(), big.clone()), big);
    }

    #[test]
    fn out_of_range_values_rejected() {
        let mut writer = BitWriter::new();
        let cases = [
            (FieldCodec::uint(4), FieldValue::UInt(16)),
            (FieldCodec::sint(4), FieldValue::SInt(8)),
            (FieldCodec::fixed_point(0, 10, 1), FieldValue::SInt(11)),
            (FieldCodec::string(2), FieldValue::from("red")),
            (FieldCodec::bool(), FieldValue::UInt(1)),
        ];
        for (codec, value) in cases {
            let err = write_value("f", codec, &value, &mut writer).unwrap_err();
            assert!(matches!(err, CodecError::InvalidValue { .. }), "{codec:?}");
        }
    }

    #[test]
    fn string_over_limit_rejected_on_read() {
        let mut writer = BitWriter::new();
        let long = "x".repeat(100);
        write_value("f", FieldCodec::string(200), &FieldValue::from(long), &mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let err = read_value(
            "f",
            FieldCodec::string(200),
            &mut reader,
            &CodecLimits::for_testing(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::LimitsExceeded {
                kind: LimitKind::StringBytes,
                ..
            }
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        // len = 1 in 2 bits, padding, then 0xFF
        let bytes = [0b0100_0000, 0xFF];
        let mut reader = BitReader::new(&bytes);
        let err = read_value(
            "f",
            FieldCodec::string(2),
            &mut reader,
            &CodecLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidValue {
                reason: ValueReason::InvalidUtf8,
                ..
            }
        ));
    }
}
