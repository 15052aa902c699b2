//! Field codec, field kind and field definition types.

use std::sync::Arc;

use crate::{HolderSchema, Visibility};

/// Default width of a dynamic collection's length field.
pub const DEFAULT_LEN_BITS: u8 = 32;

/// Fixed-point quantization parameters (all integer-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FixedPoint {
    /// Minimum quantized value.
    pub min_q: i64,
    /// Maximum quantized value.
    pub max_q: i64,
    /// Units per 1.0 (e.g., 100 => 0.01 resolution).
    pub scale: u32,
}

impl FixedPoint {
    /// Creates a fixed-point configuration from quantized bounds and scale.
    #[must_use]
    pub const fn new(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self {
            min_q,
            max_q,
            scale,
        }
    }

    /// Returns the width of the quantized range.
    #[must_use]
    pub const fn range(&self) -> u64 {
        self.max_q.abs_diff(self.min_q)
    }

    /// Returns `true` if `value_q` lies within the quantized bounds.
    #[must_use]
    pub const fn contains(&self, value_q: i64) -> bool {
        value_q >= self.min_q && value_q <= self.max_q
    }
}

/// The encoding for a scalar value (representation only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FieldCodec {
    /// Boolean (1 bit).
    Bool,

    /// Unsigned integer with fixed bit width.
    UInt { bits: u8 },

    /// Signed integer with fixed bit width.
    SInt { bits: u8 },

    /// Variable-length unsigned integer.
    VarUInt,

    /// Variable-length signed integer (zigzag encoded).
    VarSInt,

    /// Fixed-point number with quantization.
    FixedPoint(FixedPoint),

    /// UTF-8 string with a byte-length cap.
    Str { max_len: u32 },

    /// 128-bit entity identifier.
    Guid,
}

impl FieldCodec {
    /// Creates a boolean field codec.
    #[must_use]
    pub const fn bool() -> Self {
        Self::Bool
    }

    /// Creates an unsigned integer field codec.
    #[must_use]
    pub const fn uint(bits: u8) -> Self {
        Self::UInt { bits }
    }

    /// Creates a signed integer field codec.
    #[must_use]
    pub const fn sint(bits: u8) -> Self {
        Self::SInt { bits }
    }

    /// Creates a variable-length unsigned integer field codec.
    #[must_use]
    pub const fn var_uint() -> Self {
        Self::VarUInt
    }

    /// Creates a variable-length signed integer field codec.
    #[must_use]
    pub const fn var_sint() -> Self {
        Self::VarSInt
    }

    /// Creates a fixed-point field codec.
    #[must_use]
    pub const fn fixed_point(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self::FixedPoint(FixedPoint::new(min_q, max_q, scale))
    }

    /// Creates a string field codec capped at `max_len` bytes.
    #[must_use]
    pub const fn string(max_len: u32) -> Self {
        Self::Str { max_len }
    }

    /// Creates an entity identifier field codec.
    #[must_use]
    pub const fn guid() -> Self {
        Self::Guid
    }
}

/// The type of a value stored in a field slot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ValueType {
    /// A scalar value.
    Scalar(FieldCodec),
    /// A nested holder with its own change mask.
    Struct(Arc<HolderSchema>),
}

impl ValueType {
    /// Returns the nested schema for struct values.
    #[must_use]
    pub fn as_struct(&self) -> Option<&Arc<HolderSchema>> {
        match self {
            Self::Struct(schema) => Some(schema),
            Self::Scalar(_) => None,
        }
    }

    /// Returns `true` for nested holder values.
    #[must_use]
    pub const fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(_))
    }
}

impl From<FieldCodec> for ValueType {
    fn from(codec: FieldCodec) -> Self {
        Self::Scalar(codec)
    }
}

impl From<Arc<HolderSchema>> for ValueType {
    fn from(schema: Arc<HolderSchema>) -> Self {
        Self::Struct(schema)
    }
}

/// How a fixed array maps its slots onto mask bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ArrayBits {
    /// One bit covers the whole array; any slot change resends every slot.
    #[default]
    Shared,
    /// Slot `i` maps to bit `first_bit + i`.
    PerSlot,
}

/// Where an optional value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum OptionalStorage {
    /// Stored directly inside the enclosing holder.
    Inline,
    /// Stored in a separately owned allocation.
    Boxed,
}

/// The shape of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FieldKind {
    /// A single value (a struct value is a nested holder).
    Scalar(ValueType),
    /// `len` scalar slots, fixed at schema-definition time.
    Array {
        element: FieldCodec,
        len: u16,
        bits: ArrayBits,
    },
    /// An ordered, variable-length collection.
    Dynamic { element: ValueType, len_bits: u8 },
    /// Zero or one value, constructed on first write.
    Optional {
        value: ValueType,
        storage: OptionalStorage,
    },
}

/// Field definition within a holder schema.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// First mask bit owned by the field.
    pub bit: u32,
    /// Coalescing block bit explicitly marked alongside `bit`.
    pub block_bit: Option<u32>,
    pub visibility: Visibility,
}

impl FieldDef {
    /// Creates a field definition with the default visibility.
    #[must_use]
    pub fn new(name: impl Into<String>, bit: u32, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bit,
            block_bit: None,
            visibility: Visibility::ANY_OBSERVER,
        }
    }

    /// Creates a scalar field.
    #[must_use]
    pub fn scalar(name: impl Into<String>, bit: u32, codec: FieldCodec) -> Self {
        Self::new(name, bit, FieldKind::Scalar(ValueType::Scalar(codec)))
    }

    /// Creates a nested holder field.
    #[must_use]
    pub fn nested(name: impl Into<String>, bit: u32, schema: Arc<HolderSchema>) -> Self {
        Self::new(name, bit, FieldKind::Scalar(ValueType::Struct(schema)))
    }

    /// Creates a fixed array field sharing a single bit.
    #[must_use]
    pub fn array(name: impl Into<String>, bit: u32, element: FieldCodec, len: u16) -> Self {
        Self::new(
            name,
            bit,
            FieldKind::Array {
                element,
                len,
                bits: ArrayBits::Shared,
            },
        )
    }

    /// Creates a dynamic collection field with a 32-bit length field.
    #[must_use]
    pub fn dynamic(name: impl Into<String>, bit: u32, element: impl Into<ValueType>) -> Self {
        Self::new(
            name,
            bit,
            FieldKind::Dynamic {
                element: element.into(),
                len_bits: DEFAULT_LEN_BITS,
            },
        )
    }

    /// Creates an optional field. Scalars are stored inline, structs boxed.
    #[must_use]
    pub fn optional(name: impl Into<String>, bit: u32, value: impl Into<ValueType>) -> Self {
        let value = value.into();
        let storage = if value.is_struct() {
            OptionalStorage::Boxed
        } else {
            OptionalStorage::Inline
        };
        Self::new(name, bit, FieldKind::Optional { value, storage })
    }

    /// Sets the coalescing block bit.
    #[must_use]
    pub const fn block_bit(mut self, block_bit: u32) -> Self {
        self.block_bit = Some(block_bit);
        self
    }

    /// Sets the visibility tags.
    #[must_use]
    pub const fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Overrides optional storage. No effect on other kinds.
    #[must_use]
    pub fn storage(mut self, storage: OptionalStorage) -> Self {
        if let FieldKind::Optional { storage: s, .. } = &mut self.kind {
            *s = storage;
        }
        self
    }

    /// Overrides the dynamic length field width. No effect on other kinds.
    #[must_use]
    pub fn len_bits(mut self, bits: u8) -> Self {
        if let FieldKind::Dynamic { len_bits, .. } = &mut self.kind {
            *len_bits = bits;
        }
        self
    }

    /// Gives each array slot its own bit. No effect on other kinds.
    #[must_use]
    pub fn per_slot(mut self) -> Self {
        if let FieldKind::Array { bits, .. } = &mut self.kind {
            *bits = ArrayBits::PerSlot;
        }
        self
    }

    /// Number of consecutive mask bits owned by the field.
    #[must_use]
    pub const fn bit_span(&self) -> u32 {
        match self.kind {
            FieldKind::Array {
                len,
                bits: ArrayBits::PerSlot,
                ..
            } => len as u32,
            _ => 1,
        }
    }

    /// Returns `true` if the field is ever sent to observers.
    #[must_use]
    pub const fn is_replicated(&self) -> bool {
        !self.visibility.is_empty()
    }
}
