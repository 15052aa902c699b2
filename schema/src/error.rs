//! Schema validation errors.

use std::fmt;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur when building or validating a schema.
///
/// Every variant is a schema-authoring defect, caught when the schema is
/// built rather than while replicating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Two fields share a name.
    DuplicateFieldName { name: String },

    /// Two fields claim the same mask bit.
    BitAliased {
        bit: u32,
        field: String,
        other: String,
    },

    /// A field's bits extend past the supported mask width.
    BitOutOfRange { field: String, bit: u32, max: u32 },

    /// A block bit does not name a block of the holder's mask.
    BlockBitOutOfRange {
        field: String,
        block_bit: u32,
        block_count: u32,
    },

    /// Fixed arrays need at least one slot.
    EmptyArray { field: String },

    /// Dynamic length fields must be 1..=32 bits wide.
    InvalidLengthBits { field: String, bits: u8 },

    /// Invalid bit width for fixed-width integers.
    InvalidBitWidth { bits: u8 },

    /// Fixed-point scale must be non-zero.
    InvalidFixedPointScale { scale: u32 },

    /// Fixed-point min/max range is invalid.
    InvalidFixedPointRange { min_q: i64, max_q: i64 },

    /// String fields need a non-zero byte cap.
    ZeroStringCapacity { field: String },

    /// A holder declares more fields than a `FieldKey` can address.
    TooManyFields { count: usize, max: usize },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateFieldName { name } => write!(f, "duplicate field name '{name}'"),
            Self::BitAliased { bit, field, other } => {
                write!(f, "fields '{other}' and '{field}' both use bit {bit}")
            }
            Self::BitOutOfRange { field, bit, max } => {
                write!(f, "field '{field}' uses bit {bit}, maximum is {max}")
            }
            Self::BlockBitOutOfRange {
                field,
                block_bit,
                block_count,
            } => write!(
                f,
                "field '{field}' uses block bit {block_bit} but the mask has {block_count} blocks"
            ),
            Self::EmptyArray { field } => write!(f, "array field '{field}' has no slots"),
            Self::InvalidLengthBits { field, bits } => write!(
                f,
                "dynamic field '{field}' has a {bits}-bit length field, expected 1..=32"
            ),
            Self::InvalidBitWidth { bits } => write!(f, "invalid integer bit width {bits}"),
            Self::InvalidFixedPointScale { scale } => {
                write!(f, "invalid fixed-point scale {scale}")
            }
            Self::InvalidFixedPointRange { min_q, max_q } => {
                write!(f, "invalid fixed-point range {min_q}..={max_q}")
            }
            Self::ZeroStringCapacity { field } => {
                write!(f, "string in field '{field}' has zero capacity")
            }
            Self::TooManyFields { count, max } => {
                write!(f, "{count} fields declared, maximum is {max}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}
