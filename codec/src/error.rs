//! Error types for codec operations.

use std::fmt;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while building or applying baseline/diff payloads.
///
/// Mutation through accessors never fails; these errors come from the wire
/// builder (values that do not fit their codec) and from the reader
/// (malformed or hostile payloads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Bitstream error.
    Bitstream(bitstream::BitError),

    /// A dynamic collection is longer than its length field can express.
    LengthOverflow {
        field: String,
        len: usize,
        len_bits: u8,
    },

    /// Limits exceeded.
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    /// Invalid mask data.
    InvalidMask { reason: MaskReason },

    /// Invalid field value for the schema.
    InvalidValue { field: String, reason: ValueReason },

    /// Payload had trailing bytes after parsing.
    TrailingData { remaining_bits: usize },

    /// Nested holders deeper than the configured limit.
    DepthExceeded { limit: usize },
}

/// Specific limit that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    DynamicLen,
    StringBytes,
}

/// Details for invalid mask errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskReason {
    /// A set bit does not belong to any field.
    UnknownBit { bit: u32 },
    /// An element flag points past the collection length.
    ElementOutOfRange { index: usize, len: usize },
}

/// Details for invalid value errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueReason {
    UnsignedOutOfRange {
        bits: u8,
        value: u64,
    },
    SignedOutOfRange {
        bits: u8,
        value: i64,
    },
    FixedPointOutOfRange {
        min_q: i64,
        max_q: i64,
        value: i64,
    },
    StringTooLong {
        len: usize,
        max_len: u32,
    },
    InvalidUtf8,
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitstream(e) => write!(f, "bitstream error: {e}"),
            Self::LengthOverflow {
                field,
                len,
                len_bits,
            } => {
                write!(
                    f,
                    "length {len} of '{field}' does not fit its {len_bits}-bit length field"
                )
            }
            Self::LimitsExceeded {
                kind,
                limit,
                actual,
            } => {
                write!(f, "{kind} limit exceeded: {actual} > {limit}")
            }
            Self::InvalidMask { reason } => write!(f, "invalid mask: {reason}"),
            Self::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{field}': {reason}")
            }
            Self::TrailingData { remaining_bits } => {
                write!(f, "trailing data in payload: {remaining_bits} bits")
            }
            Self::DepthExceeded { limit } => {
                write!(f, "nesting deeper than {limit} levels")
            }
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DynamicLen => "dynamic length",
            Self::StringBytes => "string bytes",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for MaskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBit { bit } => write!(f, "bit {bit} does not map to a field"),
            Self::ElementOutOfRange { index, len } => {
                write!(f, "element {index} flagged but length is {len}")
            }
        }
    }
}

impl fmt::Display for ValueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsignedOutOfRange { bits, value } => {
                write!(f, "unsigned value {value} does not fit in {bits} bits")
            }
            Self::SignedOutOfRange { bits, value } => {
                write!(f, "signed value {value} does not fit in {bits} bits")
            }
            Self::FixedPointOutOfRange {
                min_q,
                max_q,
                value,
            } => {
                write!(f, "fixed-point value {value} outside [{min_q}, {max_q}]")
            }
            Self::StringTooLong { len, max_len } => {
                write!(f, "string of {len} bytes exceeds cap of {max_len}")
            }
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::TypeMismatch { expected, found } => {
                write!(f, "expected {expected} but got {found}")
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bitstream::BitError> for CodecError {
    fn from(err: bitstream::BitError) -> Self {
        Self::Bitstream(err)
    }
}
