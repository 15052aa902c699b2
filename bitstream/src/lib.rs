//! Bit packing primitives for fieldsync.
//!
//! This crate provides [`BitWriter`] and [`BitReader`], the two halves used by
//! the change-mask wire builder to emit and consume packed field payloads.
//!
//! # Design Principles
//!
//! - **No unsafe code** - Safety is paramount.
//! - **Bounded reads** - Every read is bounds-checked and returns an error on malformed input.
//! - **No domain knowledge** - This crate knows nothing about holders, masks, or observers.
//! - **MSB-first packing** - Bits fill each byte from the most significant bit down.
//!
//! # Example
//!
//! ```
//! use bitstream::{BitReader, BitWriter};
//!
//! let mut writer = BitWriter::new();
//! writer.write_bit(true);
//! writer.write_bits(42, 7).unwrap();
//! writer.align_to_byte();
//! writer.write_varu64(300).unwrap();
//!
//! let bytes = writer.finish();
//!
//! let mut reader = BitReader::new(&bytes);
//! assert!(reader.read_bit().unwrap());
//! assert_eq!(reader.read_bits(7).unwrap(), 42);
//! reader.align_to_byte().unwrap();
//! assert_eq!(reader.read_varu64().unwrap(), 300);
//! ```

mod error;
mod reader;
mod writer;

pub use error::{BitError, BitResult};
pub use reader::BitReader;
pub use writer::BitWriter;

/// Returns the number of bits needed to represent every value in `0..=max`.
#[must_use]
pub const fn bits_for(max: u64) -> u8 {
    (u64::BITS - max.leading_zeros()) as u8
}
