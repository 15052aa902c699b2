//! Bit-level reader with bounded operations.

use crate::error::{BitError, BitResult};

/// Maximum encoded length of a LEB128 `u64`.
const VARU64_MAX_BYTES: usize = 10;

/// A bit-level reader for decoding packed binary data.
///
/// All read operations are bounds-checked and return errors on failure.
/// The reader never panics on malformed input.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` from a byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Returns the number of bits remaining to read.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.data
            .len()
            .saturating_mul(8)
            .saturating_sub(self.bit_pos)
    }

    /// Returns `true` if there are no more bits to read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Returns the current bit position.
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Reads a single bit as a boolean.
    pub fn read_bit(&mut self) -> BitResult<bool> {
        self.ensure_bits(1)?;
        let byte = self.data[self.bit_pos / 8];
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
        self.bit_pos += 1;
        Ok(bit == 1)
    }

    /// Reads up to 64 bits as an unsigned integer.
    pub fn read_bits(&mut self, bits: u8) -> BitResult<u64> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        self.ensure_bits(bits as usize)?;

        let mut value = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            let offset = (self.bit_pos % 8) as u8;
            let available = 8 - offset;
            let take = available.min(remaining);
            let byte = self.data[self.bit_pos / 8];
            let chunk = (byte >> (available - take)) & (((1u16 << take) - 1) as u8);
            value = (value << take) | u64::from(chunk);
            self.bit_pos += take as usize;
            remaining -= take;
        }
        Ok(value)
    }

    /// Skips to the next byte boundary.
    pub fn align_to_byte(&mut self) -> BitResult<()> {
        let rem = self.bit_pos % 8;
        if rem == 0 {
            return Ok(());
        }
        let skip = 8 - rem;
        self.ensure_bits(skip)?;
        self.bit_pos += skip;
        Ok(())
    }

    /// Reads a byte-aligned `u8`.
    pub fn read_u8_aligned(&mut self) -> BitResult<u8> {
        let bytes = self.read_bytes_aligned(1)?;
        Ok(bytes[0])
    }

    /// Reads a byte-aligned LEB128 varint `u64`.
    pub fn read_varu64(&mut self) -> BitResult<u64> {
        self.ensure_aligned()?;
        let mut result = 0u64;
        for idx in 0..VARU64_MAX_BYTES {
            let byte = self.read_u8_aligned()?;
            let payload = u64::from(byte & 0x7F);
            let shift = idx * 7;
            if shift == 63 && payload > 1 {
                return Err(BitError::InvalidVarint);
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(BitError::InvalidVarint)
    }

    /// Reads a byte-aligned zigzag varint `i64`.
    pub fn read_vars64(&mut self) -> BitResult<i64> {
        let raw = self.read_varu64()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// Reads `len` raw bytes at a byte boundary.
    pub fn read_bytes_aligned(&mut self, len: usize) -> BitResult<&'a [u8]> {
        self.ensure_aligned()?;
        self.ensure_bits(len.saturating_mul(8))?;
        let start = self.bit_pos / 8;
        let bytes = &self.data[start..start + len];
        self.bit_pos += len * 8;
        Ok(bytes)
    }

    fn ensure_aligned(&self) -> BitResult<()> {
        if self.bit_pos % 8 != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bit_pos,
            });
        }
        Ok(())
    }

    fn ensure_bits(&self, bits: usize) -> BitResult<()> {
        let available = self.bits_remaining();
        if bits > available {
            return Err(BitError::UnexpectedEof {
                requested: bits,
                available,
            });
        }
        Ok(())
    }
}
