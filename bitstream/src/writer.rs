//! Bit-level writer for encoding packed binary data.

use crate::error::{BitError, BitResult};

/// A growable, MSB-first bit writer.
///
/// Bits are packed from the most significant bit of each byte downward.
/// Call [`finish`](Self::finish) to get the final byte buffer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    /// Completed bytes.
    bytes: Vec<u8>,
    /// Byte under construction, left-aligned.
    current: u8,
    /// Number of bits used in `current` (0-7).
    used: u8,
}

impl BitWriter {
    /// Creates a new empty `BitWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `BitWriter` with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            current: 0,
            used: 0,
        }
    }

    /// Returns the number of bits written so far.
    #[must_use]
    pub fn bits_written(&self) -> usize {
        self.bytes.len() * 8 + self.used as usize
    }

    /// Returns `true` if the write position is on a byte boundary.
    #[must_use]
    pub const fn is_aligned(&self) -> bool {
        self.used == 0
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, value: bool) {
        if value {
            self.current |= 0x80 >> self.used;
        }
        self.used += 1;
        if self.used == 8 {
            self.flush_current();
        }
    }

    /// Writes the low `bits` bits of `value`, most significant first.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`.
    /// Returns [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`.
    pub fn write_bits(&mut self, value: u64, bits: u8) -> BitResult<()> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        if bits < 64 && value >> bits != 0 {
            return Err(BitError::ValueOutOfRange { value, bits });
        }

        let mut remaining = bits;
        while remaining > 0 {
            let free = 8 - self.used;
            let take = free.min(remaining);
            let shift = remaining - take;
            let chunk = ((value >> shift) & ((1u64 << take) - 1)) as u8;
            self.current |= chunk << (free - take);
            self.used += take;
            remaining -= take;
            if self.used == 8 {
                self.flush_current();
            }
        }
        Ok(())
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        if self.used > 0 {
            self.flush_current();
        }
    }

    /// Writes a byte-aligned `u8`.
    pub fn write_u8_aligned(&mut self, value: u8) -> BitResult<()> {
        self.ensure_aligned()?;
        self.bytes.push(value);
        Ok(())
    }

    /// Writes a byte-aligned LEB128 varint `u64`.
    pub fn write_varu64(&mut self, mut value: u64) -> BitResult<()> {
        self.ensure_aligned()?;
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                return Ok(());
            }
            self.bytes.push(byte | 0x80);
        }
    }

    /// Writes a byte-aligned zigzag varint `i64`.
    pub fn write_vars64(&mut self, value: i64) -> BitResult<()> {
        let zigzag = ((value << 1) ^ (value >> 63)) as u64;
        self.write_varu64(zigzag)
    }

    /// Writes raw bytes at a byte boundary.
    pub fn write_bytes_aligned(&mut self, bytes: &[u8]) -> BitResult<()> {
        self.ensure_aligned()?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Finishes writing and returns the byte buffer.
    ///
    /// If the last byte is incomplete, it is padded with zeros on the right.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.align_to_byte();
        self.bytes
    }

    fn flush_current(&mut self) {
        self.bytes.push(self.current);
        self.current = 0;
        self.used = 0;
    }

    fn ensure_aligned(&self) -> BitResult<()> {
        if self.used != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bits_written(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_writer() {
        let writer = BitWriter::new();
        assert_eq!(writer.bits_written(), 0);
        assert!(writer.finish().is_empty());
    }

    #[test]
    fn write_single_bit_true() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        assert_eq!(writer.bits_written(), 1);
        // Single bit 1, padded with 7 zeros
        assert_eq!(writer.finish(), vec![0b1000_0000]);
    }

    #[test]
    fn write_full_byte_of_bits() {
        let mut writer = BitWriter::new();
        for bit in [true, false, true, false, true, false, true, false] {
            writer.write_bit(bit);
        }
        assert!(writer.is_aligned());
        assert_eq!(writer.finish(), vec![0b1010_1010]);
    }

    #[test]
    fn write_bits_zero_width() {
        let mut writer = BitWriter::new();
        writer.write_bits(0, 0).unwrap();
        assert_eq!(writer.bits_written(), 0);
    }

    #[test]
    fn write_bits_across_byte_boundary() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1111, 4).unwrap();
        writer.write_bits(0b1010_1010, 8).unwrap();
        // 1111 + 10101010 = 1111_1010 1010_0000
        assert_eq!(writer.finish(), vec![0b1111_1010, 0b1010_0000]);
    }

    #[test]
    fn write_bits_multiple_bytes() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xABCD, 16).unwrap();
        assert_eq!(writer.finish(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn write_bits_64_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(u64::MAX, 64).unwrap();
        assert_eq!(writer.finish(), vec![0xFF; 8]);
    }

    #[test]
    fn write_bits_invalid_count() {
        let mut writer = BitWriter::new();
        let result = writer.write_bits(0, 65);
        assert!(matches!(
            result,
            Err(BitError::InvalidBitCount {
                bits: 65,
                max_bits: 64
            })
        ));
    }

    #[test]
    fn write_bits_value_out_of_range() {
        let mut writer = BitWriter::new();
        let result = writer.write_bits(256, 8);
        assert!(matches!(
            result,
            Err(BitError::ValueOutOfRange {
                value: 256,
                bits: 8
            })
        ));
    }

    #[test]
    fn aligned_write_requires_alignment() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        let err = writer.write_u8_aligned(1).unwrap_err();
        assert_eq!(err, BitError::MisalignedAccess { bit_position: 1 });
        writer.align_to_byte();
        writer.write_u8_aligned(1).unwrap();
        assert_eq!(writer.finish(), vec![0b1000_0000, 1]);
    }

    #[test]
    fn varint_encoding() {
        let mut writer = BitWriter::new();
        writer.write_varu64(300).unwrap();
        writer.write_vars64(-1).unwrap();
        assert_eq!(writer.finish(), vec![0xAC, 0x02, 0x01]);
    }

    #[test]
    fn aligned_bytes_follow_padding() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b11, 2).unwrap();
        writer.align_to_byte();
        writer.write_bytes_aligned(b"ok").unwrap();
        assert_eq!(writer.finish(), vec![0b1100_0000, b'o', b'k']);
    }
}
