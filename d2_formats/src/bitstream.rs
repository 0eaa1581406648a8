// SPDX-License-Identifier: GPL-2.0-or-later
//
// LSB-first bit reader and writer used by the DCC codec.
//
// Bits are consumed starting from bit 0 of each byte, and the first bit read
// lands in bit 0 of the returned value. Every reader is bounded by a bit
// length, so sub-streams that do not end on a byte boundary still fail
// cleanly when read past their declared size.

use crate::dcc::DccError;

/// Largest field width the format can describe.
pub const MAX_FIELD_WIDTH: u32 = 32;

/// Forward-only cursor over a bounded run of bits.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_len: usize,
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_len: data.len() * 8,
            position: 0,
        }
    }

    /// Reader limited to the first `bit_len` bits of `data`.
    pub fn with_bit_len(data: &'a [u8], bit_len: usize) -> Self {
        Self {
            data,
            bit_len: bit_len.min(data.len() * 8),
            position: 0,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bit_len - self.position
    }

    fn ensure_available(&self, requested: usize) -> Result<(), DccError> {
        if requested > self.remaining() {
            return Err(DccError::BufferUnderrun {
                requested,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Read an unsigned field of `width` bits (0..=32).
    pub fn read_bits(&mut self, width: u32) -> Result<u32, DccError> {
        if width > MAX_FIELD_WIDTH {
            return Err(DccError::UnsupportedFeature(format!(
                "bit field width {width} exceeds {MAX_FIELD_WIDTH}"
            )));
        }
        let width = width as usize;
        self.ensure_available(width)?;

        let mut value: u64 = 0;
        let mut filled = 0usize;
        while filled < width {
            let byte = self.data[self.position / 8];
            let shift = self.position % 8;
            let take = (8 - shift).min(width - filled);
            let bits = (byte >> shift) as u64 & ((1u64 << take) - 1);
            value |= bits << filled;
            filled += take;
            self.position += take;
        }
        Ok(value as u32)
    }

    /// Read a two's complement field of `width` bits, sign-extended to 32 bits.
    pub fn read_signed_bits(&mut self, width: u32) -> Result<i32, DccError> {
        let raw = self.read_bits(width)?;
        if width == 0 || width >= 32 {
            return Ok(raw as i32);
        }
        let shift = 32 - width;
        Ok(((raw << shift) as i32) >> shift)
    }

    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, DccError> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Consume exactly `bit_count` bits and return them re-packed from bit 0.
    pub fn read_stream(&mut self, bit_count: usize) -> Result<BitStream, DccError> {
        self.ensure_available(bit_count)?;

        let mut bytes = Vec::with_capacity(bit_count.div_ceil(8));
        if self.position % 8 == 0 {
            let start = self.position / 8;
            bytes.extend_from_slice(&self.data[start..start + bit_count / 8]);
            self.position += (bit_count / 8) * 8;
        } else {
            for _ in 0..bit_count / 8 {
                bytes.push(self.read_bits(8)? as u8);
            }
        }
        let tail = bit_count % 8;
        if tail != 0 {
            bytes.push(self.read_bits(tail as u32)? as u8);
        }

        Ok(BitStream {
            bytes,
            bit_len: bit_count,
        })
    }
}

/// Owned sub-stream with an exact bit length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitStream {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitStream {
    pub fn new(bytes: Vec<u8>, bit_len: usize) -> Self {
        let bit_len = bit_len.min(bytes.len() * 8);
        Self { bytes, bit_len }
    }

    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reader(&self) -> BitReader<'_> {
        BitReader::with_bit_len(&self.bytes, self.bit_len)
    }

    /// Reader resumed at an absolute bit position.
    pub fn reader_at(&self, position: usize) -> Result<BitReader<'_>, DccError> {
        if position > self.bit_len {
            return Err(DccError::BufferUnderrun {
                requested: position,
                available: self.bit_len,
            });
        }
        let mut reader = self.reader();
        reader.position = position;
        Ok(reader)
    }
}

/// Inverse of [`BitReader`]; used to author DCC payloads for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Append the low `width` bits of `value`.
    pub fn write_bits(&mut self, value: u32, width: u32) {
        debug_assert!(width <= MAX_FIELD_WIDTH);
        for bit in 0..width {
            self.push_bit((value >> bit) & 1 == 1);
        }
    }

    /// Append a signed field in two's complement, truncated to `width` bits.
    pub fn write_signed_bits(&mut self, value: i32, width: u32) {
        self.write_bits(value as u32, width);
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.push_bit(bit);
    }

    /// Append every bit of another stream.
    pub fn write_stream(&mut self, stream: &BitStream) {
        let mut reader = stream.reader();
        while reader.remaining() > 0 {
            let take = reader.remaining().min(8) as u32;
            // Bounded by `remaining`, so this read cannot fail.
            if let Ok(bits) = reader.read_bits(take) {
                self.write_bits(bits, take);
            }
        }
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn into_stream(self) -> BitStream {
        BitStream {
            bytes: self.bytes,
            bit_len: self.bit_len,
        }
    }

    /// Zero-padded bytes; the final partial byte keeps its unused high bits clear.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_lsb_first_across_byte_boundaries() {
        // 0b1011_0101, 0b0000_0011
        let data = [0xB5, 0x03];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(7).unwrap(), 0b11_10110);
        assert_eq!(reader.position(), 10);
        assert_eq!(reader.remaining(), 6);
    }

    #[test]
    fn zero_width_reads_consume_nothing() {
        let data = [0xFF];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(0).unwrap(), 0);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn full_width_reads_are_little_endian() {
        let data = 0xDEAD_BEEFu32.to_le_bytes();
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(32).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn signed_fields_are_sign_extended() {
        let mut writer = BitWriter::new();
        writer.write_signed_bits(-3, 6);
        writer.write_signed_bits(17, 6);
        writer.write_signed_bits(-1, 32);
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_signed_bits(6).unwrap(), -3);
        assert_eq!(reader.read_signed_bits(6).unwrap(), 17);
        assert_eq!(reader.read_signed_bits(32).unwrap(), -1);
    }

    #[test]
    fn reading_past_the_declared_length_underruns() {
        let data = [0xFF, 0xFF];
        let mut reader = BitReader::with_bit_len(&data, 9);
        reader.read_bits(8).unwrap();
        let err = reader.read_bits(2).unwrap_err();
        assert!(matches!(
            err,
            DccError::BufferUnderrun {
                requested: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn widths_above_32_are_rejected() {
        let data = [0u8; 8];
        let mut reader = BitReader::new(&data);
        assert!(matches!(
            reader.read_bits(33),
            Err(DccError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn unaligned_streams_are_repacked() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        writer.write_bits(0x1A5, 9);
        writer.write_bits(0b11, 2);
        let bytes = writer.into_bytes();

        let mut reader = BitReader::new(&bytes);
        reader.read_bits(3).unwrap();
        let stream = reader.read_stream(9).unwrap();
        assert_eq!(stream.bit_len(), 9);
        assert_eq!(stream.as_bytes(), &[0xA5, 0x01]);
        assert_eq!(reader.read_bits(2).unwrap(), 0b11);

        let mut sub = stream.reader();
        assert_eq!(sub.read_bits(9).unwrap(), 0x1A5);
        assert!(sub.read_bit().is_err());
    }

    #[test]
    fn resumes_streams_at_a_saved_position() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xF, 4);
        writer.write_bits(0b10, 2);
        let stream = writer.into_stream();

        let mut resumed = stream.reader_at(4).unwrap();
        assert_eq!(resumed.read_bits(2).unwrap(), 0b10);
        assert!(stream.reader_at(7).is_err());
    }
}
