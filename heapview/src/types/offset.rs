/*!
Abstraction over the process word width of the analyzed image.
*/

use std::fmt;
use std::hash::Hash;
use std::ops;

use byteorder::{ByteOrder, LittleEndian};

/// The process-word sized unsigned integer the entire analysis model is
/// parameterized on.
///
/// Implemented for `u32` and `u64` so one build handles both address widths.
/// All reads are little-endian; big-endian targets are not supported.
pub trait Offset:
    'static
    + Copy
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + fmt::LowerHex
    + fmt::UpperHex
    + ops::Add<Output = Self>
    + ops::Sub<Output = Self>
    + ops::BitAnd<Output = Self>
    + ops::BitOr<Output = Self>
    + ops::Not<Output = Self>
{
    /// Size of the word in bytes.
    const BYTES: usize;

    const ZERO: Self;

    fn from_usize(value: usize) -> Self;

    fn as_usize(self) -> usize;

    fn as_u64(self) -> u64;

    /// Truncates the value to the word width.
    fn from_u64(value: u64) -> Self;

    fn checked_add(self, other: Self) -> Option<Self>;

    fn checked_sub(self, other: Self) -> Option<Self>;

    /// Decodes a little-endian word from the start of `buf`.
    ///
    /// `buf` must hold at least `Self::BYTES` bytes.
    fn read_le(buf: &[u8]) -> Self;

    /// Encodes the value as a little-endian word into the start of `buf`.
    fn write_le(self, buf: &mut [u8]);

    /// The word size as an `Offset` value.
    fn word() -> Self {
        Self::from_usize(Self::BYTES)
    }

    /// `count` words expressed in bytes.
    fn words(count: usize) -> Self {
        Self::from_usize(count * Self::BYTES)
    }

    fn is_word_aligned(self) -> bool {
        self.as_u64() % Self::BYTES as u64 == 0
    }
}

impl Offset for u32 {
    const BYTES: usize = 4;

    const ZERO: Self = 0;

    fn from_usize(value: usize) -> Self {
        value as u32
    }

    fn as_usize(self) -> usize {
        self as usize
    }

    fn as_u64(self) -> u64 {
        u64::from(self)
    }

    fn from_u64(value: u64) -> Self {
        value as u32
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        u32::checked_add(self, other)
    }

    fn checked_sub(self, other: Self) -> Option<Self> {
        u32::checked_sub(self, other)
    }

    fn read_le(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }

    fn write_le(self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, self)
    }
}

impl Offset for u64 {
    const BYTES: usize = 8;

    const ZERO: Self = 0;

    fn from_usize(value: usize) -> Self {
        value as u64
    }

    fn as_usize(self) -> usize {
        self as usize
    }

    fn as_u64(self) -> u64 {
        self
    }

    fn from_u64(value: u64) -> Self {
        value
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        u64::checked_add(self, other)
    }

    fn checked_sub(self, other: Self) -> Option<Self> {
        u64::checked_sub(self, other)
    }

    fn read_le(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }

    fn write_le(self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_sizes() {
        assert_eq!(<u32 as Offset>::BYTES, 4);
        assert_eq!(<u64 as Offset>::BYTES, 8);
        assert_eq!(<u32 as Offset>::words(3), 12);
        assert_eq!(<u64 as Offset>::words(3), 24);
    }

    #[test]
    fn test_read_write_le() {
        let mut buf = [0u8; 8];
        0x1122_3344_5566_7788u64.write_le(&mut buf);
        assert_eq!(u64::read_le(&buf), 0x1122_3344_5566_7788);
        assert_eq!(u32::read_le(&buf), 0x5566_7788);
    }

    #[test]
    fn test_alignment() {
        assert!(0x1000u64.is_word_aligned());
        assert!(!0x1004u64.is_word_aligned());
        assert!(0x1004u32.is_word_aligned());
    }
}
