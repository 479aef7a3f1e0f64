/*!
Word-granular view over one allocation's payload.
*/

use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::mem::VirtualAddressMap;
use crate::types::Offset;

use super::finder::Allocation;

/// Exposes an allocation's bytes as a word-indexed range for recognizers
/// scanning payloads.
pub struct ContiguousImage<'a, O: Offset> {
    bytes: &'a [u8],
    _offset: PhantomData<O>,
}

impl<'a, O: Offset> ContiguousImage<'a, O> {
    /// Captures the payload of `allocation`.
    ///
    /// Fails with `NotMapped` when the payload is not fully backed by one
    /// mapped range.
    pub fn new(map: &VirtualAddressMap<'a, O>, allocation: &Allocation<O>) -> Result<Self> {
        let bytes = map.find_mapped_memory_image(allocation.address())?;
        let size = allocation.size().as_usize();
        if bytes.len() < size {
            return Err(Error::NotMapped);
        }
        Ok(Self {
            bytes: &bytes[..size],
            _offset: PhantomData,
        })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Number of whole words in the payload.
    pub fn word_count(&self) -> usize {
        self.bytes.len() / O::BYTES
    }

    /// The word at word-offset `k`.
    pub fn word(&self, k: usize) -> O {
        O::read_le(&self.bytes[k * O::BYTES..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{RangeAttributes, RangeFlags};

    #[test]
    fn test_words() {
        let mut image = vec![0u8; 0x100];
        image[0x10..0x18].copy_from_slice(&0xaabbu64.to_le_bytes());
        image[0x18..0x20].copy_from_slice(&0xccddu64.to_le_bytes());
        let map = VirtualAddressMap::<u64>::new(
            &image,
            vec![RangeAttributes::new(0x5000, 0x100, 0, RangeFlags::READ)],
        )
        .unwrap();

        let allocation = Allocation::new(0x5010, 0x14, true);
        let contiguous = ContiguousImage::new(&map, &allocation).unwrap();
        assert_eq!(contiguous.word_count(), 2);
        assert_eq!(contiguous.word(0), 0xaabb);
        assert_eq!(contiguous.word(1), 0xccdd);
    }

    #[test]
    fn test_partial_payload_fails() {
        let image = vec![0u8; 0x100];
        let map = VirtualAddressMap::<u64>::new(
            &image,
            vec![RangeAttributes::new(0x5000, 0x100, 0, RangeFlags::READ)],
        )
        .unwrap();

        let allocation = Allocation::new(0x50f0, 0x20, true);
        assert!(ContiguousImage::new(&map, &allocation).is_err());
    }
}
