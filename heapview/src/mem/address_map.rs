/*!
The virtual address map of the analyzed process.
*/

use crate::error::{Error, Result};
use crate::types::Offset;

bitflags! {
    /// Permission and backing attributes of one mapped range.
    pub struct RangeFlags: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXECUTE = 0b0100;
        const FILE_BACKED = 0b1000;
    }
}

/// One contiguous mapped range of the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeAttributes<O: Offset> {
    pub base: O,
    pub size: O,
    /// Position of the range's bytes within the backing image.
    pub file_offset: usize,
    pub flags: RangeFlags,
}

impl<O: Offset> RangeAttributes<O> {
    pub fn new(base: O, size: O, file_offset: usize, flags: RangeFlags) -> Self {
        Self {
            base,
            size,
            file_offset,
            flags,
        }
    }

    pub fn limit(&self) -> O {
        self.base + self.size
    }

    pub fn contains(&self, addr: O) -> bool {
        addr >= self.base && addr < self.limit()
    }
}

/// The `VirtualAddressMap` struct provides byte-accurate queries over the
/// mapped ranges of a core image.
///
/// It borrows the raw image bytes and an address-ordered segment list. All
/// queries are bounds checked; reads of unmapped addresses fail with
/// [`Error::NotMapped`](../error/enum.Error.html). Lookups are binary
/// searches over the sorted range vector, so the hot path never allocates.
pub struct VirtualAddressMap<'data, O: Offset> {
    image: &'data [u8],
    ranges: Vec<RangeAttributes<O>>,
}

impl<'data, O: Offset> VirtualAddressMap<'data, O> {
    /// Constructs a new address map over `image`.
    ///
    /// The ranges are sorted by base address; overlapping ranges or ranges
    /// whose bytes fall outside the image are rejected.
    pub fn new(image: &'data [u8], mut ranges: Vec<RangeAttributes<O>>) -> Result<Self> {
        ranges.sort_by_key(|r| r.base.as_u64());
        for (i, range) in ranges.iter().enumerate() {
            if range
                .file_offset
                .checked_add(range.size.as_usize())
                .map(|limit| limit > image.len())
                .unwrap_or(true)
            {
                return Err(Error::Bounds);
            }
            if range.base.checked_add(range.size).is_none() {
                return Err(Error::Bounds);
            }
            if i > 0 && ranges[i - 1].limit() > range.base {
                return Err(Error::Other("overlapping segments"));
            }
        }
        Ok(Self { image, ranges })
    }

    /// Locates the mapped bytes starting at `addr`.
    ///
    /// On success the returned slice runs from `addr` to the end of the
    /// containing range; a query across a range boundary yields only the
    /// first range.
    pub fn find_mapped_memory_image(&self, addr: O) -> Result<&'data [u8]> {
        let index = self.range_index(addr).ok_or(Error::NotMapped)?;
        Ok(self.image_of(&self.ranges[index], addr))
    }

    /// Reads one word at `addr`.
    ///
    /// Fails with `NotMapped` when the word is not fully backed by one range.
    pub fn read_offset(&self, addr: O) -> Result<O> {
        let image = self.find_mapped_memory_image(addr)?;
        if image.len() < O::BYTES {
            return Err(Error::NotMapped);
        }
        Ok(O::read_le(image))
    }

    /// The attributes of the range containing `addr`, if any.
    pub fn range_at(&self, addr: O) -> Option<&RangeAttributes<O>> {
        self.range_index(addr).map(|i| &self.ranges[i])
    }

    /// The base address of the first range above `addr`, if any.
    ///
    /// Used by scanners to skip holes in the address space.
    pub fn next_range_base(&self, addr: O) -> Option<O> {
        let index = self.ranges.partition_point(|r| r.base <= addr);
        self.ranges.get(index).map(|r| r.base)
    }

    /// Iterator over the mapped ranges in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &RangeAttributes<O>> {
        self.ranges.iter()
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    fn range_index(&self, addr: O) -> Option<usize> {
        let index = self.ranges.partition_point(|r| r.base <= addr);
        if index == 0 {
            return None;
        }
        let candidate = index - 1;
        if self.ranges[candidate].contains(addr) {
            Some(candidate)
        } else {
            None
        }
    }

    fn image_of(&self, range: &RangeAttributes<O>, addr: O) -> &'data [u8] {
        let skip = (addr - range.base).as_usize();
        &self.image[range.file_offset + skip..range.file_offset + range.size.as_usize()]
    }
}

/// A per-caller cursor over the address map that caches the last hit range.
///
/// Scans of anchor regions and allocation payloads read many nearby words;
/// the cache turns those into a bounds check instead of a binary search.
/// Readers are cheap to construct and must not be shared across threads.
pub struct Reader<'a, O: Offset> {
    map: &'a VirtualAddressMap<'a, O>,
    cached: Option<RangeAttributes<O>>,
}

impl<'a, O: Offset> Reader<'a, O> {
    pub fn new(map: &'a VirtualAddressMap<'a, O>) -> Self {
        Self { map, cached: None }
    }

    /// Reads one word at `addr`.
    pub fn read_offset(&mut self, addr: O) -> Result<O> {
        let bytes = self.read_bytes(addr, O::BYTES)?;
        Ok(O::read_le(bytes))
    }

    /// Reads `len` contiguous bytes starting at `addr`.
    ///
    /// Fails with `NotMapped` when fewer than `len` bytes remain in the
    /// containing range.
    pub fn read_bytes(&mut self, addr: O, len: usize) -> Result<&'a [u8]> {
        let range = match self.cached {
            Some(range) if range.contains(addr) => range,
            _ => {
                let range = *self.map.range_at(addr).ok_or(Error::NotMapped)?;
                self.cached = Some(range);
                range
            }
        };
        let image = self.map.image_of(&range, addr);
        if image.len() < len {
            return Err(Error::NotMapped);
        }
        Ok(&image[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map(image: &[u8]) -> VirtualAddressMap<'_, u64> {
        VirtualAddressMap::new(
            image,
            vec![
                RangeAttributes::new(0x1000, 0x1000, 0, RangeFlags::READ | RangeFlags::WRITE),
                RangeAttributes::new(0x3000, 0x1000, 0x1000, RangeFlags::READ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_mapping() {
        let image = vec![0xaau8; 0x2000];
        let map = test_map(&image);

        assert_eq!(map.find_mapped_memory_image(0x1000).unwrap().len(), 0x1000);
        assert_eq!(map.find_mapped_memory_image(0x10ff).unwrap().len(), 0xf01);
        assert_eq!(map.find_mapped_memory_image(0x3fff).unwrap().len(), 1);
    }

    #[test]
    fn test_mapping_out_of_bounds() {
        let image = vec![0u8; 0x2000];
        let map = test_map(&image);

        assert_eq!(map.find_mapped_memory_image(0x0fff), Err(Error::NotMapped));
        assert_eq!(map.find_mapped_memory_image(0x2000), Err(Error::NotMapped));
        assert_eq!(map.find_mapped_memory_image(0x4000), Err(Error::NotMapped));
    }

    #[test]
    fn test_word_at_range_end() {
        let image = vec![0u8; 0x2000];
        let map = test_map(&image);

        assert!(map.read_offset(0x1ff8).is_ok());
        assert_eq!(map.read_offset(0x1ffc), Err(Error::NotMapped));
    }

    #[test]
    fn test_read_values() {
        let mut image = vec![0u8; 0x2000];
        image[0x100..0x108].copy_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        let map = test_map(&image);

        assert_eq!(map.read_offset(0x1100).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_reader_cache() {
        let mut image = vec![0u8; 0x2000];
        image[0..8].copy_from_slice(&0xdead_beefu64.to_le_bytes());
        image[0x1000..0x1008].copy_from_slice(&0xcafeu64.to_le_bytes());
        let map = test_map(&image);

        let mut reader = Reader::new(&map);
        assert_eq!(reader.read_offset(0x1000).unwrap(), 0xdead_beef);
        // same range, cache hit
        assert_eq!(reader.read_offset(0x1000).unwrap(), 0xdead_beef);
        // different range, cache refill
        assert_eq!(reader.read_offset(0x3000).unwrap(), 0xcafe);
        assert_eq!(reader.read_offset(0x2000), Err(Error::NotMapped));
    }

    #[test]
    fn test_next_range_base() {
        let image = vec![0u8; 0x2000];
        let map = test_map(&image);

        assert_eq!(map.next_range_base(0x0), Some(0x1000));
        assert_eq!(map.next_range_base(0x1800), Some(0x3000));
        assert_eq!(map.next_range_base(0x3000), None);
    }

    #[test]
    fn test_rejects_overlap() {
        let image = vec![0u8; 0x2000];
        let result = VirtualAddressMap::<u64>::new(
            &image,
            vec![
                RangeAttributes::new(0x1000, 0x1000, 0, RangeFlags::READ),
                RangeAttributes::new(0x1800, 0x1000, 0x1000, RangeFlags::READ),
            ],
        );
        assert!(result.is_err());
    }
}
