/*!
Synthetic core images for tests and examples.

A `DummyDump` assembles segments into one backing byte buffer and hands out
a [VirtualAddressMap](../../heapview/mem/struct.VirtualAddressMap.html)
over it. The glibc heap helper lays out a well-formed chunk run so finder
and recognizer tests can work against realistic allocator metadata.
*/

use rand::RngCore;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use heapview::mem::{RangeAttributes, RangeFlags, VirtualAddressMap};
use heapview::types::Offset;

/// One chunk of a synthetic glibc heap.
#[derive(Clone, Copy, Debug)]
pub struct ChunkSpec {
    /// The malloc request size in bytes.
    pub request: usize,
    pub used: bool,
}

impl ChunkSpec {
    pub fn used(request: usize) -> Self {
        Self {
            request,
            used: true,
        }
    }

    pub fn free(request: usize) -> Self {
        Self {
            request,
            used: false,
        }
    }
}

/// Builder for synthetic core images.
pub struct DummyDump<O: Offset> {
    bytes: Vec<u8>,
    ranges: Vec<RangeAttributes<O>>,
}

impl<O: Offset> Default for DummyDump<O> {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            ranges: Vec::new(),
        }
    }
}

impl<O: Offset> DummyDump<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a zero-filled segment at `base`.
    pub fn add_segment(&mut self, base: O, size: usize, flags: RangeFlags) -> &mut Self {
        let file_offset = self.bytes.len();
        self.bytes.resize(file_offset + size, 0);
        self.ranges.push(RangeAttributes::new(
            base,
            O::from_usize(size),
            file_offset,
            flags,
        ));
        self
    }

    /// Adds a segment filled with reproducible pseudo-random bytes.
    pub fn add_segment_filled(
        &mut self,
        base: O,
        size: usize,
        flags: RangeFlags,
        seed: u64,
    ) -> &mut Self {
        self.add_segment(base, size, flags);
        let file_offset = self.bytes.len() - size;
        let mut rng = XorShiftRng::seed_from_u64(seed);
        rng.fill_bytes(&mut self.bytes[file_offset..]);
        self
    }

    /// Writes one word at `addr`, which must be inside a segment.
    pub fn write_word(&mut self, addr: O, value: O) -> &mut Self {
        let offset = self.locate(addr, O::BYTES);
        value.write_le(&mut self.bytes[offset..]);
        self
    }

    /// Writes raw bytes at `addr`, which must be inside a segment.
    pub fn write_bytes(&mut self, addr: O, data: &[u8]) -> &mut Self {
        let offset = self.locate(addr, data.len());
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        self
    }

    /// The address map over everything added so far.
    pub fn address_map(&self) -> VirtualAddressMap<'_, O> {
        VirtualAddressMap::new(&self.bytes, self.ranges.clone())
            .expect("dummy segments are disjoint")
    }

    /// Lays out a readable+writable segment at `base` holding a well-formed
    /// glibc chunk run followed by the top chunk.
    ///
    /// Returns the payload address of every chunk, in layout order.
    pub fn build_glibc_heap(
        &mut self,
        base: O,
        segment_size: usize,
        chunks: &[ChunkSpec],
    ) -> Vec<O> {
        self.add_segment(base, segment_size, RangeFlags::READ | RangeFlags::WRITE);

        let word = O::BYTES;
        let mut payloads = Vec::with_capacity(chunks.len());
        let mut chunk = base;
        let mut prev_in_use = true;
        let mut prev_size = 0usize;
        for spec in chunks {
            let chunk_size = align_up(spec.request + word, 2 * word).max(4 * word);
            if !prev_in_use {
                self.write_word(chunk, O::from_usize(prev_size));
            }
            self.write_word(
                chunk + O::word(),
                O::from_usize(chunk_size) | O::from_u64(if prev_in_use { 1 } else { 0 }),
            );
            payloads.push(chunk + O::words(2));
            prev_in_use = spec.used;
            prev_size = chunk_size;
            chunk = chunk + O::from_usize(chunk_size);
        }

        // top chunk fills the rest of the segment
        let top_size = (base + O::from_usize(segment_size) - chunk).as_usize();
        assert!(top_size >= 4 * word, "heap segment too small for top chunk");
        self.write_word(
            chunk + O::word(),
            O::from_usize(top_size) | O::from_u64(if prev_in_use { 1 } else { 0 }),
        );

        payloads
    }

    fn locate(&self, addr: O, len: usize) -> usize {
        for range in self.ranges.iter() {
            if range.contains(addr) {
                let skip = (addr - range.base).as_usize();
                assert!(
                    skip + len <= range.size.as_usize(),
                    "write crosses segment limit"
                );
                return range.file_offset + skip;
            }
        }
        panic!("write to unmapped dummy address 0x{:x}", addr);
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_and_writes() {
        let mut dump = DummyDump::<u64>::new();
        dump.add_segment(0x1000, 0x100, RangeFlags::READ);
        dump.write_word(0x1010, 0xdead_beef);
        let map = dump.address_map();

        assert_eq!(map.read_offset(0x1010).unwrap(), 0xdead_beef);
        assert!(map.read_offset(0x2000).is_err());
    }

    #[test]
    fn test_filled_segment_is_deterministic() {
        let mut first = DummyDump::<u64>::new();
        first.add_segment_filled(0x1000, 0x40, RangeFlags::READ, 42);
        let mut second = DummyDump::<u64>::new();
        second.add_segment_filled(0x1000, 0x40, RangeFlags::READ, 42);

        let a = first.address_map();
        let b = second.address_map();
        for k in 0..8 {
            let addr = 0x1000 + k * 8;
            assert_eq!(a.read_offset(addr).unwrap(), b.read_offset(addr).unwrap());
        }
    }

    #[test]
    fn test_heap_layout() {
        let mut dump = DummyDump::<u64>::new();
        let payloads =
            dump.build_glibc_heap(0x1000_0000, 0x1000, &[ChunkSpec::used(0x18)]);
        let map = dump.address_map();

        assert_eq!(payloads, vec![0x1000_0010]);
        // chunk size 0x20, PREV_INUSE set on the first header
        assert_eq!(map.read_offset(0x1000_0008).unwrap(), 0x21);
        // top chunk header carries the used bit of the last chunk
        assert_eq!(map.read_offset(0x1000_0028).unwrap(), 0xfe0 | 1);
    }
}
