/*!
The inter-allocation reference graph and its external anchors.
*/

use smallvec::SmallVec;

use crate::mem::VirtualAddressMap;
use crate::process::{ModuleDirectory, ThreadMap};
use crate::types::Offset;

use super::finder::{AllocationIndex, Finder};

type AnchorList<O> = SmallVec<[O; 2]>;

/// Outgoing references and anchor sets per allocation.
///
/// For each allocation the outgoing array holds one slot per payload word:
/// slot `k` is the allocation referenced by the word at byte offset
/// `k * sizeof(Offset)`, or the sentinel when that word is not an
/// intra-heap reference. Sizing the array to the payload lets recognizers
/// locate an outgoing reference by its word offset.
///
/// Anchors are addresses outside the heap whose stored word equals an
/// allocation's base address. Register anchors carry
/// [`ThreadMap::register_anchor`](../process/struct.ThreadMap.html) tokens
/// instead of addresses.
pub struct Graph<O: Offset> {
    num_allocations: usize,
    slot_starts: Vec<usize>,
    outgoing: Vec<AllocationIndex>,
    static_anchors: Vec<AnchorList<O>>,
    stack_anchors: Vec<AnchorList<O>>,
    register_anchors: Vec<AnchorList<O>>,
}

impl<O: Offset> Graph<O> {
    /// Scans every used allocation's payload, the static module data, the
    /// thread stacks and the register files.
    ///
    /// Free allocations get empty outgoing slots and no anchors. Payload
    /// words that are not mapped resolve to the sentinel.
    pub fn build(
        map: &VirtualAddressMap<O>,
        finder: &Finder<O>,
        threads: &ThreadMap<O>,
        modules: &ModuleDirectory<O>,
    ) -> Self {
        let num_allocations = finder.num_allocations();
        let sentinel = finder.sentinel();

        let mut slot_starts = Vec::with_capacity(num_allocations + 1);
        let mut outgoing = Vec::new();
        for index in 0..num_allocations {
            slot_starts.push(outgoing.len());
            let allocation = finder.allocation_at(index);
            if !allocation.is_used() {
                continue;
            }
            let mapped_words = match map.find_mapped_memory_image(allocation.address()) {
                Ok(bytes) => {
                    let mapped = bytes.len().min(allocation.size().as_usize());
                    let words = mapped / O::BYTES;
                    for k in 0..words {
                        let word = O::read_le(&bytes[k * O::BYTES..]);
                        outgoing.push(finder.index_of_address(word));
                    }
                    words
                }
                Err(_) => 0,
            };
            for _ in mapped_words..allocation.word_count() {
                outgoing.push(sentinel);
            }
        }
        slot_starts.push(outgoing.len());

        let mut graph = Self {
            num_allocations,
            slot_starts,
            outgoing,
            static_anchors: vec![AnchorList::new(); num_allocations],
            stack_anchors: vec![AnchorList::new(); num_allocations],
            register_anchors: vec![AnchorList::new(); num_allocations],
        };

        for (base, size) in modules.static_anchor_ranges() {
            graph.scan_anchor_range(map, finder, base, size, AnchorKind::Static);
        }
        for thread in threads.iter() {
            graph.scan_anchor_range(
                map,
                finder,
                thread.stack_low(),
                thread.stack_size(),
                AnchorKind::Stack,
            );
            for (register, &value) in thread.registers.iter().enumerate() {
                let target = finder.index_of_base(value);
                if target != finder.sentinel() && finder.allocation_at(target).is_used() {
                    graph.register_anchors[target]
                        .push(ThreadMap::register_anchor(thread.thread_num, register));
                }
            }
        }

        graph
    }

    pub fn num_allocations(&self) -> usize {
        self.num_allocations
    }

    /// The outgoing reference slots of allocation `index`, one per payload
    /// word.
    pub fn outgoing(&self, index: AllocationIndex) -> &[AllocationIndex] {
        &self.outgoing[self.slot_starts[index]..self.slot_starts[index + 1]]
    }

    pub fn get_static_anchors(&self, index: AllocationIndex) -> Option<&[O]> {
        Self::anchors_of(&self.static_anchors[index])
    }

    pub fn get_stack_anchors(&self, index: AllocationIndex) -> Option<&[O]> {
        Self::anchors_of(&self.stack_anchors[index])
    }

    pub fn get_register_anchors(&self, index: AllocationIndex) -> Option<&[O]> {
        Self::anchors_of(&self.register_anchors[index])
    }

    fn anchors_of(list: &AnchorList<O>) -> Option<&[O]> {
        if list.is_empty() {
            None
        } else {
            Some(list)
        }
    }

    /// Walks `[base, base + size)` word by word, skipping unmapped holes,
    /// and records every word equal to a used allocation's base address.
    ///
    /// The scan runs in ascending address order, so anchor lists end up
    /// ordered by anchor address.
    fn scan_anchor_range(
        &mut self,
        map: &VirtualAddressMap<O>,
        finder: &Finder<O>,
        base: O,
        size: O,
        kind: AnchorKind,
    ) {
        let sentinel = finder.sentinel();
        let limit = base + size;
        let mut addr = base;
        while addr < limit {
            let bytes = match map.find_mapped_memory_image(addr) {
                Ok(bytes) => bytes,
                Err(_) => {
                    match map.next_range_base(addr) {
                        Some(next) if next < limit => {
                            addr = next;
                            continue;
                        }
                        _ => break,
                    };
                }
            };
            let span = bytes.len().min((limit - addr).as_usize());
            let words = span / O::BYTES;
            for k in 0..words {
                let value = O::read_le(&bytes[k * O::BYTES..]);
                let target = finder.index_of_base(value);
                if target != sentinel && finder.allocation_at(target).is_used() {
                    let anchor = addr + O::words(k);
                    match kind {
                        AnchorKind::Static => self.static_anchors[target].push(anchor),
                        AnchorKind::Stack => self.stack_anchors[target].push(anchor),
                    }
                }
            }
            match addr.checked_add(O::from_usize(span.max(O::BYTES))) {
                Some(next) => addr = next,
                None => break,
            }
        }
    }
}

#[derive(Clone, Copy)]
enum AnchorKind {
    Static,
    Stack,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocations::finder::Allocation;
    use crate::mem::{RangeAttributes, RangeFlags};
    use crate::process::{ModuleInfo, ModuleSegment, ThreadInfo};

    fn write_word(image: &mut [u8], offset: usize, value: u64) {
        image[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_outgoing_slots() {
        // heap range at 0x1000, two allocations referencing each other
        let mut image = vec![0u8; 0x1000];
        write_word(&mut image, 0x0, 0x1048); // word 0 of a -> interior of b
        write_word(&mut image, 0x8, 0x9999); // word 1 of a -> nothing
        write_word(&mut image, 0x10, 0x1000); // word 2 of a -> its own base
        write_word(&mut image, 0x40, 0x1000); // word 0 of b -> base of a
        let map = VirtualAddressMap::<u64>::new(
            &image,
            vec![RangeAttributes::new(
                0x1000,
                0x1000,
                0,
                RangeFlags::READ | RangeFlags::WRITE,
            )],
        )
        .unwrap();
        let finder = Finder::from_sorted(vec![
            Allocation::new(0x1000, 0x18, true),
            Allocation::new(0x1040, 0x18, true),
        ])
        .unwrap();

        let graph = Graph::build(&map, &finder, &ThreadMap::empty(), &ModuleDirectory::empty());

        // a self-referencing word is still a valid intra-heap reference
        assert_eq!(graph.outgoing(0), &[1, 2, 0]);
        assert_eq!(graph.outgoing(1), &[0, 2, 2]);
    }

    #[test]
    fn test_free_allocations_have_no_slots() {
        let image = vec![0u8; 0x1000];
        let map = VirtualAddressMap::<u64>::new(
            &image,
            vec![RangeAttributes::new(0x1000, 0x1000, 0, RangeFlags::READ)],
        )
        .unwrap();
        let finder = Finder::from_sorted(vec![Allocation::new(0x1000, 0x20, false)]).unwrap();

        let graph = Graph::build(&map, &finder, &ThreadMap::empty(), &ModuleDirectory::empty());
        assert!(graph.outgoing(0).is_empty());
    }

    #[test]
    fn test_stack_and_static_anchors() {
        let mut image = vec![0u8; 0x3000];
        // heap at 0x10000 (file 0x0), stack at 0x20000 (file 0x1000),
        // module data at 0x30000 (file 0x2000)
        write_word(&mut image, 0x1010, 0x10000); // stack word -> allocation base
        write_word(&mut image, 0x1018, 0x10008); // interior pointer, not an anchor
        write_word(&mut image, 0x2020, 0x10000); // static word -> allocation base
        let map = VirtualAddressMap::<u64>::new(
            &image,
            vec![
                RangeAttributes::new(0x10000, 0x1000, 0, RangeFlags::READ | RangeFlags::WRITE),
                RangeAttributes::new(0x20000, 0x1000, 0x1000, RangeFlags::READ | RangeFlags::WRITE),
                RangeAttributes::new(0x30000, 0x1000, 0x2000, RangeFlags::READ | RangeFlags::WRITE),
            ],
        )
        .unwrap();
        let finder = Finder::from_sorted(vec![Allocation::new(0x10000, 0x20, true)]).unwrap();
        let threads = ThreadMap::new(vec![ThreadInfo {
            thread_num: 1,
            stack_base: 0x21000,
            stack_limit: 0x20000,
            registers: vec![0x10000, 0x1234],
        }]);
        let modules = ModuleDirectory::new(vec![ModuleInfo {
            path: "/usr/bin/app".into(),
            base: 0x30000,
            segments: vec![ModuleSegment {
                base: 0x30000,
                size: 0x1000,
                flags: RangeFlags::READ | RangeFlags::WRITE,
            }],
        }]);

        let graph = Graph::build(&map, &finder, &threads, &modules);

        assert_eq!(graph.get_stack_anchors(0), Some(&[0x20010u64][..]));
        assert_eq!(graph.get_static_anchors(0), Some(&[0x30020u64][..]));
        assert_eq!(
            graph.get_register_anchors(0),
            Some(&[ThreadMap::<u64>::register_anchor(1, 0)][..])
        );
    }
}
