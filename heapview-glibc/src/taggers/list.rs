/*!
Recognition of `std::list` nodes.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger, UNTAGGED,
};
use heapview::mem::Reader;
use heapview::types::Offset;

/// Tags the nodes of doubly linked lists.
///
/// A node carries `(next, prev)` words in front of the payload. The whole
/// ring is walked forward from the candidate; every heap hop must be an
/// equally sized allocation with a consistent back link, and the ring must
/// close through exactly one non-heap hop, the list header living in the
/// owning object.
pub struct ListNodeTagger {
    tag: TagIndex,
}

impl ListNodeTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("list node"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn try_tag_ring<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        allocation: &Allocation<O>,
        image: &ContiguousImage<O>,
    ) -> bool {
        let node_size = allocation.size();
        let candidate = allocation.address();
        let closing_prev = image.word(1);

        let mut ring = vec![index];
        let mut header = None;
        let mut prev_addr = candidate;
        let mut cur = image.word(0);
        let mut steps = 0;
        while cur != candidate {
            steps += 1;
            if steps > view.finder.num_allocations() + 2 {
                return false;
            }
            let next = match reader.read_offset(cur) {
                Ok(next) => next,
                Err(_) => return false,
            };
            let prev = match reader.read_offset(cur + O::word()) {
                Ok(prev) => prev,
                Err(_) => return false,
            };
            if prev != prev_addr {
                return false;
            }

            let hop = view.finder.index_of_base(cur);
            if hop != view.sentinel()
                && view.finder.allocation_at(hop).is_used()
                && view.finder.allocation_at(hop).size() == node_size
                && tags.get_tag_index(hop) == UNTAGGED
            {
                ring.push(hop);
            } else {
                // the header hop; a second one disqualifies the ring
                if header.is_some() {
                    return false;
                }
                header = Some(cur);
            }
            prev_addr = cur;
            cur = next;
        }

        if header.is_none() || closing_prev != prev_addr {
            return false;
        }
        for node in ring {
            tags.tag_allocation(node, self.tag);
        }
        true
    }
}

impl<O: Offset> Tagger<O> for ListNodeTagger {
    fn tag_from_allocation(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        _is_unsigned: bool,
    ) -> bool {
        if already_tagged(tags, index) {
            return true;
        }
        match phase {
            Phase::QuickInitialCheck => allocation.size() < O::words(3),
            Phase::MediumCheck => {
                self.try_tag_ring(view, tags, reader, index, allocation, image);
                true
            }
            Phase::SlowCheck | Phase::WeakCheck => true,
        }
    }

    fn tag_from_referenced(
        &mut self,
        _view: &ImageView<O>,
        _tags: &mut TagHolder,
        _image: &ContiguousImage<O>,
        _reader: &mut Reader<O>,
        _index: AllocationIndex,
        _phase: Phase,
        _allocation: &Allocation<O>,
        _outgoing: &[AllocationIndex],
    ) -> bool {
        true
    }
}
