/*!
Recognition of `std::deque` maps and blocks.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger, UNTAGGED,
};
use heapview::mem::Reader;
use heapview::types::Offset;

use super::read_words;

/// Word count of the deque representation: the map pointer, the map size
/// and two `(cur, first, last, node)` iterators.
const HEADER_WORDS: usize = 10;

/// Header-relative word offsets at which an anchor can sit: the map
/// pointer, or the `cur`/`first` block pointers of either iterator.
const ANCHOR_DELTAS: [usize; 5] = [0, 2, 3, 6, 7];

struct DequeIterator<O> {
    cur: O,
    first: O,
    last: O,
    node: O,
}

impl<O: Offset> DequeIterator<O> {
    fn from_words(words: &[O]) -> Self {
        Self {
            cur: words[0],
            first: words[1],
            last: words[2],
            node: words[3],
        }
    }

    fn is_consistent(&self) -> bool {
        self.first <= self.cur && self.cur <= self.last && self.node.is_word_aligned()
    }

    fn block_bytes(&self) -> Option<O> {
        let bytes = self.last.checked_sub(self.first)?;
        if bytes == O::ZERO {
            None
        } else {
            Some(bytes)
        }
    }
}

/// Tags deque maps and their blocks.
///
/// A deque is confirmed by the ten word header found through an anchor or
/// inside an owning allocation: every slot between the start and finish
/// nodes of the map must point at the base of a block allocation large
/// enough for the block span. The match is strong, so it runs in the
/// medium phase and beats the weak vector body recognition, which would
/// otherwise claim blocks whose `(cur, first, last)` run resembles a
/// vector triple.
pub struct DequeTagger {
    map_tag: TagIndex,
    block_tag: TagIndex,
}

impl DequeTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            map_tag: tags.register_tag("deque map"),
            block_tag: tags.register_tag("deque block"),
        }
    }

    pub fn map_tag_index(&self) -> TagIndex {
        self.map_tag
    }

    pub fn block_tag_index(&self) -> TagIndex {
        self.block_tag
    }

    /// Validates a candidate header and tags map and blocks on success.
    fn try_tag_deque<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        reader: &mut Reader<O>,
        words: &[O],
    ) -> bool {
        let map_index = view.finder.index_of_base(words[0]);
        if map_index == view.sentinel() {
            return false;
        }
        let map_allocation = view.finder.allocation_at(map_index);
        if !map_allocation.is_used() || tags.get_tag_index(map_index) != UNTAGGED {
            return false;
        }
        let map_base = map_allocation.address();
        let map_size = words[1].as_u64();
        if map_size < 2 || map_size > map_allocation.size().as_u64() / O::BYTES as u64 {
            return false;
        }
        let slot_limit = map_base + O::from_u64(map_size * O::BYTES as u64);

        let start = DequeIterator::from_words(&words[2..6]);
        let finish = DequeIterator::from_words(&words[6..10]);
        if !start.is_consistent() || !finish.is_consistent() {
            return false;
        }
        if start.node < map_base
            || start.node > finish.node
            || finish.node >= slot_limit
        {
            return false;
        }
        let block_bytes = match start.block_bytes() {
            Some(bytes) => bytes,
            None => return false,
        };
        if finish.block_bytes() != Some(block_bytes) {
            return false;
        }
        // the iterator nodes must point at their own block slots
        if reader.read_offset(start.node).ok() != Some(start.first)
            || reader.read_offset(finish.node).ok() != Some(finish.first)
        {
            return false;
        }

        let mut blocks = Vec::new();
        let mut slot = start.node;
        while slot <= finish.node {
            let block_ptr = match reader.read_offset(slot) {
                Ok(ptr) => ptr,
                Err(_) => return false,
            };
            let block_index = view.finder.index_of_base(block_ptr);
            if block_index == view.sentinel() {
                return false;
            }
            let block = view.finder.allocation_at(block_index);
            if !block.is_used()
                || block.size() < block_bytes
                || tags.get_tag_index(block_index) != UNTAGGED
            {
                return false;
            }
            blocks.push(block_index);
            slot = slot + O::word();
        }

        tags.tag_allocation(map_index, self.map_tag);
        for block_index in blocks {
            tags.tag_allocation(block_index, self.block_tag);
        }
        true
    }

    fn check_anchors<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        reader: &mut Reader<O>,
        anchors: Option<&[O]>,
    ) -> bool {
        let anchors = match anchors {
            Some(anchors) => anchors,
            None => return false,
        };
        for &anchor in anchors {
            for &delta in ANCHOR_DELTAS.iter() {
                let header = match anchor.checked_sub(O::words(delta)) {
                    Some(header) => header,
                    None => continue,
                };
                let words: [O; HEADER_WORDS] = match read_words(reader, header) {
                    Some(words) => words,
                    None => continue,
                };
                if self.try_tag_deque(view, tags, reader, &words) {
                    return true;
                }
            }
        }
        false
    }
}

impl<O: Offset> Tagger<O> for DequeTagger {
    fn tag_from_allocation(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        _image: &ContiguousImage<O>,
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
            Phase::QuickInitialCheck => allocation.size() < O::words(2),
            Phase::MediumCheck => {
                // the candidate may be the map (anchor at the map pointer)
                // or a block (anchor at a cur/first iterator field)
                if !self.check_anchors(view, tags, reader, view.graph.get_static_anchors(index)) {
                    self.check_anchors(view, tags, reader, view.graph.get_stack_anchors(index));
                }
                true
            }
            Phase::SlowCheck | Phase::WeakCheck => true,
        }
    }

    fn tag_from_referenced(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        reader: &mut Reader<O>,
        _index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        outgoing: &[AllocationIndex],
    ) -> bool {
        match phase {
            Phase::QuickInitialCheck => allocation.size() < O::words(HEADER_WORDS),
            Phase::MediumCheck => {
                let words = image.word_count();
                let mut k = 0;
                while words >= HEADER_WORDS && k <= words - HEADER_WORDS {
                    if outgoing[k] != view.sentinel() {
                        let mut header = [O::ZERO; HEADER_WORDS];
                        for (i, word) in header.iter_mut().enumerate() {
                            *word = image.word(k + i);
                        }
                        if self.try_tag_deque(view, tags, reader, &header) {
                            k += HEADER_WORDS;
                            continue;
                        }
                    }
                    k += 1;
                }
                true
            }
            Phase::SlowCheck | Phase::WeakCheck => true,
        }
    }
}
