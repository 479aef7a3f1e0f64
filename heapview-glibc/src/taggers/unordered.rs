/*!
Recognition of `std::unordered_map` / `std::unordered_set` buckets and
nodes.
*/

use std::collections::HashSet;

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger, UNTAGGED,
};
use heapview::mem::Reader;
use heapview::types::Offset;

use super::read_words;

/// Header words consulted: the bucket pointer, the bucket count, the
/// before-begin node and the element count.
const HEADER_WORDS: usize = 4;

/// Tags hashtable bucket arrays and their nodes.
///
/// The two-allocation cross-check makes this a strong match: the node
/// chain hanging off the before-begin word must have exactly the recorded
/// element count, and every non-null bucket slot must point either at the
/// before-begin field inside the header or at a node of the chain.
pub struct UnorderedTagger {
    buckets_tag: TagIndex,
    node_tag: TagIndex,
}

impl UnorderedTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            buckets_tag: tags.register_tag("unordered set or map buckets"),
            node_tag: tags.register_tag("unordered set or map node"),
        }
    }

    pub fn buckets_tag_index(&self) -> TagIndex {
        self.buckets_tag
    }

    pub fn node_tag_index(&self) -> TagIndex {
        self.node_tag
    }

    /// Validates a candidate hashtable header; `before_begin` is the
    /// address of the header's before-begin field.
    fn try_tag_table<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        reader: &mut Reader<O>,
        words: &[O],
        before_begin: O,
    ) -> bool {
        let buckets_index = view.finder.index_of_base(words[0]);
        if buckets_index == view.sentinel() {
            return false;
        }
        let buckets = view.finder.allocation_at(buckets_index);
        if !buckets.is_used() || tags.get_tag_index(buckets_index) != UNTAGGED {
            return false;
        }
        let bucket_count = words[1].as_u64();
        if bucket_count == 0 || bucket_count > buckets.size().as_u64() / O::BYTES as u64 {
            return false;
        }
        let element_count = words[3].as_u64();
        if element_count == 0 || element_count > view.finder.num_allocations() as u64 {
            return false;
        }

        // walk the singly linked node chain
        let mut nodes = Vec::new();
        let mut node_addresses = HashSet::new();
        let mut node = words[2];
        let mut node_size = None;
        while node != O::ZERO {
            if nodes.len() as u64 == element_count {
                return false;
            }
            let index = view.finder.index_of_base(node);
            if index == view.sentinel() {
                return false;
            }
            let allocation = view.finder.allocation_at(index);
            if !allocation.is_used() || tags.get_tag_index(index) != UNTAGGED {
                return false;
            }
            match node_size {
                None => node_size = Some(allocation.size()),
                Some(size) if size != allocation.size() => return false,
                Some(_) => {}
            }
            nodes.push(index);
            node_addresses.insert(node.as_u64());
            node = match reader.read_offset(node) {
                Ok(next) => next,
                Err(_) => return false,
            };
        }
        if nodes.len() as u64 != element_count {
            return false;
        }

        // every used bucket slot points at the before-begin field or at a
        // chain node
        for slot in 0..bucket_count {
            let slot_addr = buckets.address() + O::from_u64(slot * O::BYTES as u64);
            let value = match reader.read_offset(slot_addr) {
                Ok(value) => value,
                Err(_) => return false,
            };
            if value == O::ZERO || value == before_begin {
                continue;
            }
            if !node_addresses.contains(&value.as_u64()) {
                return false;
            }
        }

        tags.tag_allocation(buckets_index, self.buckets_tag);
        for node in nodes {
            tags.tag_allocation(node, self.node_tag);
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
            // the bucket pointer is the first member of the hashtable
            let words: [O; HEADER_WORDS] = match read_words(reader, anchor) {
                Some(words) => words,
                None => continue,
            };
            if self.try_tag_table(view, tags, reader, &words, anchor + O::words(2)) {
                return true;
            }
        }
        false
    }
}

impl<O: Offset> Tagger<O> for UnorderedTagger {
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
                        let header = [
                            image.word(k),
                            image.word(k + 1),
                            image.word(k + 2),
                            image.word(k + 3),
                        ];
                        let before_begin = allocation.address() + O::words(k + 2);
                        if self.try_tag_table(view, tags, reader, &header, before_begin) {
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
