/*!
Recognition of C++11 `std::string` long-form bodies.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger, UNTAGGED,
};
use heapview::mem::Reader;
use heapview::types::Offset;

/// Tags heap bodies of long strings.
///
/// A long string body is referenced by a `(data, size, capacity)` word
/// triple in the string object, with the data pointer at the body base, a
/// NUL at `data + size` and no earlier NUL. Like vector bodies the body
/// itself proves nothing, so the work happens in the weak pass through
/// anchors and owning allocations.
pub struct LongStringTagger {
    tag: TagIndex,
}

impl LongStringTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("long string"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn string_matches<O: Offset>(
        view: &ImageView<O>,
        body: &Allocation<O>,
        length: O,
        capacity: O,
    ) -> bool {
        let length = length.as_u64();
        let capacity = capacity.as_u64();
        if length <= view.options.short_string_limit as u64 || capacity < length {
            return false;
        }
        if capacity + 1 > body.size().as_u64() {
            return false;
        }
        let bytes = match view.map.find_mapped_memory_image(body.address()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let length = length as usize;
        if bytes.len() <= length {
            return false;
        }
        bytes[length] == 0 && bytes[..length].iter().all(|&b| b != 0)
    }

    fn check_anchors<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        index: AllocationIndex,
        allocation: &Allocation<O>,
        anchors: Option<&[O]>,
    ) -> bool {
        let anchors = match anchors {
            Some(anchors) => anchors,
            None => return false,
        };
        for &anchor in anchors {
            let image = match view.map.find_mapped_memory_image(anchor) {
                Ok(image) => image,
                Err(_) => continue,
            };
            if image.len() < 3 * O::BYTES {
                continue;
            }
            if O::read_le(image) != allocation.address() {
                continue;
            }
            let length = O::read_le(&image[O::BYTES..]);
            let capacity = O::read_le(&image[2 * O::BYTES..]);
            if !Self::string_matches(view, allocation, length, capacity) {
                continue;
            }
            tags.tag_allocation(index, self.tag);
            return true;
        }
        false
    }

    fn check_embedded_strings<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        outgoing: &[AllocationIndex],
    ) {
        let words = image.word_count();
        if words < 3 {
            return;
        }
        let mut k = 0;
        while k < words - 2 {
            let body_index = outgoing[k];
            if body_index == view.sentinel() || tags.get_tag_index(body_index) != UNTAGGED {
                k += 1;
                continue;
            }
            let body = view.finder.allocation_at(body_index);
            if image.word(k) != body.address()
                || !Self::string_matches(view, body, image.word(k + 1), image.word(k + 2))
            {
                k += 1;
                continue;
            }
            tags.tag_allocation(body_index, self.tag);
            // skip the size and capacity words
            k += 3;
        }
    }
}

impl<O: Offset> Tagger<O> for LongStringTagger {
    fn tag_from_allocation(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        _image: &ContiguousImage<O>,
        _reader: &mut Reader<O>,
        index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        _is_unsigned: bool,
    ) -> bool {
        if already_tagged(tags, index) {
            return true;
        }
        match phase {
            Phase::QuickInitialCheck => {
                allocation.size().as_u64() <= view.options.short_string_limit as u64 + 1
            }
            Phase::MediumCheck | Phase::SlowCheck => false,
            Phase::WeakCheck => {
                if !self.check_anchors(
                    view,
                    tags,
                    index,
                    allocation,
                    view.graph.get_static_anchors(index),
                ) {
                    self.check_anchors(
                        view,
                        tags,
                        index,
                        allocation,
                        view.graph.get_stack_anchors(index),
                    );
                }
                true
            }
        }
    }

    fn tag_from_referenced(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        _reader: &mut Reader<O>,
        _index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        outgoing: &[AllocationIndex],
    ) -> bool {
        match phase {
            Phase::QuickInitialCheck => allocation.size() < O::words(3),
            Phase::MediumCheck | Phase::SlowCheck => false,
            Phase::WeakCheck => {
                self.check_embedded_strings(view, tags, image, outgoing);
                false
            }
        }
    }
}
