/*!
Recognition of `std::vector` bodies.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger, UNTAGGED,
};
use heapview::mem::Reader;
use heapview::options::VectorAmbiguity;
use heapview::types::Offset;

/// Tags vector bodies found through a `(start, use limit, capacity limit)`
/// word triple in an anchor or in an owning allocation.
///
/// Recognition of a vector body is rather weak because the body content
/// tells us nothing, so the corresponding vector object is the only way to
/// find one. Part of a deque can look like a vector body; the more reliable
/// patterns run during the non-weak phases and get first claim.
pub struct VectorBodyTagger {
    tag: TagIndex,
}

impl VectorBodyTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("vector body"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    /// Checks whether `start == body`, `use limit` and `capacity limit`
    /// describe a plausible vector over the body allocation.
    fn triple_matches<O: Offset>(
        body: &Allocation<O>,
        start: O,
        use_limit: O,
        capacity_limit: O,
    ) -> bool {
        let address = body.address();
        start == address
            && use_limit >= address
            && capacity_limit >= use_limit
            && capacity_limit <= body.limit()
            && capacity_limit != address
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
            let start = O::read_le(image);
            let use_limit = O::read_le(&image[O::BYTES..]);
            let capacity_limit = O::read_le(&image[2 * O::BYTES..]);
            if !Self::triple_matches(allocation, start, use_limit, capacity_limit) {
                continue;
            }
            tags.tag_allocation(index, self.tag);
            return true;
        }
        false
    }

    fn embedded_body_at<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &TagHolder,
        image: &ContiguousImage<O>,
        outgoing: &[AllocationIndex],
        k: usize,
    ) -> Option<AllocationIndex> {
        let body_index = outgoing[k];
        if body_index == view.sentinel() || tags.get_tag_index(body_index) != UNTAGGED {
            return None;
        }
        let body = view.finder.allocation_at(body_index);
        if body.size() < O::words(3) {
            return None;
        }
        if Self::triple_matches(body, image.word(k), image.word(k + 1), image.word(k + 2)) {
            Some(body_index)
        } else {
            None
        }
    }

    fn check_embedded_vectors<O: Offset>(
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
            let body_index = match self.embedded_body_at(view, tags, image, outgoing, k) {
                Some(body_index) => body_index,
                None => {
                    k += 1;
                    continue;
                }
            };
            // Without a malloc header word between adjacent allocations a
            // BBLl run is readable as a full body at B or an empty one at
            // L. The historical policy keeps the earlier body.
            if view.options.vector_ambiguity == VectorAmbiguity::PreferEmptyBody
                && k + 1 < words - 2
            {
                if let Some(later) = self.embedded_body_at(view, tags, image, outgoing, k + 1) {
                    if later != body_index {
                        tags.tag_allocation(later, self.tag);
                        k += 4;
                        continue;
                    }
                }
            }
            tags.tag_allocation(body_index, self.tag);
            // skip the use limit and capacity limit words
            k += 3;
        }
    }
}

impl<O: Offset> Tagger<O> for VectorBodyTagger {
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
        // We cannot assume anything from the start of a vector body because
        // the element type is unknown, so the signature state is irrelevant.
        if already_tagged(tags, index) {
            return true;
        }
        match phase {
            Phase::QuickInitialCheck => allocation.size() < O::words(2),
            Phase::MediumCheck | Phase::SlowCheck => false,
            Phase::WeakCheck => {
                // the weak pass re-arms every tagger, so the size floor of
                // the quick check must hold here as well
                if allocation.size() >= O::words(2)
                    && !self.check_anchors(
                        view,
                        tags,
                        index,
                        allocation,
                        view.graph.get_static_anchors(index),
                    )
                {
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
                self.check_embedded_vectors(view, tags, image, outgoing);
                false
            }
        }
    }
}
