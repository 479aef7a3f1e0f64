/*!
Recognition of pre-C++11 copy-on-write string bodies.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger,
};
use heapview::mem::Reader;
use heapview::types::Offset;

/// Largest reference count accepted as plausible.
const MAX_REFCOUNT: u64 = 0x100000;

/// Tags copy-on-write string bodies.
///
/// The old libstdc++ representation keeps `(length, capacity, refcount)`
/// words in front of the characters, so the body identifies itself and the
/// check runs in the medium phase. External references point at the
/// character data rather than the allocation base, which is why neither
/// anchors nor the reference graph help here.
pub struct CowStringTagger {
    tag: TagIndex,
}

impl CowStringTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("cow string body"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn body_matches<O: Offset>(image: &ContiguousImage<O>) -> bool {
        let length = image.word(0).as_u64() as usize;
        let capacity = image.word(1).as_u64() as usize;
        let refcount = image.word(2).as_u64();
        if length == 0 || length > capacity || refcount > MAX_REFCOUNT {
            return false;
        }
        let data = 3 * O::BYTES;
        let bytes = image.bytes();
        if data + capacity + 1 > bytes.len() {
            return false;
        }
        let chars = &bytes[data..];
        chars[length] == 0 && chars[..length].iter().all(|&b| b != 0)
    }
}

impl<O: Offset> Tagger<O> for CowStringTagger {
    fn tag_from_allocation(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        _reader: &mut Reader<O>,
        index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        is_unsigned: bool,
    ) -> bool {
        if already_tagged(tags, index) {
            return true;
        }
        match phase {
            Phase::QuickInitialCheck => {
                if view.modules.find_by_name_fragment("libstdc++").is_none() {
                    return true;
                }
                allocation.size() < O::words(4)
            }
            Phase::MediumCheck => {
                if is_unsigned && Self::body_matches(image) {
                    tags.tag_allocation(index, self.tag);
                }
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
