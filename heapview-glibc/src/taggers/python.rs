/*!
Recognition of CPython objects.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger,
};
use heapview::mem::{RangeFlags, Reader};
use heapview::types::Offset;

/// Largest reference count accepted as plausible.
const MAX_REFCOUNT: u64 = 0x100000;

/// Tags allocations whose first words match the `PyObject` layout: a
/// reference count followed by a pointer to a type object in the Python
/// module's data, or to a heap type object whose own type lives there.
pub struct PythonObjectTagger {
    tag: TagIndex,
}

impl PythonObjectTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("python object"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn is_static_type<O: Offset>(view: &ImageView<O>, addr: O) -> bool {
        match view.modules.resolve(addr) {
            Some((module, segment)) => {
                module.name().contains("python") && segment.flags.contains(RangeFlags::WRITE)
            }
            None => false,
        }
    }

    fn is_type_object<O: Offset>(view: &ImageView<O>, reader: &mut Reader<O>, addr: O) -> bool {
        if Self::is_static_type(view, addr) {
            return true;
        }
        // a heap type: its own ob_type must be a static type
        let index = view.finder.index_of_base(addr);
        if index == view.sentinel() || !view.finder.allocation_at(index).is_used() {
            return false;
        }
        match reader.read_offset(addr + O::word()) {
            Ok(ob_type) => Self::is_static_type(view, ob_type),
            Err(_) => false,
        }
    }
}

impl<O: Offset> Tagger<O> for PythonObjectTagger {
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
            Phase::QuickInitialCheck => {
                if view.modules.find_by_name_fragment("python").is_none() {
                    return true;
                }
                allocation.size() < O::words(2)
            }
            Phase::MediumCheck => {
                let refcount = image.word(0).as_u64();
                if refcount >= 1
                    && refcount <= MAX_REFCOUNT
                    && Self::is_type_object(view, reader, image.word(1))
                {
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
