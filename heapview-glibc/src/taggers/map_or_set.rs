/*!
Recognition of `std::map` / `std::set` tree nodes.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger, UNTAGGED,
};
use heapview::mem::Reader;
use heapview::types::Offset;

/// Red-black trees never get deeper than this.
const MAX_HEIGHT: usize = 128;

const RED: u64 = 0;

/// Tags red-black tree nodes.
///
/// A node carries `(color, parent, left, right)` words in front of the
/// payload. From the candidate the parent chain is climbed to the tree
/// header in the owning object, recognizable by its red color and its
/// parent word pointing back down at the root; the whole tree is then
/// collected and tagged.
pub struct MapOrSetNodeTagger {
    tag: TagIndex,
}

impl MapOrSetNodeTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("map or set node"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn color_valid<O: Offset>(color: O) -> bool {
        color.as_u64() <= 1
    }

    /// True when `index` is a used, untagged allocation of `node_size`
    /// bytes starting with a valid color word.
    fn is_node_shaped<O: Offset>(
        view: &ImageView<O>,
        tags: &TagHolder,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        node_size: O,
    ) -> bool {
        if index == view.sentinel() {
            return false;
        }
        let allocation = view.finder.allocation_at(index);
        if !allocation.is_used()
            || allocation.size() != node_size
            || tags.get_tag_index(index) != UNTAGGED
        {
            return false;
        }
        matches!(reader.read_offset(allocation.address()), Ok(color) if Self::color_valid(color))
    }

    fn try_tag_tree<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        allocation: &Allocation<O>,
        image: &ContiguousImage<O>,
    ) -> bool {
        if !Self::color_valid(image.word(0)) {
            return false;
        }
        let node_size = allocation.size();

        let mut cur_index = index;
        let mut cur_addr = allocation.address();
        for _ in 0..MAX_HEIGHT {
            let parent = match reader.read_offset(cur_addr + O::word()) {
                Ok(parent) => parent,
                Err(_) => return false,
            };
            let p = view.finder.index_of_base(parent);
            if Self::is_node_shaped(view, tags, reader, p, node_size) {
                // the parent must link back down to us
                let left = reader.read_offset(parent + O::words(2));
                let right = reader.read_offset(parent + O::words(3));
                if left.ok() != Some(cur_addr) && right.ok() != Some(cur_addr) {
                    return false;
                }
                cur_index = p;
                cur_addr = parent;
                continue;
            }

            // `parent` should be the tree header in the owning object
            let header = parent;
            let header_words = match super::read_words::<O, 4>(reader, header) {
                Some(words) => words,
                None => return false,
            };
            if header_words[0].as_u64() != RED || header_words[1] != cur_addr {
                return false;
            }
            // leftmost and rightmost must be tree nodes
            if view.finder.index_of_base(header_words[2]) == view.sentinel()
                || view.finder.index_of_base(header_words[3]) == view.sentinel()
            {
                return false;
            }
            let nodes = match self.collect_tree(view, tags, reader, cur_index, node_size) {
                Some(nodes) => nodes,
                None => return false,
            };
            // cross-check the recorded node count when it is readable
            if let Ok(count) = reader.read_offset(header + O::words(4)) {
                if count.as_usize() != nodes.len() {
                    return false;
                }
            }
            for node in nodes {
                tags.tag_allocation(node, self.tag);
            }
            return true;
        }
        false
    }

    fn collect_tree<O: Offset>(
        &self,
        view: &ImageView<O>,
        tags: &TagHolder,
        reader: &mut Reader<O>,
        root: AllocationIndex,
        node_size: O,
    ) -> Option<Vec<AllocationIndex>> {
        let mut stack = vec![root];
        let mut nodes = Vec::new();
        while let Some(index) = stack.pop() {
            if nodes.len() >= view.finder.num_allocations() {
                return None;
            }
            nodes.push(index);
            let addr = view.finder.allocation_at(index).address();
            for child_slot in [2usize, 3] {
                let child = reader.read_offset(addr + O::words(child_slot)).ok()?;
                if child == O::ZERO {
                    continue;
                }
                let c = view.finder.index_of_base(child);
                if c == index || !Self::is_node_shaped(view, tags, reader, c, node_size) {
                    return None;
                }
                // the child's parent word must point back up
                if reader.read_offset(child + O::word()).ok()? != addr {
                    return None;
                }
                stack.push(c);
            }
        }
        Some(nodes)
    }
}

impl<O: Offset> Tagger<O> for MapOrSetNodeTagger {
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
            Phase::QuickInitialCheck => allocation.size() < O::words(5),
            Phase::MediumCheck => {
                self.try_tag_tree(view, tags, reader, index, allocation, image);
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
