/*!
Pattern describers for the tags assigned by the concrete recognizers.
*/

use std::io::Write;

use heapview::allocations::{Allocation, AllocationIndex, ImageView, TagHolder, TagIndex};
use heapview::describe::{Context, PatternDescriber};
use heapview::error::Result;
use heapview::types::Offset;

/// Strings longer than this are truncated unless the describer explains.
const STRING_PREVIEW_BYTES: usize = 77;

/// Renders vector bodies, recovering the in-use and capacity spans from the
/// anchor that confirmed the body.
pub struct VectorBodyDescriber {
    tag: TagIndex,
}

impl VectorBodyDescriber {
    pub fn new(tag: TagIndex) -> Self {
        Self { tag }
    }

    /// Re-finds the `(start, use limit, capacity limit)` triple among the
    /// allocation's anchors.
    fn find_triple<O: Offset>(
        view: &ImageView<O>,
        index: AllocationIndex,
        allocation: &Allocation<O>,
    ) -> Option<(O, O, O)> {
        let anchor_sets = [
            view.graph.get_static_anchors(index),
            view.graph.get_stack_anchors(index),
        ];
        for anchors in anchor_sets.iter().flatten() {
            for &anchor in anchors.iter() {
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
                if start == allocation.address()
                    && use_limit >= start
                    && capacity_limit >= use_limit
                    && capacity_limit <= allocation.limit()
                    && capacity_limit != start
                {
                    return Some((anchor, use_limit, capacity_limit));
                }
            }
        }
        None
    }
}

impl<O: Offset> PatternDescriber<O> for VectorBodyDescriber {
    fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn describe(
        &self,
        context: &mut Context,
        view: &ImageView<O>,
        _tags: &TagHolder,
        index: AllocationIndex,
        explain: bool,
    ) -> Result<()> {
        let allocation = view.finder.allocation_at(index);
        writeln!(context.output(), "This allocation matches pattern VectorBody.")?;
        if let Some((anchor, use_limit, capacity_limit)) =
            Self::find_triple(view, index, allocation)
        {
            writeln!(
                context.output(),
                "The vector uses 0x{:x} of 0x{:x} capacity bytes.",
                use_limit - allocation.address(),
                capacity_limit - allocation.address()
            )?;
            if explain {
                writeln!(
                    context.output(),
                    "The start, use limit and capacity limit were found at 0x{:x}.",
                    anchor
                )?;
            }
        }
        Ok(())
    }
}

/// Faithful rendering of the long string pattern, including the preview
/// truncation for non-explain output.
pub struct LongStringDescriber {
    tag: TagIndex,
}

impl LongStringDescriber {
    pub fn new(tag: TagIndex) -> Self {
        Self { tag }
    }
}

impl<O: Offset> PatternDescriber<O> for LongStringDescriber {
    fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn describe(
        &self,
        context: &mut Context,
        view: &ImageView<O>,
        _tags: &TagHolder,
        index: AllocationIndex,
        explain: bool,
    ) -> Result<()> {
        let allocation = view.finder.allocation_at(index);
        writeln!(context.output(), "This allocation matches pattern LongString.")?;
        let image = match view.map.find_mapped_memory_image(allocation.address()) {
            Ok(image) => image,
            Err(_) => return Ok(()),
        };
        if image.len() < allocation.size().as_usize() {
            return Ok(());
        }
        let payload = &image[..allocation.size().as_usize()];
        let length = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        write!(context.output(), "The string has 0x{:x} bytes, ", length)?;
        if explain || length < STRING_PREVIEW_BYTES {
            writeln!(
                context.output(),
                "containing\n\"{}\".",
                String::from_utf8_lossy(&payload[..length])
            )?;
        } else {
            writeln!(
                context.output(),
                "starting with\n\"{}\".",
                String::from_utf8_lossy(&payload[..STRING_PREVIEW_BYTES])
            )?;
        }
        Ok(())
    }
}

/// Renders copy-on-write string bodies with their header fields.
pub struct CowStringBodyDescriber {
    tag: TagIndex,
}

impl CowStringBodyDescriber {
    pub fn new(tag: TagIndex) -> Self {
        Self { tag }
    }
}

impl<O: Offset> PatternDescriber<O> for CowStringBodyDescriber {
    fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn describe(
        &self,
        context: &mut Context,
        view: &ImageView<O>,
        _tags: &TagHolder,
        index: AllocationIndex,
        explain: bool,
    ) -> Result<()> {
        let allocation = view.finder.allocation_at(index);
        writeln!(
            context.output(),
            "This allocation matches pattern COWStringBody."
        )?;
        if let Ok(image) = view.map.find_mapped_memory_image(allocation.address()) {
            if image.len() >= 3 * O::BYTES {
                let length = O::read_le(image);
                let refcount = O::read_le(&image[2 * O::BYTES..]);
                writeln!(context.output(), "The string has 0x{:x} bytes.", length)?;
                if explain {
                    writeln!(
                        context.output(),
                        "A reference count of 0x{:x} precedes the characters.",
                        refcount
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// One-line describers for patterns whose rendering is a fixed statement
/// plus an optional explanation.
pub struct SimplePatternDescriber {
    tag: TagIndex,
    pattern: &'static str,
    explanation: &'static str,
}

impl SimplePatternDescriber {
    pub fn new(tag: TagIndex, pattern: &'static str, explanation: &'static str) -> Self {
        Self {
            tag,
            pattern,
            explanation,
        }
    }
}

impl<O: Offset> PatternDescriber<O> for SimplePatternDescriber {
    fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn describe(
        &self,
        context: &mut Context,
        _view: &ImageView<O>,
        _tags: &TagHolder,
        _index: AllocationIndex,
        explain: bool,
    ) -> Result<()> {
        writeln!(
            context.output(),
            "This allocation matches pattern {}.",
            self.pattern
        )?;
        if explain {
            writeln!(context.output(), "{}", self.explanation)?;
        }
        Ok(())
    }
}

/// The `SSL_CTX` describer keeps the historical explanation wording.
pub fn ssl_ctx_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "SSL_CTX",
        "The first pointer points to what appears to be an SSL_METHOD structure.",
    )
}

pub fn deque_map_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "DequeMap",
        "The allocation holds the block pointers for a deque.",
    )
}

pub fn deque_block_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "DequeBlock",
        "The allocation holds elements of a deque.",
    )
}

pub fn list_node_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "ListNode",
        "The allocation starts with the next and prev words of a doubly linked list node.",
    )
}

pub fn map_or_set_node_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "MapOrSetNode",
        "The allocation starts with the color, parent, left and right words of a red-black tree node.",
    )
}

pub fn unordered_buckets_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "UnorderedMapOrSetBuckets",
        "The allocation holds the bucket array of a hashtable.",
    )
}

pub fn unordered_node_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "UnorderedMapOrSetNode",
        "The allocation is on the node chain of a hashtable.",
    )
}

pub fn python_object_describer(tag: TagIndex) -> SimplePatternDescriber {
    SimplePatternDescriber::new(
        tag,
        "PythonObject",
        "The first word looks like a reference count and the second points to a python type object.",
    )
}
