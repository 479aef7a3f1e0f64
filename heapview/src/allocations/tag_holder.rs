/*!
Injective assignment of one tag per allocation.
*/

use super::finder::AllocationIndex;

/// Index of a registered tag. `0` means untagged.
pub type TagIndex = u16;

/// The untagged state.
pub const UNTAGGED: TagIndex = 0;

/// Holds the single tag each allocation may carry.
///
/// The first writer wins: assigning a tag to an already tagged allocation
/// is silently ignored. Recognizers rely on this to avoid stealing
/// allocations from stronger patterns that ran earlier.
pub struct TagHolder {
    names: Vec<&'static str>,
    tags: Vec<TagIndex>,
}

impl TagHolder {
    pub fn new(num_allocations: usize) -> Self {
        Self {
            names: vec![""],
            tags: vec![UNTAGGED; num_allocations],
        }
    }

    /// Registers a tag name at setup and returns its index.
    pub fn register_tag(&mut self, name: &'static str) -> TagIndex {
        self.names.push(name);
        (self.names.len() - 1) as TagIndex
    }

    /// Assigns `tag` to the allocation unless it already carries one.
    ///
    /// Returns whether the tag was written.
    pub fn tag_allocation(&mut self, index: AllocationIndex, tag: TagIndex) -> bool {
        if self.tags[index] != UNTAGGED {
            return false;
        }
        self.tags[index] = tag;
        true
    }

    pub fn get_tag_index(&self, index: AllocationIndex) -> TagIndex {
        self.tags[index]
    }

    /// The registered name of `tag`; the untagged state maps to "".
    pub fn tag_name(&self, tag: TagIndex) -> &'static str {
        self.names[tag as usize]
    }

    /// Number of registered tags, not counting the untagged state.
    pub fn num_tags(&self) -> usize {
        self.names.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_writer_wins() {
        let mut holder = TagHolder::new(4);
        let vector = holder.register_tag("vector body");
        let deque = holder.register_tag("deque block");

        assert!(holder.tag_allocation(2, deque));
        assert!(!holder.tag_allocation(2, vector));
        assert_eq!(holder.get_tag_index(2), deque);
        assert_eq!(holder.tag_name(holder.get_tag_index(2)), "deque block");
        assert_eq!(holder.get_tag_index(0), UNTAGGED);
    }

    #[test]
    fn test_registration() {
        let mut holder = TagHolder::new(1);
        assert_eq!(holder.num_tags(), 0);
        let first = holder.register_tag("long string");
        assert_eq!(first, 1);
        assert_eq!(holder.num_tags(), 1);
        assert_eq!(holder.tag_name(UNTAGGED), "");
    }
}
