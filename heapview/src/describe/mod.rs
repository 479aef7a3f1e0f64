/*!
Rendering of analyzed allocations as human text.
*/

use std::io::Write;

use crate::allocations::{AllocationIndex, ImageView, TagHolder, TagIndex, UNTAGGED};
use crate::error::Result;
use crate::types::Offset;

/// Carries the output sink and rendering flags of one describe request.
pub struct Context<'w> {
    output: &'w mut dyn Write,
    show_addresses: bool,
}

impl<'w> Context<'w> {
    pub fn new(output: &'w mut dyn Write) -> Self {
        Self {
            output,
            show_addresses: true,
        }
    }

    pub fn with_show_addresses(mut self, show_addresses: bool) -> Self {
        self.show_addresses = show_addresses;
        self
    }

    pub fn output(&mut self) -> &mut dyn Write {
        self.output
    }

    pub fn show_addresses(&self) -> bool {
        self.show_addresses
    }
}

/// Renders an allocation carrying one specific tag.
///
/// The allocation has already been pre-tagged as matching the pattern; the
/// describer only renders. When `explain` is set it additionally justifies
/// the classification.
pub trait PatternDescriber<O: Offset> {
    fn tag_index(&self) -> TagIndex;

    fn describe(
        &self,
        context: &mut Context,
        view: &ImageView<O>,
        tags: &TagHolder,
        index: AllocationIndex,
        explain: bool,
    ) -> Result<()>;
}

/// Dispatches an allocation to the describer registered for its tag.
pub struct DescriberRegistry<O: Offset> {
    describers: Vec<Box<dyn PatternDescriber<O>>>,
}

impl<O: Offset> Default for DescriberRegistry<O> {
    fn default() -> Self {
        Self {
            describers: Vec::new(),
        }
    }
}

impl<O: Offset> DescriberRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, describer: Box<dyn PatternDescriber<O>>) {
        self.describers.push(describer);
    }

    /// Prints the standard allocation line, then the pattern description if
    /// the allocation is tagged and a describer is registered for the tag.
    pub fn describe_allocation(
        &self,
        context: &mut Context,
        view: &ImageView<O>,
        tags: &TagHolder,
        index: AllocationIndex,
        explain: bool,
    ) -> Result<()> {
        let allocation = view.finder.allocation_at(index);
        let state = if allocation.is_used() { "Used" } else { "Free" };
        if context.show_addresses() {
            writeln!(
                context.output(),
                "{} allocation at 0x{:x} of size 0x{:x}.",
                state,
                allocation.address(),
                allocation.size()
            )?;
        } else {
            writeln!(
                context.output(),
                "{} allocation of size 0x{:x}.",
                state,
                allocation.size()
            )?;
        }

        let tag = tags.get_tag_index(index);
        if tag == UNTAGGED {
            return Ok(());
        }
        if let Some(describer) = self.describers.iter().find(|d| d.tag_index() == tag) {
            describer.describe(context, view, tags, index, explain)?;
        }
        Ok(())
    }
}
