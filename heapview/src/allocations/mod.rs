/*!
The allocation model: discovery results, the reference graph, tags and the
recognizer framework.

An allocation is identified by a dense index into the
[Finder](struct.Finder.html). The [Graph](struct.Graph.html) materializes
the inter-allocation pointer graph plus external anchor points, the
[TagHolder](struct.TagHolder.html) records the one tag each allocation may
carry, and the [TaggerRunner](struct.TaggerRunner.html) drives the phased
[Tagger](trait.Tagger.html) recognizers to convergence.
*/

pub mod finder;
pub use finder::{Allocation, AllocationIndex, Finder};

pub mod contiguous;
pub use contiguous::ContiguousImage;

pub mod graph;
pub use graph::Graph;

pub mod tag_holder;
pub use tag_holder::{TagHolder, TagIndex, UNTAGGED};

pub mod signature;
pub use signature::SignatureDirectory;

pub mod anchor_dir;
pub use anchor_dir::AnchorDirectory;

pub mod tagger;
pub use tagger::{already_tagged, ImageView, Phase, Tagger, TaggerRunner};
