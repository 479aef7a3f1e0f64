/*!
heapview is a library for reconstructing the heap of a crashed process from a
core image.

The input is a snapshot of a process's virtual address space: a mapped byte
array with a segment list, a thread map and a module directory. From raw
bytes alone the engine discovers heap allocations, builds the
inter-allocation reference graph together with its external anchor points
(statics, stacks, registers) and classifies allocations into high-level
patterns through a phased recognizer framework.

The very core of the library is the [VirtualAddressMap](mem/index.html) that
provides byte-accurate range queries over the snapshot. On top of it the
[allocations](allocations/index.html) module holds the allocation directory,
the reference [Graph](allocations/struct.Graph.html), the
[TagHolder](allocations/struct.TagHolder.html) and the
[Tagger](allocations/trait.Tagger.html) contract executed by the
[TaggerRunner](allocations/struct.TaggerRunner.html).

The engine is parameterized on the process word width through the
[Offset](types/trait.Offset.html) trait, so one build handles both 32-bit
and 64-bit images.

Allocator-specific discovery and the concrete recognizers live in companion
crates such as `heapview-glibc`.
*/

#[macro_use]
extern crate bitflags;

pub mod error;

pub mod types;

pub mod mem;

pub mod process;

pub mod allocations;

pub mod describe;

pub mod options;

pub mod prelude {
    pub mod v1 {
        pub use crate::allocations::*;
        pub use crate::describe::*;
        pub use crate::error::*;
        pub use crate::mem::*;
        pub use crate::options::*;
        pub use crate::process::*;
        pub use crate::types::*;
    }
    pub use v1::*;
}
