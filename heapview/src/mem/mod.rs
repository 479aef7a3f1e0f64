/*!
Byte-accurate views over the core image.

The [VirtualAddressMap](struct.VirtualAddressMap.html) locates mapped byte
ranges of the snapshot, the [Reader](struct.Reader.html) amortizes repeated
nearby reads, and the
[VirtualMemoryPartition](struct.VirtualMemoryPartition.html) labels claimed
address ranges (stacks, guards, module regions, heap).
*/

pub mod address_map;
pub use address_map::{RangeAttributes, RangeFlags, Reader, VirtualAddressMap};

pub mod partition;
pub use partition::{Claim, VirtualMemoryPartition};
