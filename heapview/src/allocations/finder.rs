/*!
The directory of discovered heap allocations.
*/

use crate::error::{Error, Result};
use crate::types::Offset;

/// Dense index of an allocation within a [`Finder`].
///
/// The sentinel value `Finder::num_allocations()` denotes "no such
/// allocation".
pub type AllocationIndex = usize;

/// A single heap-managed byte range.
///
/// Immutable after discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct Allocation<O: Offset> {
    address: O,
    size: O,
    used: bool,
}

impl<O: Offset> Allocation<O> {
    pub fn new(address: O, size: O, used: bool) -> Self {
        Self {
            address,
            size,
            used,
        }
    }

    pub fn address(&self) -> O {
        self.address
    }

    pub fn size(&self) -> O {
        self.size
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn limit(&self) -> O {
        self.address + self.size
    }

    pub fn contains(&self, addr: O) -> bool {
        addr >= self.address && addr < self.limit()
    }

    /// Number of whole words in the payload.
    pub fn word_count(&self) -> usize {
        self.size.as_usize() / O::BYTES
    }
}

/// The address-ordered directory of all discovered allocations.
///
/// Discovery is one-shot; the directory is read-only afterwards. Passing an
/// out-of-range index to the accessors is a programmer error and panics.
pub struct Finder<O: Offset> {
    allocations: Vec<Allocation<O>>,
}

impl<O: Offset> Finder<O> {
    /// Builds the directory from an ascending, disjoint allocation list.
    pub fn from_sorted(allocations: Vec<Allocation<O>>) -> Result<Self> {
        for pair in allocations.windows(2) {
            if pair[0].limit() > pair[1].address() {
                return Err(Error::Other("allocations overlap"));
            }
        }
        Ok(Self { allocations })
    }

    pub fn empty() -> Self {
        Self {
            allocations: Vec::new(),
        }
    }

    pub fn num_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// The "no such allocation" index.
    pub fn sentinel(&self) -> AllocationIndex {
        self.allocations.len()
    }

    pub fn allocation_at(&self, index: AllocationIndex) -> &Allocation<O> {
        &self.allocations[index]
    }

    /// The allocation containing `addr`, or the sentinel.
    pub fn index_of_address(&self, addr: O) -> AllocationIndex {
        let index = self.allocations.partition_point(|a| a.address() <= addr);
        if index > 0 && self.allocations[index - 1].contains(addr) {
            index - 1
        } else {
            self.sentinel()
        }
    }

    /// The allocation whose base address is exactly `addr`, or the sentinel.
    pub fn index_of_base(&self, addr: O) -> AllocationIndex {
        match self
            .allocations
            .binary_search_by_key(&addr.as_u64(), |a| a.address().as_u64())
        {
            Ok(index) => index,
            Err(_) => self.sentinel(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation<O>> {
        self.allocations.iter()
    }
}
