/*!
Disjoint labeling of claimed address ranges.
*/

use std::collections::BTreeMap;

use log::warn;

use crate::types::Offset;

/// Label used for thread stack ranges.
pub const STACK: &str = "stack";
/// Label used for the inaccessible page below a stack.
pub const STACK_OVERFLOW_GUARD: &str = "stack overflow guard";
/// Label used for executable module segments.
pub const MODULE_TEXT: &str = "module text";
/// Label used for non-executable module segments.
pub const MODULE_DATA: &str = "module data";
/// Label used for discovered in-use heap allocations.
pub const USED_ALLOCATION: &str = "used allocation";

/// An ownership-labeled half-open interval of the address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Claim<O: Offset> {
    pub base: O,
    pub size: O,
    pub label: &'static str,
    pub allow_overlap: bool,
}

impl<O: Offset> Claim<O> {
    pub fn limit(&self) -> O {
        self.base + self.size
    }

    pub fn contains(&self, addr: O) -> bool {
        addr >= self.base && addr < self.limit()
    }

    fn intersects(&self, base: O, limit: O) -> bool {
        self.base < limit && self.limit() > base
    }
}

/// Tracks which parts of the address space are spoken for.
///
/// Exclusive claims are kept mutually disjoint, so the overlap test for a
/// new exclusive claim is a single predecessor lookup. Overlap-allowed
/// claims always succeed and are only consulted when a later exclusive
/// claim is tested against them.
pub struct VirtualMemoryPartition<O: Offset> {
    exclusive: BTreeMap<u64, Claim<O>>,
    shared: Vec<Claim<O>>,
}

impl<O: Offset> Default for VirtualMemoryPartition<O> {
    fn default() -> Self {
        Self {
            exclusive: BTreeMap::new(),
            shared: Vec::new(),
        }
    }
}

impl<O: Offset> VirtualMemoryPartition<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `[base, base + size)` under `label`.
    ///
    /// With `allow_overlap` set the claim always succeeds. Otherwise the
    /// claim is exclusive: if any existing claim intersects the request, a
    /// warning is logged, the call returns false and the partition is left
    /// unchanged.
    pub fn claim_range(&mut self, base: O, size: O, label: &'static str, allow_overlap: bool) -> bool {
        if size == O::ZERO || base.checked_add(size).is_none() {
            return false;
        }
        let claim = Claim {
            base,
            size,
            label,
            allow_overlap,
        };
        if allow_overlap {
            self.shared.push(claim);
            return true;
        }
        let limit = claim.limit();
        if let Some(existing) = self.intersecting_claim(base, limit) {
            warn!(
                "rejecting claim \"{}\" at 0x{:x}: overlaps \"{}\" at 0x{:x}",
                label, base, existing.label, existing.base
            );
            return false;
        }
        self.exclusive.insert(base.as_u64(), claim);
        true
    }

    /// The claim covering `addr`, preferring exclusive claims.
    pub fn claim_at(&self, addr: O) -> Option<&Claim<O>> {
        if let Some((_, claim)) = self.exclusive.range(..=addr.as_u64()).next_back() {
            if claim.contains(addr) {
                return Some(claim);
            }
        }
        self.shared.iter().find(|c| c.contains(addr))
    }

    /// Subtracts the exclusive claims from `[base, base + size)` and returns
    /// the unclaimed gaps in ascending order.
    pub fn unclaimed_within(&self, base: O, size: O) -> Vec<(O, O)> {
        let limit = base + size;
        let mut gaps = Vec::new();
        let mut cursor = base;

        // an earlier claim may reach into the queried interval
        if let Some((_, claim)) = self.exclusive.range(..cursor.as_u64()).next_back() {
            if claim.limit() > cursor {
                cursor = claim.limit().min(limit);
            }
        }

        for (_, claim) in self.exclusive.range(cursor.as_u64()..limit.as_u64()) {
            if claim.base > cursor {
                gaps.push((cursor, claim.base.min(limit) - cursor));
            }
            cursor = claim.limit().min(limit);
            if cursor == limit {
                break;
            }
        }
        if cursor < limit {
            gaps.push((cursor, limit - cursor));
        }
        gaps
    }

    pub fn num_claims(&self) -> usize {
        self.exclusive.len() + self.shared.len()
    }

    fn intersecting_claim(&self, base: O, limit: O) -> Option<&Claim<O>> {
        if let Some((_, claim)) = self.exclusive.range(..limit.as_u64()).next_back() {
            if claim.intersects(base, limit) {
                return Some(claim);
            }
        }
        self.shared.iter().find(|c| c.intersects(base, limit))
    }
}
