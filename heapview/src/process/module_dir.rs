/*!
Directory of the modules mapped into the analyzed process.
*/

use crate::mem::RangeFlags;
use crate::types::Offset;

/// One segment of a loaded module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct ModuleSegment<O: Offset> {
    pub base: O,
    pub size: O,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub flags: RangeFlags,
}

impl<O: Offset> ModuleSegment<O> {
    pub fn limit(&self) -> O {
        self.base + self.size
    }

    pub fn contains(&self, addr: O) -> bool {
        addr >= self.base && addr < self.limit()
    }
}

/// A loaded module and its segments.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct ModuleInfo<O: Offset> {
    pub path: String,
    pub base: O,
    pub segments: Vec<ModuleSegment<O>>,
}

impl<O: Offset> ModuleInfo<O> {
    /// The file name component of the module path.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn contains(&self, addr: O) -> bool {
        self.segments.iter().any(|s| s.contains(addr))
    }
}

/// Resolves addresses to modules and module segments.
///
/// The directory distinguishes static-anchor regions (writable module data)
/// from other mapped memory and backs signature resolution.
pub struct ModuleDirectory<O: Offset> {
    modules: Vec<ModuleInfo<O>>,
}

impl<O: Offset> ModuleDirectory<O> {
    pub fn new(mut modules: Vec<ModuleInfo<O>>) -> Self {
        for module in modules.iter_mut() {
            module.segments.sort_by_key(|s| s.base.as_u64());
        }
        modules.sort_by_key(|m| m.base.as_u64());
        Self { modules }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleInfo<O>> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The module and segment containing `addr`.
    pub fn resolve(&self, addr: O) -> Option<(&ModuleInfo<O>, &ModuleSegment<O>)> {
        for module in self.modules.iter() {
            if let Some(segment) = module.segments.iter().find(|s| s.contains(addr)) {
                return Some((module, segment));
            }
        }
        None
    }

    /// The first module (in base-address order) whose file name contains
    /// `fragment`.
    pub fn find_by_name_fragment(&self, fragment: &str) -> Option<&ModuleInfo<O>> {
        self.modules.iter().find(|m| m.name().contains(fragment))
    }

    /// Readable and writable module segments, the regions scanned for
    /// static anchors, in ascending address order.
    pub fn static_anchor_ranges(&self) -> Vec<(O, O)> {
        let mut ranges: Vec<(O, O)> = self
            .modules
            .iter()
            .flat_map(|m| m.segments.iter())
            .filter(|s| s.flags.contains(RangeFlags::READ | RangeFlags::WRITE))
            .map(|s| (s.base, s.size))
            .collect();
        ranges.sort_by_key(|(base, _)| base.as_u64());
        ranges
    }
}
