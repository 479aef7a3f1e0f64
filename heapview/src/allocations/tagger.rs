/*!
The phased recognizer contract and its scheduler.
*/

use log::trace;

use crate::mem::{Reader, VirtualAddressMap};
use crate::options::AnalysisOptions;
use crate::process::{ModuleDirectory, ThreadMap};
use crate::types::Offset;

use super::contiguous::ContiguousImage;
use super::finder::{Allocation, AllocationIndex, Finder};
use super::graph::Graph;
use super::signature::SignatureDirectory;
use super::tag_holder::{TagHolder, UNTAGGED};

/// Ordered confidence levels at which a recognizer may act.
///
/// Earlier phases get first claim. `WeakCheck` exists for recognizers that
/// can only confirm themselves through an external witness (an anchor or an
/// owning referrer), so that higher-confidence patterns may tag first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Contractually a constant-time rejection based on size.
    QuickInitialCheck,
    MediumCheck,
    SlowCheck,
    WeakCheck,
}

/// Read-only capabilities shared by every recognizer and describer.
///
/// The original design hands each recognizer references to the finder,
/// graph and address map at construction; bundling them keeps the trait
/// object free of lifetimes and the borrows obviously disjoint from the
/// mutable tag holder.
pub struct ImageView<'a, O: Offset> {
    pub map: &'a VirtualAddressMap<'a, O>,
    pub finder: &'a Finder<O>,
    pub graph: &'a Graph<O>,
    pub modules: &'a ModuleDirectory<O>,
    pub signatures: &'a SignatureDirectory<O>,
    pub threads: &'a ThreadMap<O>,
    pub options: &'a AnalysisOptions,
}

impl<'a, O: Offset> ImageView<'a, O> {
    /// The "no such allocation" index.
    pub fn sentinel(&self) -> AllocationIndex {
        self.finder.sentinel()
    }
}

/// A pattern recognizer participating in the tagging passes.
///
/// Both callbacks return `true` to signal "done with this allocation for
/// this pass"; the runner then skips the tagger's remaining phases for the
/// allocation. State must only be altered through
/// [`TagHolder::tag_allocation`].
pub trait Tagger<O: Offset> {
    /// Considers properties intrinsic to the candidate allocation.
    #[allow(clippy::too_many_arguments)]
    fn tag_from_allocation(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        is_unsigned: bool,
    ) -> bool;

    /// Considers the allocation as a potential owner of other allocations.
    ///
    /// `outgoing[k]` is the allocation referenced by payload word `k`, or
    /// the sentinel.
    #[allow(clippy::too_many_arguments)]
    fn tag_from_referenced(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        outgoing: &[AllocationIndex],
    ) -> bool;
}

/// Multi-pass scheduler orchestrating all registered taggers.
///
/// For every allocation the quick, medium and slow phases of all taggers
/// run before the weak phase of any, so a slow check of a weak pattern can
/// never claim an allocation a strong check would have claimed. The weak
/// pass runs with all taggers re-armed.
pub struct TaggerRunner<O: Offset> {
    taggers: Vec<Box<dyn Tagger<O>>>,
}

impl<O: Offset> Default for TaggerRunner<O> {
    fn default() -> Self {
        Self {
            taggers: Vec::new(),
        }
    }
}

impl<O: Offset> TaggerRunner<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tagger. Registration order decides who wins ties within
    /// one phase.
    pub fn register(&mut self, tagger: Box<dyn Tagger<O>>) {
        self.taggers.push(tagger);
    }

    pub fn num_taggers(&self) -> usize {
        self.taggers.len()
    }

    /// Runs all taggers over all used allocations in ascending index order.
    ///
    /// One full pass; recognizers are idempotent and position-independent,
    /// so further passes would not converge to new tags.
    pub fn resolve_all_allocation_tags(&mut self, view: &ImageView<O>, tags: &mut TagHolder) {
        let num_taggers = self.taggers.len();
        let mut done_allocation = vec![false; num_taggers];
        let mut done_referenced = vec![false; num_taggers];
        let mut reader = Reader::new(view.map);

        for index in 0..view.finder.num_allocations() {
            let allocation = *view.finder.allocation_at(index);
            if !allocation.is_used() {
                continue;
            }
            let image = match ContiguousImage::new(view.map, &allocation) {
                Ok(image) => image,
                Err(_) => {
                    trace!(
                        "allocation at 0x{:x} is not fully mapped, skipping tagging",
                        allocation.address()
                    );
                    continue;
                }
            };
            let outgoing = view.graph.outgoing(index);
            let is_unsigned =
                image.word_count() == 0 || !view.signatures.is_signature(image.word(0));

            done_allocation.iter_mut().for_each(|d| *d = false);
            done_referenced.iter_mut().for_each(|d| *d = false);
            for phase in [Phase::QuickInitialCheck, Phase::MediumCheck, Phase::SlowCheck] {
                for (t, tagger) in self.taggers.iter_mut().enumerate() {
                    if !done_allocation[t] {
                        done_allocation[t] = tagger.tag_from_allocation(
                            view,
                            tags,
                            &image,
                            &mut reader,
                            index,
                            phase,
                            &allocation,
                            is_unsigned,
                        );
                    }
                    if !done_referenced[t] {
                        done_referenced[t] = tagger.tag_from_referenced(
                            view,
                            tags,
                            &image,
                            &mut reader,
                            index,
                            phase,
                            &allocation,
                            outgoing,
                        );
                    }
                }
            }

            // weak pass, all taggers re-armed
            for tagger in self.taggers.iter_mut() {
                tagger.tag_from_allocation(
                    view,
                    tags,
                    &image,
                    &mut reader,
                    index,
                    Phase::WeakCheck,
                    &allocation,
                    is_unsigned,
                );
                tagger.tag_from_referenced(
                    view,
                    tags,
                    &image,
                    &mut reader,
                    index,
                    Phase::WeakCheck,
                    &allocation,
                    outgoing,
                );
            }
        }
    }
}

/// Convenience for recognizers: true when the allocation already carries a
/// tag and the callback should short-circuit.
pub fn already_tagged(tags: &TagHolder, index: AllocationIndex) -> bool {
    tags.get_tag_index(index) != UNTAGGED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocations::finder::Allocation;
    use crate::allocations::tag_holder::TagIndex;
    use crate::mem::{RangeAttributes, RangeFlags};
    use crate::options::AnalysisOptions;

    use std::cell::RefCell;
    use std::rc::Rc;

    type PhaseLog = Rc<RefCell<Vec<(usize, AllocationIndex, Phase)>>>;

    /// Records the phases it sees and tags at a configured phase.
    struct ProbeTagger {
        id: usize,
        tag: TagIndex,
        tag_at: Phase,
        done_after: Phase,
        log: PhaseLog,
    }

    impl Tagger<u64> for ProbeTagger {
        fn tag_from_allocation(
            &mut self,
            _view: &ImageView<u64>,
            tags: &mut TagHolder,
            _image: &ContiguousImage<u64>,
            _reader: &mut Reader<u64>,
            index: AllocationIndex,
            phase: Phase,
            _allocation: &Allocation<u64>,
            _is_unsigned: bool,
        ) -> bool {
            self.log.borrow_mut().push((self.id, index, phase));
            if phase == self.tag_at {
                tags.tag_allocation(index, self.tag);
            }
            phase >= self.done_after
        }

        fn tag_from_referenced(
            &mut self,
            _view: &ImageView<u64>,
            _tags: &mut TagHolder,
            _image: &ContiguousImage<u64>,
            _reader: &mut Reader<u64>,
            _index: AllocationIndex,
            _phase: Phase,
            _allocation: &Allocation<u64>,
            _outgoing: &[AllocationIndex],
        ) -> bool {
            true
        }
    }

    fn run_probes(probes: Vec<ProbeTagger>) -> TagHolder {
        let image = vec![0u8; 0x100];
        let map = VirtualAddressMap::new(
            &image,
            vec![RangeAttributes::new(0x1000, 0x100, 0, RangeFlags::READ)],
        )
        .unwrap();
        let finder = Finder::from_sorted(vec![Allocation::new(0x1000, 0x20, true)]).unwrap();
        let threads = ThreadMap::empty();
        let modules = ModuleDirectory::empty();
        let graph = Graph::build(&map, &finder, &threads, &modules);
        let signatures = SignatureDirectory::new();
        let options = AnalysisOptions::default();
        let view = ImageView {
            map: &map,
            finder: &finder,
            graph: &graph,
            modules: &modules,
            signatures: &signatures,
            threads: &threads,
            options: &options,
        };

        let mut tags = TagHolder::new(finder.num_allocations());
        let mut runner = TaggerRunner::new();
        for probe in probes {
            runner.register(Box::new(probe));
        }
        runner.resolve_all_allocation_tags(&view, &mut tags);
        tags
    }

    #[test]
    fn test_phase_schedule() {
        let log: PhaseLog = Rc::new(RefCell::new(Vec::new()));
        run_probes(vec![ProbeTagger {
            id: 0,
            tag: 1,
            tag_at: Phase::WeakCheck,
            done_after: Phase::SlowCheck,
            log: log.clone(),
        }]);
        assert_eq!(
            *log.borrow(),
            vec![
                (0, 0, Phase::QuickInitialCheck),
                (0, 0, Phase::MediumCheck),
                (0, 0, Phase::SlowCheck),
                (0, 0, Phase::WeakCheck),
            ]
        );
    }

    #[test]
    fn test_done_skips_later_phases() {
        let log: PhaseLog = Rc::new(RefCell::new(Vec::new()));
        run_probes(vec![ProbeTagger {
            id: 0,
            tag: 1,
            tag_at: Phase::WeakCheck,
            done_after: Phase::QuickInitialCheck,
            log: log.clone(),
        }]);
        // quick check said done, but the weak pass re-arms
        assert_eq!(
            *log.borrow(),
            vec![(0, 0, Phase::QuickInitialCheck), (0, 0, Phase::WeakCheck)]
        );
    }

    #[test]
    fn test_earlier_phase_wins_over_registration_order() {
        let mut holder = TagHolder::new(1);
        let weak = holder.register_tag("weak pattern");
        let strong = holder.register_tag("strong pattern");
        let log: PhaseLog = Rc::new(RefCell::new(Vec::new()));
        // the weak tagger is registered first but only tags in the weak
        // pass; the strong tagger tags at medium and must win
        let tags = run_probes(vec![
            ProbeTagger {
                id: 0,
                tag: weak,
                tag_at: Phase::WeakCheck,
                done_after: Phase::SlowCheck,
                log: log.clone(),
            },
            ProbeTagger {
                id: 1,
                tag: strong,
                tag_at: Phase::MediumCheck,
                done_after: Phase::SlowCheck,
                log,
            },
        ]);
        assert_eq!(tags.get_tag_index(0), strong);
    }
}
