/*!
The analysis session over one core image.
*/

use std::io::Write;

use log::{info, warn};

use heapview::allocations::{
    AnchorDirectory, Finder, Graph, ImageView, SignatureDirectory, TagHolder, TaggerRunner,
};
use heapview::describe::{Context, DescriberRegistry};
use heapview::mem::{
    partition, RangeFlags, VirtualAddressMap, VirtualMemoryPartition,
};
use heapview::options::AnalysisOptions;
use heapview::process::{ModuleDirectory, ThreadMap};
use heapview::types::Offset;

use crate::describers::{
    deque_block_describer, deque_map_describer, list_node_describer, map_or_set_node_describer,
    python_object_describer, ssl_ctx_describer, unordered_buckets_describer,
    unordered_node_describer, CowStringBodyDescriber, LongStringDescriber, VectorBodyDescriber,
};
use crate::error::Result;
use crate::heap::{walk_arenas, Arena};
use crate::taggers::{
    CowStringTagger, DequeTagger, ListNodeTagger, LongStringTagger, MapOrSetNodeTagger,
    OpenSslTagger, PythonObjectTagger, UnorderedTagger, VectorBodyTagger,
};

/// Everything known about one analyzed process image.
///
/// Built in dependency order by [`ProcessImageBuilder::analyze`]; read-only
/// afterwards for the duration of the session.
pub struct ProcessImage<'a, O: Offset> {
    map: &'a VirtualAddressMap<'a, O>,
    threads: ThreadMap<O>,
    modules: ModuleDirectory<O>,
    partition: VirtualMemoryPartition<O>,
    signatures: SignatureDirectory<O>,
    anchors: AnchorDirectory<O>,
    finder: Finder<O>,
    graph: Graph<O>,
    tags: TagHolder,
    describers: DescriberRegistry<O>,
    options: AnalysisOptions,
}

impl<'a, O: Offset> ProcessImage<'a, O> {
    pub fn builder(map: &'a VirtualAddressMap<'a, O>) -> ProcessImageBuilder<'a, O> {
        ProcessImageBuilder::new(map)
    }

    pub fn address_map(&self) -> &VirtualAddressMap<'a, O> {
        self.map
    }

    pub fn thread_map(&self) -> &ThreadMap<O> {
        &self.threads
    }

    pub fn module_directory(&self) -> &ModuleDirectory<O> {
        &self.modules
    }

    pub fn partition(&self) -> &VirtualMemoryPartition<O> {
        &self.partition
    }

    pub fn signature_directory(&self) -> &SignatureDirectory<O> {
        &self.signatures
    }

    pub fn anchor_directory(&self) -> &AnchorDirectory<O> {
        &self.anchors
    }

    pub fn finder(&self) -> &Finder<O> {
        &self.finder
    }

    pub fn graph(&self) -> &Graph<O> {
        &self.graph
    }

    pub fn tag_holder(&self) -> &TagHolder {
        &self.tags
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// The capability bundle recognizers and describers work against.
    pub fn view(&self) -> ImageView<'_, O> {
        ImageView {
            map: self.map,
            finder: &self.finder,
            graph: &self.graph,
            modules: &self.modules,
            signatures: &self.signatures,
            threads: &self.threads,
            options: &self.options,
        }
    }

    /// The registered name of the tag carried by `index`, or "".
    pub fn tag_name_of(&self, index: usize) -> &'static str {
        self.tags.tag_name(self.tags.get_tag_index(index))
    }

    /// Renders the allocation and, when tagged, its pattern description.
    pub fn describe_allocation(
        &self,
        output: &mut dyn Write,
        index: usize,
        explain: bool,
    ) -> Result<()> {
        let mut context = Context::new(output);
        self.describers
            .describe_allocation(&mut context, &self.view(), &self.tags, index, explain)?;
        Ok(())
    }
}

/// Assembles the analysis inputs and runs the session.
pub struct ProcessImageBuilder<'a, O: Offset> {
    map: &'a VirtualAddressMap<'a, O>,
    threads: ThreadMap<O>,
    modules: ModuleDirectory<O>,
    signatures: SignatureDirectory<O>,
    anchors: AnchorDirectory<O>,
    options: AnalysisOptions,
}

impl<'a, O: Offset> ProcessImageBuilder<'a, O> {
    pub fn new(map: &'a VirtualAddressMap<'a, O>) -> Self {
        Self {
            map,
            threads: ThreadMap::empty(),
            modules: ModuleDirectory::empty(),
            signatures: SignatureDirectory::new(),
            anchors: AnchorDirectory::new(),
            options: AnalysisOptions::default(),
        }
    }

    pub fn thread_map(mut self, threads: ThreadMap<O>) -> Self {
        self.threads = threads;
        self
    }

    pub fn module_directory(mut self, modules: ModuleDirectory<O>) -> Self {
        self.modules = modules;
        self
    }

    pub fn signature_directory(mut self, signatures: SignatureDirectory<O>) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn anchor_directory(mut self, anchors: AnchorDirectory<O>) -> Self {
        self.anchors = anchors;
        self
    }

    pub fn options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs the whole analysis: claims the known regions, walks the heap,
    /// builds the graph and resolves all allocation tags.
    pub fn analyze(self) -> Result<ProcessImage<'a, O>> {
        let Self {
            map,
            threads,
            modules,
            signatures,
            anchors,
            options,
        } = self;

        let mut claims = VirtualMemoryPartition::new();
        for thread in threads.iter() {
            if !claims.claim_range(
                thread.stack_low(),
                thread.stack_size(),
                partition::STACK,
                false,
            ) {
                warn!(
                    "overlap found for stack range for thread {}",
                    thread.thread_num
                );
            }
            // an unreadable range right below the stack is its guard
            if let Some(below) = thread.stack_low().checked_sub(O::word()) {
                if let Some(range) = map.range_at(below) {
                    if !range.flags.contains(RangeFlags::READ) {
                        claims.claim_range(
                            range.base,
                            range.size,
                            partition::STACK_OVERFLOW_GUARD,
                            false,
                        );
                    }
                }
            }
        }
        for module in modules.iter() {
            for segment in module.segments.iter() {
                let label = if segment.flags.contains(RangeFlags::EXECUTE) {
                    partition::MODULE_TEXT
                } else {
                    partition::MODULE_DATA
                };
                if !claims.claim_range(segment.base, segment.size, label, false) {
                    warn!(
                        "overlap found for segment at 0x{:x} of module {}",
                        segment.base,
                        module.name()
                    );
                }
            }
        }

        // whatever writable memory nobody else claimed is candidate heap
        let mut arenas = Vec::new();
        for range in map.iter().filter(|r| r.flags.contains(RangeFlags::WRITE)) {
            for (base, size) in claims.unclaimed_within(range.base, range.size) {
                arenas.push(Arena::new(base, base + size));
            }
        }
        let finder = walk_arenas(map, &arenas)?;
        info!(
            "{} allocations in {} candidate arenas",
            finder.num_allocations(),
            arenas.len()
        );
        for allocation in finder.iter().filter(|a| a.is_used()) {
            claims.claim_range(
                allocation.address(),
                allocation.size(),
                partition::USED_ALLOCATION,
                false,
            );
        }

        let graph = Graph::build(map, &finder, &threads, &modules);

        let mut tags = TagHolder::new(finder.num_allocations());
        let mut runner = TaggerRunner::new();
        let mut describers = DescriberRegistry::new();

        // strong patterns first; the weak vector body recognizer runs last
        let deque = DequeTagger::new(&mut tags);
        describers.register(Box::new(deque_map_describer(deque.map_tag_index())));
        describers.register(Box::new(deque_block_describer(deque.block_tag_index())));
        runner.register(Box::new(deque));

        let unordered = UnorderedTagger::new(&mut tags);
        describers.register(Box::new(unordered_buckets_describer(
            unordered.buckets_tag_index(),
        )));
        describers.register(Box::new(unordered_node_describer(
            unordered.node_tag_index(),
        )));
        runner.register(Box::new(unordered));

        let list = ListNodeTagger::new(&mut tags);
        describers.register(Box::new(list_node_describer(list.tag_index())));
        runner.register(Box::new(list));

        let map_or_set = MapOrSetNodeTagger::new(&mut tags);
        describers.register(Box::new(map_or_set_node_describer(map_or_set.tag_index())));
        runner.register(Box::new(map_or_set));

        let long_string = LongStringTagger::new(&mut tags);
        describers.register(Box::new(LongStringDescriber::new(long_string.tag_index())));
        runner.register(Box::new(long_string));

        if options.cow_strings {
            let cow_string = CowStringTagger::new(&mut tags);
            describers.register(Box::new(CowStringBodyDescriber::new(
                cow_string.tag_index(),
            )));
            runner.register(Box::new(cow_string));
        }

        let openssl = OpenSslTagger::new(&mut tags);
        describers.register(Box::new(ssl_ctx_describer(openssl.tag_index())));
        runner.register(Box::new(openssl));

        let python = PythonObjectTagger::new(&mut tags);
        describers.register(Box::new(python_object_describer(python.tag_index())));
        runner.register(Box::new(python));

        let vector = VectorBodyTagger::new(&mut tags);
        describers.register(Box::new(VectorBodyDescriber::new(vector.tag_index())));
        runner.register(Box::new(vector));

        {
            let view = ImageView {
                map,
                finder: &finder,
                graph: &graph,
                modules: &modules,
                signatures: &signatures,
                threads: &threads,
                options: &options,
            };
            runner.resolve_all_allocation_tags(&view, &mut tags);
        }

        Ok(ProcessImage {
            map,
            threads,
            modules,
            partition: claims,
            signatures,
            anchors,
            finder,
            graph,
            tags,
            describers,
            options,
        })
    }
}
