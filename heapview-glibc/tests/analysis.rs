/*!
End-to-end analysis scenarios over synthetic core images.
*/

use heapview::allocations::{
    Allocation, Finder, Graph, ImageView, SignatureDirectory, TagHolder, TaggerRunner, UNTAGGED,
};
use heapview::mem::RangeFlags;
use heapview::options::AnalysisOptions;
use heapview::process::{ModuleDirectory, ModuleInfo, ModuleSegment, ThreadInfo, ThreadMap};
use heapview_glibc::dummy::{ChunkSpec, DummyDump};
use heapview_glibc::heap::{walk_arenas, Arena};
use heapview_glibc::taggers::VectorBodyTagger;
use heapview_glibc::ProcessImage;

const HEAP: u64 = 0x1000_0000;
const STACK: u64 = 0x7f00_0000;
const STACK_SIZE: usize = 0x2000;

fn add_stack(dump: &mut DummyDump<u64>) {
    dump.add_segment(STACK, STACK_SIZE, RangeFlags::READ | RangeFlags::WRITE);
}

fn main_thread() -> ThreadMap<u64> {
    ThreadMap::new(vec![ThreadInfo {
        thread_num: 1,
        stack_base: STACK + STACK_SIZE as u64,
        stack_limit: STACK,
        registers: vec![],
    }])
}

fn describe(process: &ProcessImage<u64>, index: usize, explain: bool) -> String {
    let mut out = Vec::new();
    process.describe_allocation(&mut out, index, explain).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn vector_body_from_stack_anchor() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0x20)]);
    let body = payloads[0];
    add_stack(&mut dump);
    // vector of 8 ints with 3 in use, header on the main thread stack
    dump.write_word(STACK + 0x100, body);
    dump.write_word(STACK + 0x108, body + 12);
    dump.write_word(STACK + 0x110, body + 32);
    let map = dump.address_map();

    let process = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(body);
    assert_eq!(process.tag_name_of(index), "vector body");

    let text = describe(&process, index, false);
    assert!(text.contains("matches pattern Vector"), "{}", text);
    assert!(text.contains("uses 0xc of 0x20 capacity bytes"), "{}", text);
}

#[test]
fn vector_body_embedded_in_owner() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(
        HEAP,
        0x1000,
        &[ChunkSpec::used(0x40), ChunkSpec::used(0x20)],
    );
    let (owner, body) = (payloads[0], payloads[1]);
    // the owner holds the vector header at word offset 2
    dump.write_word(owner + 0x10, body);
    dump.write_word(owner + 0x18, body + 8);
    dump.write_word(owner + 0x20, body + 24);
    let map = dump.address_map();

    let process = ProcessImage::builder(&map).analyze().unwrap();

    let index = process.finder().index_of_address(body);
    assert_eq!(process.tag_name_of(index), "vector body");
}

#[test]
fn vector_body_size_floor() {
    // glibc chunks are never this small, so drive the runner directly over
    // a hand-built directory holding a one word allocation
    let mut dump = DummyDump::<u64>::new();
    dump.add_segment(HEAP, 0x1000, RangeFlags::READ | RangeFlags::WRITE);
    add_stack(&mut dump);
    let body = HEAP + 0x10;
    // a perfectly matching anchor triple for an empty one word vector
    dump.write_word(STACK + 0x100, body);
    dump.write_word(STACK + 0x108, body);
    dump.write_word(STACK + 0x110, body + 8);
    let map = dump.address_map();

    let finder = Finder::from_sorted(vec![Allocation::new(body, 0x8, true)]).unwrap();
    let threads = main_thread();
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
    runner.register(Box::new(VectorBodyTagger::new(&mut tags)));
    runner.resolve_all_allocation_tags(&view, &mut tags);

    assert_eq!(tags.get_tag_index(0), UNTAGGED);
}

#[test]
fn vector_body_rejected_when_capacity_below_use_limit() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0x20)]);
    let body = payloads[0];
    // anchor triple in static module data with capacity limit below the
    // use limit
    dump.add_segment(0x6000_0000, 0x1000, RangeFlags::READ | RangeFlags::WRITE);
    dump.write_word(0x6000_0100, body);
    dump.write_word(0x6000_0108, body + 32);
    dump.write_word(0x6000_0110, body + 12);
    let map = dump.address_map();

    let modules = ModuleDirectory::new(vec![ModuleInfo {
        path: "/usr/bin/app".into(),
        base: 0x6000_0000,
        segments: vec![ModuleSegment {
            base: 0x6000_0000,
            size: 0x1000,
            flags: RangeFlags::READ | RangeFlags::WRITE,
        }],
    }]);
    let process = ProcessImage::builder(&map)
        .module_directory(modules)
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(body);
    assert_eq!(process.tag_name_of(index), "");
}

#[test]
fn deque_map_and_blocks_beat_vector_body() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(
        HEAP,
        0x2000,
        &[
            ChunkSpec::used(0x40),
            ChunkSpec::used(0x200),
            ChunkSpec::used(0x200),
            ChunkSpec::used(0x200),
            ChunkSpec::used(0x200),
        ],
    );
    let map_body = payloads[0];
    let blocks = &payloads[1..5];
    // four full blocks recorded in the map
    for (slot, &block) in blocks.iter().enumerate() {
        dump.write_word(map_body + (slot as u64) * 8, block);
    }
    add_stack(&mut dump);
    // the deque representation on the stack
    let header = STACK + 0x200;
    dump.write_word(header, map_body);
    dump.write_word(header + 0x08, 8); // map size
    dump.write_word(header + 0x10, blocks[0]); // start.cur
    dump.write_word(header + 0x18, blocks[0]); // start.first
    dump.write_word(header + 0x20, blocks[0] + 0x200); // start.last
    dump.write_word(header + 0x28, map_body); // start.node
    dump.write_word(header + 0x30, blocks[3] + 0x200); // finish.cur
    dump.write_word(header + 0x38, blocks[3]); // finish.first
    dump.write_word(header + 0x40, blocks[3] + 0x200); // finish.last
    dump.write_word(header + 0x48, map_body + 0x18); // finish.node
    let map = dump.address_map();

    let process = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    let map_index = process.finder().index_of_address(map_body);
    assert_eq!(process.tag_name_of(map_index), "deque map");
    for &block in blocks {
        let block_index = process.finder().index_of_address(block);
        assert_eq!(process.tag_name_of(block_index), "deque block");
    }
    // no block may be claimed as a vector body even though the iterator
    // fields resemble vector triples
    for index in 0..process.finder().num_allocations() {
        assert_ne!(process.tag_name_of(index), "vector body");
    }

    let text = describe(&process, map_index, true);
    assert!(text.contains("matches pattern DequeMap"), "{}", text);
}

#[test]
fn long_string_truncation() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0xd0)]);
    let body = payloads[0];
    let mut content = b"hello world ".to_vec();
    while content.len() < 200 {
        content.push(b'x');
    }
    dump.write_bytes(body, &content);
    add_stack(&mut dump);
    // the string object on the stack: data, size, capacity
    dump.write_word(STACK + 0x300, body);
    dump.write_word(STACK + 0x308, 200);
    dump.write_word(STACK + 0x310, 215);
    let map = dump.address_map();

    let process = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(body);
    assert_eq!(process.tag_name_of(index), "long string");

    let brief = describe(&process, index, false);
    assert!(brief.contains("The string has 0xc8 bytes, starting with"), "{}", brief);
    assert!(brief.contains("hello world "), "{}", brief);
    assert!(!brief.contains(&String::from_utf8_lossy(&content).to_string()));

    let full = describe(&process, index, true);
    assert!(full.contains("containing"), "{}", full);
    assert!(full.contains(&String::from_utf8_lossy(&content).to_string()), "{}", full);
}

#[test]
fn list_nodes_form_a_ring() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(
        HEAP,
        0x1000,
        &[
            ChunkSpec::used(0x28),
            ChunkSpec::used(0x28),
            ChunkSpec::used(0x28),
        ],
    );
    let nodes = &payloads[..3];
    add_stack(&mut dump);
    let header = STACK + 0x400;
    dump.write_word(header, nodes[0]);
    dump.write_word(header + 8, nodes[2]);
    dump.write_word(nodes[0], nodes[1]);
    dump.write_word(nodes[0] + 8, header);
    dump.write_word(nodes[1], nodes[2]);
    dump.write_word(nodes[1] + 8, nodes[0]);
    dump.write_word(nodes[2], header);
    dump.write_word(nodes[2] + 8, nodes[1]);
    let map = dump.address_map();

    let process = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    for &node in nodes {
        let index = process.finder().index_of_address(node);
        assert_eq!(process.tag_name_of(index), "list node");
    }
}

#[test]
fn map_or_set_nodes_found_from_tree_header() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(
        HEAP,
        0x1000,
        &[
            ChunkSpec::used(0x28),
            ChunkSpec::used(0x28),
            ChunkSpec::used(0x28),
        ],
    );
    let (root, left, right) = (payloads[0], payloads[1], payloads[2]);
    add_stack(&mut dump);
    let header = STACK + 0x500;
    dump.write_word(header, 0); // header color is red
    dump.write_word(header + 0x08, root);
    dump.write_word(header + 0x10, left); // leftmost
    dump.write_word(header + 0x18, right); // rightmost
    dump.write_word(header + 0x20, 3); // node count
    dump.write_word(root, 1); // black
    dump.write_word(root + 0x08, header);
    dump.write_word(root + 0x10, left);
    dump.write_word(root + 0x18, right);
    for &child in &[left, right] {
        dump.write_word(child, 0); // red
        dump.write_word(child + 0x08, root);
    }
    let map = dump.address_map();

    let process = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    for &node in &[root, left, right] {
        let index = process.finder().index_of_address(node);
        assert_eq!(process.tag_name_of(index), "map or set node");
    }
}

#[test]
fn unordered_buckets_and_nodes_cross_check() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(
        HEAP,
        0x1000,
        &[
            ChunkSpec::used(0x40),
            ChunkSpec::used(0x18),
            ChunkSpec::used(0x18),
        ],
    );
    let (buckets, n0, n1) = (payloads[0], payloads[1], payloads[2]);
    add_stack(&mut dump);
    let header = STACK + 0x600;
    dump.write_word(header, buckets);
    dump.write_word(header + 0x08, 8); // bucket count
    dump.write_word(header + 0x10, n0); // before-begin chain
    dump.write_word(header + 0x18, 2); // element count
    dump.write_word(n0, n1);
    dump.write_word(n1, 0);
    // bucket 2 starts at the before-begin node, bucket 5 at n0
    dump.write_word(buckets + 0x10, header + 0x10);
    dump.write_word(buckets + 0x28, n0);
    let map = dump.address_map();

    let process = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    let buckets_index = process.finder().index_of_address(buckets);
    assert_eq!(
        process.tag_name_of(buckets_index),
        "unordered set or map buckets"
    );
    for &node in &[n0, n1] {
        let index = process.finder().index_of_address(node);
        assert_eq!(process.tag_name_of(index), "unordered set or map node");
    }
}

#[test]
fn cow_string_body_is_intrinsic() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0x30)]);
    let body = payloads[0];
    dump.write_word(body, 0x10); // length
    dump.write_word(body + 0x08, 0x18); // capacity
    dump.write_word(body + 0x10, 2); // refcount
    dump.write_bytes(body + 0x18, b"sixteen chars ok");
    let map = dump.address_map();

    let libstdcpp = || {
        ModuleDirectory::new(vec![ModuleInfo {
            path: "/usr/lib/x86_64-linux-gnu/libstdc++.so.6".into(),
            base: 0x7fc0_0000,
            segments: vec![ModuleSegment {
                base: 0x7fc0_0000,
                size: 0x1000,
                flags: RangeFlags::READ | RangeFlags::EXECUTE,
            }],
        }])
    };

    let process = ProcessImage::builder(&map)
        .module_directory(libstdcpp())
        .analyze()
        .unwrap();
    let index = process.finder().index_of_address(body);
    assert_eq!(process.tag_name_of(index), "cow string body");

    // the recognizer can be switched off
    let process = ProcessImage::builder(&map)
        .module_directory(libstdcpp())
        .options(AnalysisOptions::try_parse_str("cow_strings=off").unwrap())
        .analyze()
        .unwrap();
    assert_eq!(process.tag_name_of(index), "");
}

#[test]
fn ssl_ctx_first_word_points_at_method() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0x100)]);
    let ctx = payloads[0];
    let text = 0x7fa0_0000u64;
    let method = text + 0x800;
    dump.add_segment(text, 0x1000, RangeFlags::READ | RangeFlags::EXECUTE);
    dump.write_word(method, 0x0303); // TLS 1.2
    dump.write_word(method + 0x08, text + 0x100); // ssl_new
    dump.write_word(method + 0x10, text + 0x200); // ssl_free
    dump.write_word(ctx, method);
    let map = dump.address_map();

    let modules = ModuleDirectory::new(vec![ModuleInfo {
        path: "/usr/lib/libssl.so.1.1".into(),
        base: text,
        segments: vec![ModuleSegment {
            base: text,
            size: 0x1000,
            flags: RangeFlags::READ | RangeFlags::EXECUTE,
        }],
    }]);

    let process = ProcessImage::builder(&map)
        .module_directory(modules)
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(ctx);
    assert_eq!(process.tag_name_of(index), "SSL_CTX");

    let text_out = describe(&process, index, true);
    assert!(text_out.contains("matches pattern SSL_CTX"), "{}", text_out);
    assert!(text_out.contains("SSL_METHOD"), "{}", text_out);
}

#[test]
fn python_object_refcount_and_type() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0x30)]);
    let object = payloads[0];
    let data = 0x7fb0_0000u64;
    dump.add_segment(data, 0x1000, RangeFlags::READ | RangeFlags::WRITE);
    dump.write_word(object, 5); // refcount
    dump.write_word(object + 0x08, data + 0x100); // ob_type
    let map = dump.address_map();

    let modules = ModuleDirectory::new(vec![ModuleInfo {
        path: "/usr/lib/libpython3.10.so.1.0".into(),
        base: data,
        segments: vec![ModuleSegment {
            base: data,
            size: 0x1000,
            flags: RangeFlags::READ | RangeFlags::WRITE,
        }],
    }]);

    let process = ProcessImage::builder(&map)
        .module_directory(modules)
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(object);
    assert_eq!(process.tag_name_of(index), "python object");
}

#[test]
fn unmapped_payload_words_become_sentinel_slots() {
    let mut dump = DummyDump::<u64>::new();
    dump.add_segment(HEAP, 0x100, RangeFlags::READ | RangeFlags::WRITE);
    dump.add_segment(HEAP + 0x200, 0xe00, RangeFlags::READ | RangeFlags::WRITE);
    // a chunk whose payload spans the hole between the two ranges
    dump.write_word(HEAP + 0x08, 0x210 | 1);
    dump.write_word(HEAP + 0x218, 0x20 | 1);
    dump.write_word(HEAP + 0x238, 0xdd0 | 1); // top chunk
    dump.write_word(HEAP + 0x10, HEAP + 0x220); // first payload word references the second allocation
    let map = dump.address_map();

    assert!(map.find_mapped_memory_image(HEAP + 0x150).is_err());

    let finder = walk_arenas(&map, &[Arena::new(HEAP, HEAP + 0x1000)]).unwrap();
    assert_eq!(finder.num_allocations(), 2);
    assert_eq!(finder.allocation_at(0).size(), 0x208);

    let graph = Graph::build(&map, &finder, &ThreadMap::empty(), &ModuleDirectory::empty());
    let outgoing = graph.outgoing(0);
    assert_eq!(outgoing.len(), 0x208 / 8);
    assert_eq!(outgoing[0], 1);
    // words in the unmapped hole are not references
    assert_eq!(outgoing[40], finder.sentinel());
}

#[test]
fn partially_mapped_allocations_are_not_tagged() {
    let mut dump = DummyDump::<u64>::new();
    dump.add_segment(HEAP, 0x100, RangeFlags::READ | RangeFlags::WRITE);
    dump.add_segment(HEAP + 0x200, 0xe00, RangeFlags::READ | RangeFlags::WRITE);
    dump.write_word(HEAP + 0x08, 0x210 | 1);
    dump.write_word(HEAP + 0x218, 0x20 | 1);
    dump.write_word(HEAP + 0x238, 0xdd0 | 1);
    add_stack(&mut dump);
    // a vector triple over the torn allocation
    dump.write_word(STACK + 0x100, HEAP + 0x10);
    dump.write_word(STACK + 0x108, HEAP + 0x20);
    dump.write_word(STACK + 0x110, HEAP + 0x40);
    let map = dump.address_map();

    let finder = walk_arenas(&map, &[Arena::new(HEAP, HEAP + 0x1000)]).unwrap();
    let index = finder.index_of_address(HEAP + 0x10);
    assert!(index != finder.sentinel());

    let threads = main_thread();
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
    runner.register(Box::new(VectorBodyTagger::new(&mut tags)));
    runner.resolve_all_allocation_tags(&view, &mut tags);

    assert_eq!(tags.get_tag_index(index), UNTAGGED);
}

#[test]
fn analysis_is_deterministic() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(
        HEAP,
        0x2000,
        &[
            ChunkSpec::used(0x20),
            ChunkSpec::used(0x200),
            ChunkSpec::free(0x40),
            ChunkSpec::used(0x28),
        ],
    );
    dump.add_segment_filled(0x6000_0000, 0x800, RangeFlags::READ | RangeFlags::WRITE, 7);
    add_stack(&mut dump);
    dump.write_word(STACK + 0x100, payloads[0]);
    dump.write_word(STACK + 0x108, payloads[0] + 8);
    dump.write_word(STACK + 0x110, payloads[0] + 24);
    let map = dump.address_map();

    let first = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();
    let second = ProcessImage::builder(&map)
        .thread_map(main_thread())
        .analyze()
        .unwrap();

    assert_eq!(
        first.finder().num_allocations(),
        second.finder().num_allocations()
    );
    for index in 0..first.finder().num_allocations() {
        assert_eq!(
            first.finder().allocation_at(index),
            second.finder().allocation_at(index)
        );
        assert_eq!(first.graph().outgoing(index), second.graph().outgoing(index));
        assert_eq!(
            first.tag_holder().get_tag_index(index),
            second.tag_holder().get_tag_index(index)
        );
        assert_eq!(
            first.graph().get_stack_anchors(index),
            second.graph().get_stack_anchors(index)
        );
    }
}

#[test]
fn thirty_two_bit_vector_body() {
    let mut dump = DummyDump::<u32>::new();
    let payloads = dump.build_glibc_heap(0x1000_0000u32, 0x1000, &[ChunkSpec::used(0x20)]);
    let body = payloads[0];
    dump.add_segment(0x7f00_0000u32, 0x1000, RangeFlags::READ | RangeFlags::WRITE);
    dump.write_word(0x7f00_0100u32, body);
    dump.write_word(0x7f00_0104u32, body + 12);
    dump.write_word(0x7f00_0108u32, body + 32);
    let map = dump.address_map();

    let threads = ThreadMap::new(vec![ThreadInfo {
        thread_num: 1,
        stack_base: 0x7f00_1000u32,
        stack_limit: 0x7f00_0000u32,
        registers: vec![],
    }]);
    let process = ProcessImage::builder(&map)
        .thread_map(threads)
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(body);
    assert_eq!(process.tag_name_of(index), "vector body");
}

#[test]
fn register_anchors_are_recorded() {
    let mut dump = DummyDump::<u64>::new();
    let payloads = dump.build_glibc_heap(HEAP, 0x1000, &[ChunkSpec::used(0x20)]);
    add_stack(&mut dump);
    let map = dump.address_map();

    let threads = ThreadMap::new(vec![ThreadInfo {
        thread_num: 3,
        stack_base: STACK + STACK_SIZE as u64,
        stack_limit: STACK,
        registers: vec![0x1234, payloads[0]],
    }]);
    let process = ProcessImage::builder(&map)
        .thread_map(threads)
        .analyze()
        .unwrap();

    let index = process.finder().index_of_address(payloads[0]);
    let anchors = process.graph().get_register_anchors(index).unwrap();
    assert_eq!(
        ThreadMap::<u64>::decode_register_anchor(anchors[0]),
        (3, 1)
    );
}
