/*!
Discovery of heap allocations from glibc-malloc chunk metadata.

A glibc arena is a run of chunks. Each chunk carries a `prev_size` word and
a `size` word whose low bits hold the `PREV_INUSE`/`IS_MMAPPED`/
`NON_MAIN_ARENA` flags; the user payload starts two words into the chunk
and, for an in-use chunk, extends one word into the successor's `prev_size`
field. Whether a chunk is in use is recorded in the `PREV_INUSE` bit of its
successor.
*/

use log::{debug, warn};

use heapview::allocations::{Allocation, Finder};
use heapview::error::{Error, Result};
use heapview::mem::VirtualAddressMap;
use heapview::types::Offset;

/// `size` word flag: the previous chunk is in use.
pub const PREV_INUSE: u64 = 0x1;
/// `size` word flag: the chunk was allocated via mmap.
pub const IS_MMAPPED: u64 = 0x2;
/// `size` word flag: the chunk belongs to a non-main arena.
pub const NON_MAIN_ARENA: u64 = 0x4;

const SIZE_FLAGS: u64 = PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA;

/// Minimum chunk size in words (header plus the smallest payload).
const MIN_CHUNK_WORDS: usize = 4;

/// A candidate heap interval handed to the walker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arena<O: Offset> {
    pub base: O,
    pub limit: O,
}

impl<O: Offset> Arena<O> {
    pub fn new(base: O, limit: O) -> Self {
        Self { base, limit }
    }

    pub fn size(&self) -> O {
        self.limit - self.base
    }
}

/// Walks every arena and assembles the allocation directory.
///
/// A malformed arena is reported and skipped; discovery continues with the
/// remaining arenas. The walk is one-shot and the result ascending by
/// address.
pub fn walk_arenas<O: Offset>(
    map: &VirtualAddressMap<O>,
    arenas: &[Arena<O>],
) -> Result<Finder<O>> {
    let mut allocations = Vec::new();
    for arena in arenas {
        let mut found = Vec::new();
        match walk_arena(map, arena, &mut found) {
            Ok(()) => {
                debug!(
                    "arena at 0x{:x}: {} allocations",
                    arena.base,
                    found.len()
                );
                allocations.extend(found);
            }
            Err(e) => warn!("skipping arena at 0x{:x}: {}", arena.base, e),
        }
    }
    allocations.sort_by_key(|a: &Allocation<O>| a.address().as_u64());
    Finder::from_sorted(allocations)
}

/// Walks the chunk run of one arena.
///
/// The top chunk, the wilderness reaching the arena limit, is not an
/// allocation and terminates the walk.
fn walk_arena<O: Offset>(
    map: &VirtualAddressMap<O>,
    arena: &Arena<O>,
    out: &mut Vec<Allocation<O>>,
) -> Result<()> {
    let word = O::word();
    let min_chunk = O::words(MIN_CHUNK_WORDS);
    if arena.limit < arena.base {
        return Err(Error::BadAllocatorState("arena limit below base"));
    }
    if arena.size() < min_chunk {
        return Ok(());
    }

    let mut chunk = arena.base;
    // the successor's size word resolves the in-use bit of this allocation
    let mut pending: Option<Allocation<O>> = None;
    loop {
        let raw = map
            .read_offset(chunk + word)
            .map_err(|_| Error::BadAllocatorState("unreadable chunk header"))?
            .as_u64();
        if let Some(previous) = pending.take() {
            out.push(Allocation::new(
                previous.address(),
                previous.size(),
                raw & PREV_INUSE != 0,
            ));
        }

        let chunk_size = O::from_u64(raw & !SIZE_FLAGS);
        if chunk_size < min_chunk {
            return Err(Error::BadAllocatorState("chunk size below minimum"));
        }
        if chunk_size.as_u64() % (2 * O::BYTES as u64) != 0 {
            return Err(Error::BadAllocatorState("misaligned chunk size"));
        }
        let next = chunk
            .checked_add(chunk_size)
            .ok_or(Error::BadAllocatorState("chunk size wraps address space"))?;
        if next > arena.limit {
            return Err(Error::BadAllocatorState("chunk overruns arena"));
        }
        if next == arena.limit {
            // top chunk
            return Ok(());
        }

        pending = Some(Allocation::new(chunk + word + word, chunk_size - word, false));
        chunk = next;
    }
}
