/*!
The concrete pattern recognizers.

Every tagger follows the same shape: a quick size rejection, the real
matching work in the phase fitting its confidence, and a tag-once short
circuit at the top of each callback. Strong patterns (deque, list, tree and
hashtable structures) act in the medium phase; recognizers that depend on
an external witness (vector bodies, long strings) defer to the weak pass so
the strong patterns settle first.
*/

use heapview::mem::Reader;
use heapview::types::Offset;

pub mod vector;
pub use vector::VectorBodyTagger;

pub mod long_string;
pub use long_string::LongStringTagger;

pub mod cow_string;
pub use cow_string::CowStringTagger;

pub mod deque;
pub use deque::DequeTagger;

pub mod list;
pub use list::ListNodeTagger;

pub mod map_or_set;
pub use map_or_set::MapOrSetNodeTagger;

pub mod unordered;
pub use unordered::UnorderedTagger;

pub mod openssl;
pub use openssl::OpenSslTagger;

pub mod python;
pub use python::PythonObjectTagger;

/// Reads `N` consecutive words starting at `addr`.
pub(crate) fn read_words<O: Offset, const N: usize>(
    reader: &mut Reader<O>,
    addr: O,
) -> Option<[O; N]> {
    let bytes = reader.read_bytes(addr, N * O::BYTES).ok()?;
    let mut words = [O::ZERO; N];
    for (k, word) in words.iter_mut().enumerate() {
        *word = O::read_le(&bytes[k * O::BYTES..]);
    }
    Some(words)
}
