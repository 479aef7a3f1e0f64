/*!
heapview-glibc provides the Linux specific layer of heapview.

It discovers heap allocations by walking glibc-malloc chunk metadata out of
the raw image, recognizes the common libstdc++ container bodies plus
OpenSSL and CPython objects, and ties the whole analysis together in the
[ProcessImage](struct.ProcessImage.html) session.

# Examples

```
use heapview_glibc::dummy::{ChunkSpec, DummyDump};
use heapview_glibc::ProcessImage;

let mut dump = DummyDump::<u64>::new();
let payloads = dump.build_glibc_heap(
    0x1000_0000,
    0x4000,
    &[ChunkSpec::used(0x20), ChunkSpec::free(0x40), ChunkSpec::used(0x18)],
);
let map = dump.address_map();

let process = ProcessImage::builder(&map).analyze().unwrap();
assert_eq!(process.finder().num_allocations(), 3);
assert_eq!(process.finder().index_of_address(payloads[2]), 2);
```
*/

pub mod error;

pub mod heap;

pub mod taggers;

pub mod describers;

pub mod image;
pub use image::{ProcessImage, ProcessImageBuilder};

pub mod dummy;

pub mod prelude {
    pub mod v1 {
        pub use crate::error::*;
        pub use crate::heap::*;
        pub use crate::image::*;
    }
    pub use v1::*;
}
