/*!
Recognition of OpenSSL contexts.
*/

use heapview::allocations::{
    already_tagged, Allocation, AllocationIndex, ContiguousImage, ImageView, Phase, TagHolder,
    TagIndex, Tagger,
};
use heapview::mem::{RangeFlags, Reader};
use heapview::types::Offset;

/// Tags `SSL_CTX` allocations.
///
/// An `SSL_CTX` starts with a pointer to an `SSL_METHOD`-like structure
/// resident in the OpenSSL module: a protocol version word followed by
/// function pointers into the module text.
pub struct OpenSslTagger {
    tag: TagIndex,
}

impl OpenSslTagger {
    pub fn new(tags: &mut TagHolder) -> Self {
        Self {
            tag: tags.register_tag("SSL_CTX"),
        }
    }

    pub fn tag_index(&self) -> TagIndex {
        self.tag
    }

    fn in_openssl_module<O: Offset>(view: &ImageView<O>, addr: O, executable: bool) -> bool {
        match view.modules.resolve(addr) {
            Some((module, segment)) => {
                (module.name().contains("libssl") || module.name().contains("libcrypto"))
                    && (!executable || segment.flags.contains(RangeFlags::EXECUTE))
            }
            None => false,
        }
    }

    /// Protocol versions OpenSSL records in a method structure. The zero
    /// low half covers `TLS_ANY_VERSION`.
    fn version_plausible(raw: u64) -> bool {
        let version = (raw & 0xffff) as u16;
        matches!(
            version,
            0x0000 | 0x0300 | 0x0301 | 0x0302 | 0x0303 | 0x0304 | 0xfeff | 0xfefd
        )
    }

    fn method_matches<O: Offset>(view: &ImageView<O>, reader: &mut Reader<O>, method: O) -> bool {
        let version = match reader.read_offset(method) {
            Ok(version) => version,
            Err(_) => return false,
        };
        if !Self::version_plausible(version.as_u64()) {
            return false;
        }
        for slot in 1..=2 {
            match reader.read_offset(method + O::words(slot)) {
                Ok(ptr) if Self::in_openssl_module(view, ptr, true) => {}
                _ => return false,
            }
        }
        true
    }
}

impl<O: Offset> Tagger<O> for OpenSslTagger {
    fn tag_from_allocation(
        &mut self,
        view: &ImageView<O>,
        tags: &mut TagHolder,
        image: &ContiguousImage<O>,
        reader: &mut Reader<O>,
        index: AllocationIndex,
        phase: Phase,
        allocation: &Allocation<O>,
        _is_unsigned: bool,
    ) -> bool {
        if already_tagged(tags, index) {
            return true;
        }
        match phase {
            Phase::QuickInitialCheck => {
                if view.modules.find_by_name_fragment("libssl").is_none() {
                    return true;
                }
                allocation.size() < O::words(8)
            }
            Phase::MediumCheck => {
                let method = image.word(0);
                if Self::in_openssl_module(view, method, false)
                    && Self::method_matches(view, reader, method)
                {
                    tags.tag_allocation(index, self.tag);
                }
                true
            }
            Phase::SlowCheck | Phase::WeakCheck => true,
        }
    }

    fn tag_from_referenced(
        &mut self,
        _view: &ImageView<O>,
        _tags: &mut TagHolder,
        _image: &ContiguousImage<O>,
        _reader: &mut Reader<O>,
        _index: AllocationIndex,
        _phase: Phase,
        _allocation: &Allocation<O>,
        _outgoing: &[AllocationIndex],
    ) -> bool {
        true
    }
}
