/*!
Names for identity words found at the first offset of allocations.
*/

use std::collections::BTreeMap;

use crate::types::Offset;

/// Maps candidate vtable/identity words to human names.
///
/// Populated by the external symbol layer; the engine only queries it to
/// decide whether an allocation is "signed" and to render names.
pub struct SignatureDirectory<O: Offset> {
    names: BTreeMap<O, String>,
}

impl<O: Offset> Default for SignatureDirectory<O> {
    fn default() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }
}

impl<O: Offset> SignatureDirectory<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_signature(&mut self, signature: O, name: String) {
        self.names.insert(signature, name);
    }

    pub fn is_signature(&self, word: O) -> bool {
        self.names.contains_key(&word)
    }

    pub fn name_of(&self, signature: O) -> Option<&str> {
        self.names.get(&signature).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut directory = SignatureDirectory::<u64>::new();
        directory.register_signature(0x7f12_3450, "MyClass".into());

        assert!(directory.is_signature(0x7f12_3450));
        assert!(!directory.is_signature(0x7f12_3458));
        assert_eq!(directory.name_of(0x7f12_3450), Some("MyClass"));
    }
}
