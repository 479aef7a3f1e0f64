/*!
Registered names for anchor addresses.
*/

use std::collections::BTreeMap;

use crate::types::Offset;

/// Maps static anchor addresses to symbolic names.
///
/// Like the signature directory this is fed by the external symbol layer;
/// describers consult it when explaining anchored allocations.
pub struct AnchorDirectory<O: Offset> {
    names: BTreeMap<O, String>,
}

impl<O: Offset> Default for AnchorDirectory<O> {
    fn default() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }
}

impl<O: Offset> AnchorDirectory<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_anchor(&mut self, anchor: O, name: String) {
        self.names.insert(anchor, name);
    }

    pub fn name_of(&self, anchor: O) -> Option<&str> {
        self.names.get(&anchor).map(|s| s.as_str())
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
        let mut directory = AnchorDirectory::<u32>::new();
        directory.register_anchor(0x60_1040, "g_session_list".into());

        assert_eq!(directory.name_of(0x60_1040), Some("g_session_list"));
        assert_eq!(directory.name_of(0x60_1044), None);
    }
}
