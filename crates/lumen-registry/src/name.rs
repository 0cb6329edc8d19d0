//! Interned object names
//!
//! Names are case-sensitive plain identifiers. Each distinct spelling is
//! interned once; equality is id equality and the structural hash used as
//! the name index key is computed a single time at intern.

use rustc_hash::{FxHashMap, FxHasher};
use std::hash::Hasher;
use std::sync::Arc;

/// Identity of an interned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(u32);

struct NameEntry {
    text: Arc<str>,
    hash: u64,
}

/// Case-sensitive name interner.
///
/// Lives inside the registry tables, so interning happens under the same
/// lock as the index mutation that needs the name.
pub(crate) struct NameTable {
    lookup: FxHashMap<Arc<str>, NameId>,
    entries: Vec<NameEntry>,
}

/// Structural hash of a plain identifier (not a content hash of arbitrary
/// bytes; collisions across distinct names are expected and legal).
fn structural_hash(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    hasher.finish()
}

impl NameTable {
    pub fn new() -> Self {
        Self {
            lookup: FxHashMap::default(),
            entries: Vec::new(),
        }
    }

    /// Interns a name, returning the id of an existing identical spelling
    /// when there is one.
    pub fn intern(&mut self, text: &str) -> NameId {
        if let Some(&id) = self.lookup.get(text) {
            return id;
        }
        let interned: Arc<str> = Arc::from(text);
        let id = NameId(self.entries.len() as u32);
        self.entries.push(NameEntry {
            text: interned.clone(),
            hash: structural_hash(text),
        });
        self.lookup.insert(interned, id);
        id
    }

    /// Looks up a name without interning it. A name that was never interned
    /// cannot match any registered object.
    pub fn find(&self, text: &str) -> Option<NameId> {
        self.lookup.get(text).copied()
    }

    /// The spelling of an interned name.
    pub fn resolve(&self, id: NameId) -> &Arc<str> {
        &self.entries[id.0 as usize].text
    }

    /// The structural hash recorded at intern time.
    pub fn hash_of(&self, id: NameId) -> u64 {
        self.entries[id.0 as usize].hash
    }

    /// Approximate heap bytes held by the interner.
    pub fn allocated_size(&self) -> usize {
        let entry_bytes = self.entries.capacity() * std::mem::size_of::<NameEntry>();
        let lookup_bytes =
            self.lookup.capacity() * std::mem::size_of::<(Arc<str>, NameId)>();
        let text_bytes: usize = self.entries.iter().map(|e| e.text.len()).sum();
        entry_bytes + lookup_bytes + text_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut names = NameTable::new();
        let a = names.intern("Widget");
        let b = names.intern("Widget");
        assert_eq!(a, b);
        assert_eq!(&**names.resolve(a), "Widget");
    }

    #[test]
    fn test_intern_is_case_sensitive() {
        let mut names = NameTable::new();
        let lower = names.intern("widget");
        let upper = names.intern("Widget");
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_find_does_not_intern() {
        let mut names = NameTable::new();
        assert!(names.find("Ghost").is_none());
        let id = names.intern("Ghost");
        assert_eq!(names.find("Ghost"), Some(id));
    }

    #[test]
    fn test_hash_is_stable_per_name() {
        let mut names = NameTable::new();
        let a = names.intern("Panel");
        let hash = names.hash_of(a);
        names.intern("Other");
        assert_eq!(names.hash_of(a), hash);
        assert_eq!(hash, structural_hash("Panel"));
    }
}
