//! Runtime class identity table
//!
//! Class identity is a value (a generational key), not a polymorphic call.
//! The table records each class's name, supertype, and registration state;
//! the inverse subtype adjacency lives in the registry tables next to the
//! other indices.
//!
//! Forward references are allowed: resolving a class name materializes a
//! placeholder entry, so a subtype may register before its supertype during
//! out-of-order startup registration.

use crate::error::{consistency_failure, ConsistencyError};
use crate::name::{NameId, NameTable};
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Identity of a runtime class.
    pub struct ClassId;
}

pub(crate) struct ClassEntry {
    pub name: NameId,
    pub super_class: Option<ClassId>,
    pub native: bool,
    /// False while the entry is only a forward-reference placeholder.
    pub registered: bool,
}

pub(crate) struct ClassTable {
    classes: SlotMap<ClassId, ClassEntry>,
    by_name: FxHashMap<NameId, ClassId>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            classes: SlotMap::with_key(),
            by_name: FxHashMap::default(),
        }
    }

    /// Finds or creates the entry for a class name. A created entry is a
    /// placeholder until `register` fills it in.
    pub fn resolve(&mut self, name: NameId) -> ClassId {
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let id = self.classes.insert(ClassEntry {
            name,
            super_class: None,
            native: false,
            registered: false,
        });
        self.by_name.insert(name, id);
        id
    }

    /// Registers a class, filling in a placeholder when one exists.
    ///
    /// Registering a name twice is fatal; a class is expected to register
    /// exactly once per process lifetime, like any other indexed identity.
    pub fn register(
        &mut self,
        name: NameId,
        super_class: Option<ClassId>,
        native: bool,
        names: &NameTable,
    ) -> ClassId {
        let id = self.resolve(name);
        let entry = &self.classes[id];
        if entry.registered {
            consistency_failure(
                ConsistencyError::DoubleAdd { index: "class" },
                names.resolve(name),
            );
        }
        // Refuse to close a loop in the supertype chain. With placeholder
        // registration the only way to form one is to register a class whose
        // declared supertype already derives from it.
        if let Some(sup) = super_class {
            if self.is_derived_from(sup, id) {
                consistency_failure(ConsistencyError::HierarchyCycle, names.resolve(name));
            }
        }
        let entry = &mut self.classes[id];
        entry.super_class = super_class;
        entry.native = native;
        entry.registered = true;
        id
    }

    /// Demotes a registered class back to a placeholder.
    ///
    /// The slot is kept so that outstanding `ClassId`s held by subtypes (as
    /// their supertype reference) stay valid.
    pub fn unregister(&mut self, id: ClassId, names: &NameTable) {
        let Some(entry) = self.classes.get_mut(id) else {
            consistency_failure(
                ConsistencyError::RemoveMiscount { index: "class" },
                "unknown class id",
            );
        };
        if !entry.registered {
            consistency_failure(
                ConsistencyError::RemoveMiscount { index: "class" },
                names.resolve(entry.name),
            );
        }
        entry.super_class = None;
        entry.native = false;
        entry.registered = false;
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassEntry> {
        self.classes.get(id)
    }

    pub fn find_by_name(&self, name: NameId) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    pub fn is_registered(&self, id: ClassId) -> bool {
        self.classes.get(id).is_some_and(|e| e.registered)
    }

    /// Whether `class` is `base` or a transitive subtype of it, by walking
    /// the supertype chain. The chain is acyclic by construction.
    pub fn is_derived_from(&self, class: ClassId, base: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = self.classes.get(id).and_then(|e| e.super_class);
        }
        false
    }

    pub fn allocated_size(&self) -> usize {
        self.classes.capacity() * std::mem::size_of::<ClassEntry>()
            + self.by_name.capacity() * std::mem::size_of::<(NameId, ClassId)>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_with(table: &mut NameTable, text: &str) -> NameId {
        table.intern(text)
    }

    #[test]
    fn test_resolve_creates_placeholder() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let id = classes.resolve(names_with(&mut names, "Base"));
        assert!(!classes.is_registered(id));
        assert!(classes.get(id).is_some());
    }

    #[test]
    fn test_register_fills_placeholder_in_place() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let base_name = names.intern("Base");
        let placeholder = classes.resolve(base_name);
        let registered = classes.register(base_name, None, true, &names);
        assert_eq!(placeholder, registered);
        assert!(classes.is_registered(registered));
        assert!(classes.get(registered).unwrap().native);
    }

    #[test]
    fn test_subtype_may_register_before_supertype() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let base_name = names.intern("Base");
        let derived_name = names.intern("Derived");

        let base = classes.resolve(base_name);
        let derived = classes.register(derived_name, Some(base), false, &names);
        assert!(classes.is_derived_from(derived, base));
        assert!(!classes.is_registered(base));

        classes.register(base_name, None, false, &names);
        assert!(classes.is_registered(base));
        assert!(classes.is_derived_from(derived, base));
    }

    #[test]
    fn test_is_derived_from_walks_chain() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let a = classes.register(names.intern("A"), None, false, &names);
        let b = classes.register(names.intern("B"), Some(a), false, &names);
        let c = classes.register(names.intern("C"), Some(b), false, &names);

        assert!(classes.is_derived_from(c, a));
        assert!(classes.is_derived_from(c, c));
        assert!(!classes.is_derived_from(a, c));
    }

    #[test]
    #[should_panic(expected = "double add")]
    fn test_double_register_is_fatal() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let name = names.intern("Base");
        classes.register(name, None, false, &names);
        classes.register(name, None, false, &names);
    }

    #[test]
    #[should_panic(expected = "class hierarchy cycle")]
    fn test_hierarchy_cycle_is_fatal() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let a_name = names.intern("A");
        let b_name = names.intern("B");
        let b = classes.resolve(b_name);
        let a = classes.register(a_name, Some(b), false, &names);
        classes.register(b_name, Some(a), false, &names);
    }

    #[test]
    fn test_unregister_demotes_to_placeholder() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        let base = classes.register(names.intern("Base"), None, false, &names);
        classes.unregister(base, &names);
        assert!(!classes.is_registered(base));
        // The slot survives so supertype references stay valid.
        assert!(classes.get(base).is_some());
    }
}
