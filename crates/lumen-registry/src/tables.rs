//! The registry's index tables
//!
//! One struct owns every index plus the object/name/class tables, so a
//! single critical section can mutate all of them consistently:
//!
//! - name hash: structural name hash -> bucket (find by name, any outer)
//! - outer hash: (name, outer identity) hash -> bucket (exact-outer find)
//! - outer map: container -> bucket of direct children
//! - class map: class -> bucket of live instances of exactly that class
//! - class children: class -> immediate subtypes
//! - package map: package -> bucket of externally assigned objects
//! - object package: object -> its externally assigned package
//!
//! All methods assume the registry lock is held.

use crate::bucket_map::BucketMap;
use crate::class::{ClassId, ClassTable};
use crate::error::{consistency_failure, ConsistencyError};
use crate::name::NameTable;
use crate::object::{ObjectId, ObjectStore};
use crate::stats::MemoryStats;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::Key;

/// Callback invoked on every handle a successful lookup yields, so an
/// incremental collector can mark it reachable. The registry itself knows
/// nothing about reachability.
pub type ReachabilityHook = Box<dyn Fn(ObjectId) + Send + Sync>;

/// Combined key for the exact-outer index. The outer's identity bits are
/// mixed in so objects sharing a leaf name under different containers
/// spread across buckets.
pub(crate) fn outer_pair_hash(name_hash: u64, outer: ObjectId) -> u64 {
    name_hash ^ outer.data().as_ffi().wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

pub(crate) struct RegistryTables {
    pub store: ObjectStore,
    pub names: NameTable,
    pub classes: ClassTable,

    pub name_hash: BucketMap<u64>,
    pub outer_hash: BucketMap<u64>,
    pub outer_map: BucketMap<ObjectId>,
    pub class_map: BucketMap<ClassId>,
    pub class_children: FxHashMap<ClassId, FxHashSet<ClassId>>,
    pub package_map: BucketMap<ObjectId>,
    pub object_package: FxHashMap<ObjectId, ObjectId>,

    pub reachability: Option<ReachabilityHook>,
}

impl RegistryTables {
    pub fn new() -> Self {
        Self {
            store: ObjectStore::new(),
            names: NameTable::new(),
            classes: ClassTable::new(),
            name_hash: BucketMap::new(),
            outer_hash: BucketMap::new(),
            outer_map: BucketMap::new(),
            class_map: BucketMap::new(),
            class_children: FxHashMap::default(),
            package_map: BucketMap::new(),
            object_package: FxHashMap::default(),
            reachability: None,
        }
    }

    /// Human-readable identity for fatal diagnostics.
    pub fn object_debug(&self, id: ObjectId) -> String {
        match self.store.get(id).and_then(|e| e.name) {
            Some(name) => format!("object '{}' ({id:?})", self.names.resolve(name)),
            None => format!("object <anonymous> ({id:?})"),
        }
    }

    /// Inserts an object into every index it belongs in. Anonymous objects
    /// are stored but never indexed.
    pub fn hash_object(&mut self, id: ObjectId) {
        let entry = self.store.get(id).expect("hashing an unregistered object");
        let Some(name) = entry.name else {
            return;
        };
        let outer = entry.outer;
        let class = entry.class;
        let name_hash = self.names.hash_of(name);

        if self.name_hash.contains_pair(&name_hash, id) {
            consistency_failure(
                ConsistencyError::DoubleAdd { index: "name hash" },
                &self.object_debug(id),
            );
        }
        self.name_hash.add(name_hash, id);

        if let Some(outer) = outer {
            let pair = outer_pair_hash(name_hash, outer);
            if self.outer_hash.contains_pair(&pair, id) {
                consistency_failure(
                    ConsistencyError::DoubleAdd { index: "outer hash" },
                    &self.object_debug(id),
                );
            }
            self.outer_hash.add(pair, id);

            if self.outer_map.contains_pair(&outer, id) {
                consistency_failure(
                    ConsistencyError::DoubleAdd { index: "outer map" },
                    &self.object_debug(id),
                );
            }
            self.outer_map.add(outer, id);
        }

        if self.class_map.contains_pair(&class, id) {
            consistency_failure(
                ConsistencyError::DoubleAdd { index: "class map" },
                &self.object_debug(id),
            );
        }
        self.class_map.add(class, id);
    }

    /// Removes an object from every index it belongs in; the exact inverse
    /// of [`hash_object`](Self::hash_object). A miss in any index is fatal.
    pub fn unhash_object(&mut self, id: ObjectId) {
        let Some(entry) = self.store.get(id) else {
            consistency_failure(
                ConsistencyError::RemoveMiscount {
                    index: "object store",
                },
                "unknown object handle",
            );
        };
        let Some(name) = entry.name else {
            return;
        };
        let outer = entry.outer;
        let class = entry.class;
        let name_hash = self.names.hash_of(name);

        if self.name_hash.remove(&name_hash, id) != 1 {
            consistency_failure(
                ConsistencyError::RemoveMiscount { index: "name hash" },
                &self.object_debug(id),
            );
        }

        if let Some(outer) = outer {
            let pair = outer_pair_hash(name_hash, outer);
            if self.outer_hash.remove(&pair, id) != 1 {
                consistency_failure(
                    ConsistencyError::RemoveMiscount { index: "outer hash" },
                    &self.object_debug(id),
                );
            }
            if self.outer_map.remove(&outer, id) != 1 {
                consistency_failure(
                    ConsistencyError::RemoveMiscount { index: "outer map" },
                    &self.object_debug(id),
                );
            }
        }

        if self.class_map.remove(&class, id) != 1 {
            consistency_failure(
                ConsistencyError::RemoveMiscount { index: "class map" },
                &self.object_debug(id),
            );
        }
    }

    /// Records `class` as an immediate subtype of `super_class`. The
    /// supertype's entry is materialized lazily, so a subtype may register
    /// first.
    pub fn add_child_class(&mut self, super_class: ClassId, class: ClassId) {
        let children = self.class_children.entry(super_class).or_default();
        if !children.insert(class) {
            consistency_failure(
                ConsistencyError::DoubleAdd {
                    index: "class children",
                },
                "subtype already recorded",
            );
        }
    }

    /// Removes `class` from its supertype's immediate-subtype set.
    pub fn remove_child_class(&mut self, super_class: ClassId, class: ClassId) {
        let Some(children) = self.class_children.get_mut(&super_class) else {
            consistency_failure(
                ConsistencyError::RemoveMiscount {
                    index: "class children",
                },
                "supertype has no subtype set",
            );
        };
        if !children.remove(&class) {
            consistency_failure(
                ConsistencyError::RemoveMiscount {
                    index: "class children",
                },
                "subtype not recorded",
            );
        }
        if children.is_empty() {
            self.class_children.remove(&super_class);
        }
    }

    /// Assigns an external package, replacing any previous assignment so
    /// the object is never a member of two packages at once.
    pub fn assign_external_package(&mut self, id: ObjectId, package: ObjectId) {
        let old = self.object_package.insert(id, package);
        if old == Some(package) {
            return;
        }
        if let Some(old) = old {
            self.remove_from_package_map(id, old);
        }
        if self.package_map.contains_pair(&package, id) {
            consistency_failure(
                ConsistencyError::DoubleAdd {
                    index: "package map",
                },
                &self.object_debug(id),
            );
        }
        self.package_map.add(package, id);
    }

    /// Clears an external package assignment. Unassigning when nothing is
    /// assigned is a no-op, not an error.
    pub fn unassign_external_package(&mut self, id: ObjectId) {
        if let Some(old) = self.object_package.remove(&id) {
            self.remove_from_package_map(id, old);
        }
    }

    fn remove_from_package_map(&mut self, id: ObjectId, package: ObjectId) {
        if self.package_map.remove(&package, id) != 1 {
            consistency_failure(
                ConsistencyError::RemoveMiscount {
                    index: "package map",
                },
                &self.object_debug(id),
            );
        }
    }

    /// Compacts every table and bucket.
    pub fn shrink_all(&mut self) {
        self.name_hash.shrink();
        self.outer_hash.shrink();
        self.outer_map.shrink();
        self.class_map.shrink();
        self.class_children.shrink_to_fit();
        for children in self.class_children.values_mut() {
            children.shrink_to_fit();
        }
        self.package_map.shrink();
        self.object_package.shrink_to_fit();
    }

    /// Approximate heap bytes held per index.
    pub fn memory_overhead(&self) -> MemoryStats {
        let class_children_bytes = self.class_children.capacity()
            * std::mem::size_of::<(ClassId, FxHashSet<ClassId>)>()
            + self
                .class_children
                .values()
                .map(|set| set.capacity() * std::mem::size_of::<ClassId>())
                .sum::<usize>();
        MemoryStats {
            name_hash_bytes: self.name_hash.allocated_size(),
            outer_hash_bytes: self.outer_hash.allocated_size(),
            outer_map_bytes: self.outer_map.allocated_size(),
            class_map_bytes: self.class_map.allocated_size(),
            class_children_bytes,
            package_map_bytes: self.package_map.allocated_size(),
            object_package_bytes: self.object_package.capacity()
                * std::mem::size_of::<(ObjectId, ObjectId)>(),
            object_store_bytes: self.store.allocated_size() + self.names.allocated_size(),
            class_table_bytes: self.classes.allocated_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ObjectFlags;
    use crate::object::ObjectEntry;

    fn insert_named(
        tables: &mut RegistryTables,
        name: &str,
        outer: Option<ObjectId>,
        class: ClassId,
    ) -> ObjectId {
        let name = tables.names.intern(name);
        let id = tables.store.insert(ObjectEntry {
            name: Some(name),
            outer,
            class,
            flags: ObjectFlags::empty(),
        });
        tables.hash_object(id);
        id
    }

    fn class(tables: &mut RegistryTables, name: &str) -> ClassId {
        let name = tables.names.intern(name);
        tables.classes.register(name, None, false, &tables.names)
    }

    #[test]
    fn test_hash_then_unhash_round_trips_to_empty() {
        let mut tables = RegistryTables::new();
        let widget = class(&mut tables, "Widget");
        let root = insert_named(&mut tables, "Root", None, widget);
        let child = insert_named(&mut tables, "Child", Some(root), widget);

        tables.unhash_object(child);
        tables.store.remove(child);
        tables.unhash_object(root);
        tables.store.remove(root);

        assert!(tables.name_hash.is_empty());
        assert!(tables.outer_hash.is_empty());
        assert!(tables.outer_map.is_empty());
        assert!(tables.class_map.is_empty());
    }

    #[test]
    fn test_object_without_outer_skips_outer_indices() {
        let mut tables = RegistryTables::new();
        let widget = class(&mut tables, "Widget");
        insert_named(&mut tables, "Root", None, widget);

        assert_eq!(tables.name_hash.len(), 1);
        assert!(tables.outer_hash.is_empty());
        assert!(tables.outer_map.is_empty());
        assert_eq!(tables.class_map.len(), 1);
    }

    #[test]
    #[should_panic(expected = "double add")]
    fn test_double_hash_is_fatal() {
        let mut tables = RegistryTables::new();
        let widget = class(&mut tables, "Widget");
        let id = insert_named(&mut tables, "Root", None, widget);
        tables.hash_object(id);
    }

    #[test]
    #[should_panic(expected = "remove miscount")]
    fn test_double_unhash_is_fatal() {
        let mut tables = RegistryTables::new();
        let widget = class(&mut tables, "Widget");
        let id = insert_named(&mut tables, "Root", None, widget);
        tables.unhash_object(id);
        tables.unhash_object(id);
    }

    #[test]
    fn test_package_reassignment_moves_membership() {
        let mut tables = RegistryTables::new();
        let widget = class(&mut tables, "Widget");
        let pkg_a = insert_named(&mut tables, "PkgA", None, widget);
        let pkg_b = insert_named(&mut tables, "PkgB", None, widget);
        let obj = insert_named(&mut tables, "Obj", None, widget);

        tables.assign_external_package(obj, pkg_a);
        assert!(tables.package_map.contains_pair(&pkg_a, obj));

        tables.assign_external_package(obj, pkg_b);
        assert!(!tables.package_map.contains_key(&pkg_a));
        assert!(tables.package_map.contains_pair(&pkg_b, obj));
        assert_eq!(tables.object_package.get(&obj), Some(&pkg_b));
    }

    #[test]
    fn test_package_unassign_is_idempotent() {
        let mut tables = RegistryTables::new();
        let widget = class(&mut tables, "Widget");
        let pkg = insert_named(&mut tables, "Pkg", None, widget);
        let obj = insert_named(&mut tables, "Obj", None, widget);

        tables.assign_external_package(obj, pkg);
        tables.unassign_external_package(obj);
        tables.unassign_external_package(obj);

        assert!(tables.package_map.is_empty());
        assert!(tables.object_package.is_empty());
    }

    #[test]
    fn test_child_class_bookkeeping() {
        let mut tables = RegistryTables::new();
        let base = class(&mut tables, "Base");
        let derived = class(&mut tables, "Derived");

        tables.add_child_class(base, derived);
        assert!(tables.class_children[&base].contains(&derived));

        tables.remove_child_class(base, derived);
        assert!(!tables.class_children.contains_key(&base));
    }
}
