//! The registry surface
//!
//! Every public operation acquires the registry lock once and runs to
//! completion under it. Queries take a shared view of the tables;
//! registrations, removals, and renames take the mutable view, which is
//! fatal while the registry is held read-only. The `Vec`-returning
//! enumerations copy their results out under the lock; the `for_each`
//! variants hold it across the caller's callback and raise read-only mode
//! so a mutating callback aborts instead of corrupting the walk.

use crate::class::ClassId;
use crate::error::{consistency_failure, ConsistencyError};
use crate::flags::ObjectFlags;
use crate::lock::{ReadOnlyScope, RegistryInner, TraversalGuard};
use crate::object::{ObjectEntry, ObjectId};
use crate::stats::{HashStats, MemoryStats, RegistryHashStats};
use crate::tables::{outer_pair_hash, RegistryTables};
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Query description for [`Registry::find_object`].
#[derive(Debug, Clone, Copy)]
pub struct FindOptions<'a> {
    /// Leaf name to search for.
    pub name: &'a str,
    /// Exact direct container; `None` searches every container.
    pub outer: Option<ObjectId>,
    /// Restrict matches to this class and its subtypes.
    pub class: Option<ClassId>,
    /// Match `class` exactly instead of including subtypes.
    pub exact_class: bool,
    /// Flags to exclude in addition to the default exclusion mask.
    pub exclude: ObjectFlags,
}

impl<'a> FindOptions<'a> {
    /// Options matching `name` in any container, any class.
    pub fn named(name: &'a str) -> Self {
        Self {
            name,
            outer: None,
            class: None,
            exact_class: false,
            exclude: ObjectFlags::empty(),
        }
    }

    /// Restricts the search to direct children of `outer`.
    pub fn in_outer(mut self, outer: ObjectId) -> Self {
        self.outer = Some(outer);
        self
    }

    /// Restricts matches to `class` and its subtypes.
    pub fn of_class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    /// Requires the match's class to be exactly the filter class.
    pub fn exact(mut self) -> Self {
        self.exact_class = true;
        self
    }

    /// Excludes objects carrying any of `flags`.
    pub fn excluding(mut self, flags: ObjectFlags) -> Self {
        self.exclude = flags;
        self
    }
}

/// Multi-index registry of live runtime objects.
///
/// All instances are independent; [`initialize`]/[`global`] manage the
/// process-wide one.
pub struct Registry {
    lock: ReentrantMutex<RegistryInner>,
    all_classes_version: AtomicU64,
    native_classes_version: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            lock: ReentrantMutex::new(RegistryInner::new()),
            all_classes_version: AtomicU64::new(0),
            native_classes_version: AtomicU64::new(0),
        }
    }

    // ------------------------------------------------------------------
    // Class lifecycle
    // ------------------------------------------------------------------

    /// Registers a class, resolving the supertype by name.
    ///
    /// The supertype does not need to be registered yet; naming it creates
    /// a placeholder that a later registration fills in. Registering the
    /// same class name twice is fatal.
    pub fn register_class(
        &self,
        name: &str,
        super_class: Option<&str>,
        native: bool,
    ) -> ClassId {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut("register_class");
        let tables = &mut *tables;

        let name_id = tables.names.intern(name);
        let super_id = super_class.map(|text| {
            let super_name = tables.names.intern(text);
            tables.classes.resolve(super_name)
        });
        let id = tables.classes.register(name_id, super_id, native, &tables.names);
        if let Some(super_id) = super_id {
            tables.add_child_class(super_id, id);
        }

        self.all_classes_version.fetch_add(1, Ordering::Relaxed);
        if native {
            self.native_classes_version.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    /// Unregisters a class. Fatal when instances of exactly this class are
    /// still registered; subtypes keep their (now placeholder) supertype
    /// reference.
    pub fn unregister_class(&self, class: ClassId) {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut("unregister_class");
        let tables = &mut *tables;

        let (name_id, super_id, native) = match tables.classes.get(class) {
            Some(entry) if entry.registered => (entry.name, entry.super_class, entry.native),
            _ => consistency_failure(
                ConsistencyError::RemoveMiscount { index: "class" },
                "unknown or unregistered class",
            ),
        };
        if tables.class_map.contains_key(&class) {
            consistency_failure(
                ConsistencyError::ClassHasLiveInstances,
                tables.names.resolve(name_id),
            );
        }
        if let Some(super_id) = super_id {
            tables.remove_child_class(super_id, class);
        }
        tables.classes.unregister(class, &tables.names);

        self.all_classes_version.fetch_add(1, Ordering::Relaxed);
        if native {
            self.native_classes_version.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Looks up a registered class by name. Placeholders do not match.
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let name_id = tables.names.find(name)?;
        let id = tables.classes.find_by_name(name_id)?;
        tables.classes.is_registered(id).then_some(id)
    }

    /// The name a class (or placeholder) was resolved under.
    pub fn class_name(&self, class: ClassId) -> Option<Arc<str>> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let entry = tables.classes.get(class)?;
        Some(tables.names.resolve(entry.name).clone())
    }

    /// Whether `class` is `base` or a transitive subtype of it.
    pub fn is_derived_from(&self, class: ClassId, base: ClassId) -> bool {
        let inner = self.lock.lock();
        let tables = inner.tables();
        tables.classes.is_derived_from(class, base)
    }

    /// Monotonic counter bumped on every class registration change. Lock
    /// free; callers cache hierarchy-derived data against it.
    pub fn all_classes_version(&self) -> u64 {
        self.all_classes_version.load(Ordering::Relaxed)
    }

    /// Like [`all_classes_version`](Self::all_classes_version), but bumped
    /// only for native classes.
    pub fn native_classes_version(&self) -> u64 {
        self.native_classes_version.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Object lifecycle
    // ------------------------------------------------------------------

    /// Registers an object, inserting it into every index in one critical
    /// section. An empty name registers an anonymous object: it counts as
    /// live and holds a valid handle but appears in no index.
    pub fn register_object(
        &self,
        name: &str,
        outer: Option<ObjectId>,
        class: ClassId,
        flags: ObjectFlags,
    ) -> ObjectId {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut("register_object");
        let tables = &mut *tables;

        let name_id = (!name.is_empty()).then(|| tables.names.intern(name));
        let id = tables.store.insert(ObjectEntry {
            name: name_id,
            outer,
            class,
            flags,
        });
        tables.hash_object(id);
        id
    }

    /// Unregisters an object, removing it from every index. Unknown or
    /// stale handles, and any index miscount, are fatal.
    pub fn unregister_object(&self, id: ObjectId) {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut("unregister_object");
        let tables = &mut *tables;

        tables.unhash_object(id);
        tables.unassign_external_package(id);
        tables.store.remove(id);
    }

    /// Changes an object's name, its outer, or both, re-keying every index
    /// the object appears in. `None` keeps the current value.
    ///
    /// The new outer is not checked against the object's own subtree; a
    /// rename that closes an outer cycle is detected fatally by the next
    /// nested enumeration.
    pub fn rename_object(
        &self,
        id: ObjectId,
        new_name: Option<&str>,
        new_outer: Option<ObjectId>,
    ) {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut("rename_object");
        let tables = &mut *tables;

        tables.unhash_object(id);
        let name_id =
            new_name.map(|name| (!name.is_empty()).then(|| tables.names.intern(name)));
        if let Some(entry) = tables.store.get_mut(id) {
            if let Some(name_id) = name_id {
                entry.name = name_id;
            }
            if let Some(outer) = new_outer {
                entry.outer = Some(outer);
            }
        }
        tables.hash_object(id);
    }

    // ------------------------------------------------------------------
    // External packages
    // ------------------------------------------------------------------

    /// Assigns or clears an object's external package. Assigning replaces
    /// any previous assignment; clearing when nothing is assigned is a
    /// no-op.
    pub fn set_external_package(&self, id: ObjectId, package: Option<ObjectId>) {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut("set_external_package");
        match package {
            Some(package) => tables.assign_external_package(id, package),
            None => tables.unassign_external_package(id),
        }
    }

    /// The package an object was externally assigned to, if any.
    pub fn external_package(&self, id: ObjectId) -> Option<ObjectId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        tables.object_package.get(&id).copied()
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Finds a single object matching the options.
    ///
    /// With an outer, the exact (name, outer) index is probed first; a miss
    /// falls back to objects externally assigned to that outer as a
    /// package. Without an outer, any container matches. When several
    /// objects match, a warning is logged and the first is returned.
    pub fn find_object(&self, options: &FindOptions<'_>) -> Option<ObjectId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let tables = &*tables;

        let name_id = tables.names.find(options.name)?;
        let name_hash = tables.names.hash_of(name_id);
        let mut candidates: SmallVec<[ObjectId; 4]> = SmallVec::new();

        match options.outer {
            Some(outer) => {
                let pair = outer_pair_hash(name_hash, outer);
                if let Some(bucket) = tables.outer_hash.find(&pair) {
                    for id in bucket {
                        let Some(entry) = tables.store.get(id) else {
                            continue;
                        };
                        if entry.name != Some(name_id) || entry.outer != Some(outer) {
                            continue;
                        }
                        if Self::passes_filters(tables, entry, options) {
                            candidates.push(id);
                        }
                    }
                }
                if candidates.is_empty() {
                    if let Some(bucket) = tables.package_map.find(&outer) {
                        for id in bucket {
                            let Some(entry) = tables.store.get(id) else {
                                continue;
                            };
                            if entry.name != Some(name_id) {
                                continue;
                            }
                            if Self::passes_filters(tables, entry, options) {
                                candidates.push(id);
                            }
                        }
                    }
                }
            }
            None => {
                if let Some(bucket) = tables.name_hash.find(&name_hash) {
                    for id in bucket {
                        let Some(entry) = tables.store.get(id) else {
                            continue;
                        };
                        if entry.name != Some(name_id) {
                            continue;
                        }
                        if Self::passes_filters(tables, entry, options) {
                            candidates.push(id);
                        }
                    }
                }
            }
        }

        if candidates.len() > 1 {
            log::warn!(
                "ambiguous search for '{}': {} objects match, returning the first",
                options.name,
                candidates.len()
            );
        }
        let found = candidates.first().copied();
        if let Some(id) = found {
            Self::mark_reachable(tables, &[id]);
        }
        found
    }

    /// All objects with the given leaf name, in any container.
    pub fn find_all_by_name(
        &self,
        name: &str,
        class: Option<ClassId>,
        exact_class: bool,
        exclude: ObjectFlags,
    ) -> Vec<ObjectId> {
        let options = FindOptions {
            name,
            outer: None,
            class,
            exact_class,
            exclude,
        };
        let inner = self.lock.lock();
        let tables = inner.tables();
        let tables = &*tables;

        let mut results = Vec::new();
        let Some(name_id) = tables.names.find(name) else {
            return results;
        };
        if let Some(bucket) = tables.name_hash.find(&tables.names.hash_of(name_id)) {
            for id in bucket {
                let Some(entry) = tables.store.get(id) else {
                    continue;
                };
                if entry.name == Some(name_id) && Self::passes_filters(tables, entry, &options) {
                    results.push(id);
                }
            }
        }
        Self::mark_reachable(tables, &results);
        results
    }

    /// Hash-only existence probe for a (name, outer) pair.
    ///
    /// False positives are possible (hash collisions, excluded objects);
    /// `false` is authoritative. Used for scanning name sequences for an
    /// unused one without paying for full matches.
    pub fn object_possibly_exists(&self, name: &str, outer: Option<ObjectId>) -> bool {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let Some(name_id) = tables.names.find(name) else {
            return false;
        };
        let name_hash = tables.names.hash_of(name_id);
        match outer {
            Some(outer) => tables
                .outer_hash
                .contains_key(&outer_pair_hash(name_hash, outer)),
            None => tables.name_hash.contains_key(&name_hash),
        }
    }

    // ------------------------------------------------------------------
    // Container enumeration
    // ------------------------------------------------------------------

    /// Objects directly inside `outer`, descending into nested containers
    /// when asked. The class filter applies to results only; descent is
    /// governed by flags (an excluded object hides its whole subtree).
    pub fn objects_with_outer(
        &self,
        outer: ObjectId,
        include_nested: bool,
        class_filter: Option<ClassId>,
        exclude: ObjectFlags,
    ) -> Vec<ObjectId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let tables = &*tables;

        let mut results = Vec::new();
        let _ = Self::walk_outer(tables, outer, include_nested, exclude, &mut |id| {
            results.push(id);
            ControlFlow::Continue(())
        });
        if let Some(class) = class_filter {
            results.retain(|&id| {
                tables
                    .store
                    .get(id)
                    .is_some_and(|entry| tables.classes.is_derived_from(entry.class, class))
            });
        }
        Self::mark_reachable(tables, &results);
        results
    }

    /// Breakable enumeration of the objects inside `outer`. The registry
    /// stays locked and read-only for the duration; a callback that
    /// mutates it aborts.
    pub fn for_each_object_with_outer(
        &self,
        outer: ObjectId,
        include_nested: bool,
        exclude: ObjectFlags,
        mut callback: impl FnMut(ObjectId) -> ControlFlow<()>,
    ) {
        let inner = self.lock.lock();
        let _read_only = ReadOnlyScope::enter(&inner);
        let tables = inner.tables();
        let tables = &*tables;
        let _ = Self::walk_outer(tables, outer, include_nested, exclude, &mut |id| {
            Self::mark_reachable(tables, &[id]);
            callback(id)
        });
    }

    // ------------------------------------------------------------------
    // Package enumeration
    // ------------------------------------------------------------------

    /// Objects belonging to a logical package: those externally assigned
    /// to it plus those structurally nested under it, minus any nested
    /// object assigned to a different package. Each object is reported
    /// once even when it belongs both ways.
    pub fn objects_in_package(
        &self,
        package: ObjectId,
        include_nested: bool,
        exclude: ObjectFlags,
    ) -> Vec<ObjectId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let tables = &*tables;

        let mut results = Vec::new();
        let _ = Self::walk_package(tables, package, include_nested, exclude, &mut |id| {
            results.push(id);
            ControlFlow::Continue(())
        });
        Self::mark_reachable(tables, &results);
        results
    }

    /// Breakable form of [`objects_in_package`](Self::objects_in_package).
    pub fn for_each_object_in_package(
        &self,
        package: ObjectId,
        include_nested: bool,
        exclude: ObjectFlags,
        mut callback: impl FnMut(ObjectId) -> ControlFlow<()>,
    ) {
        let inner = self.lock.lock();
        let _read_only = ReadOnlyScope::enter(&inner);
        let tables = inner.tables();
        let tables = &*tables;
        let _ = Self::walk_package(tables, package, include_nested, exclude, &mut |id| {
            Self::mark_reachable(tables, &[id]);
            callback(id)
        });
    }

    // ------------------------------------------------------------------
    // Class enumeration
    // ------------------------------------------------------------------

    /// Live instances of a class, optionally including all subtypes.
    pub fn objects_of_class(
        &self,
        class: ClassId,
        include_derived: bool,
        exclude: ObjectFlags,
    ) -> Vec<ObjectId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let tables = &*tables;

        let mut results = Vec::new();
        let _ = Self::walk_classes(tables, &[class], include_derived, exclude, &mut |id| {
            results.push(id);
            ControlFlow::Continue(())
        });
        Self::mark_reachable(tables, &results);
        results
    }

    /// Breakable enumeration of a class's live instances.
    pub fn for_each_object_of_class(
        &self,
        class: ClassId,
        include_derived: bool,
        exclude: ObjectFlags,
        callback: impl FnMut(ObjectId) -> ControlFlow<()>,
    ) {
        self.for_each_object_of_classes(&[class], include_derived, exclude, callback);
    }

    /// Breakable enumeration over the union of several classes' instances.
    /// Overlapping closures are deduplicated.
    pub fn for_each_object_of_classes(
        &self,
        classes: &[ClassId],
        include_derived: bool,
        exclude: ObjectFlags,
        mut callback: impl FnMut(ObjectId) -> ControlFlow<()>,
    ) {
        let inner = self.lock.lock();
        let _read_only = ReadOnlyScope::enter(&inner);
        let tables = inner.tables();
        let tables = &*tables;
        let _ = Self::walk_classes(tables, classes, include_derived, exclude, &mut |id| {
            Self::mark_reachable(tables, &[id]);
            callback(id)
        });
    }

    /// Subtypes of a class: immediate children, or the full transitive
    /// closure when `recursive`. The class itself is not included.
    pub fn derived_classes(&self, class: ClassId, recursive: bool) -> Vec<ClassId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        if recursive {
            Self::class_closure(&tables, &[class], true)
                .into_iter()
                .skip(1)
                .collect()
        } else {
            tables
                .class_children
                .get(&class)
                .map(|children| children.iter().copied().collect())
                .unwrap_or_default()
        }
    }

    /// Whether any instance of the class (or, optionally, of a subtype)
    /// is registered. Flag exclusions do not apply; an unreachable
    /// instance still counts until it unregisters.
    pub fn class_has_live_instances(&self, class: ClassId, include_derived: bool) -> bool {
        let inner = self.lock.lock();
        let tables = inner.tables();
        Self::class_closure(&tables, &[class], include_derived)
            .iter()
            .any(|candidate| tables.class_map.contains_key(candidate))
    }

    // ------------------------------------------------------------------
    // Attribute accessors
    // ------------------------------------------------------------------

    /// The object's leaf name; `None` for stale handles and anonymous
    /// objects.
    pub fn name_of(&self, id: ObjectId) -> Option<Arc<str>> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let name = tables.store.get(id)?.name?;
        Some(tables.names.resolve(name).clone())
    }

    /// The object's direct container, when it is live and has one.
    pub fn outer_of(&self, id: ObjectId) -> Option<ObjectId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        tables.store.get(id)?.outer
    }

    /// The object's class.
    pub fn class_of(&self, id: ObjectId) -> Option<ClassId> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        Some(tables.store.get(id)?.class)
    }

    /// The object's current flags.
    pub fn flags_of(&self, id: ObjectId) -> Option<ObjectFlags> {
        let inner = self.lock.lock();
        let tables = inner.tables();
        Some(tables.store.get(id)?.flags)
    }

    /// Whether the handle refers to a live registration.
    pub fn is_registered(&self, id: ObjectId) -> bool {
        let inner = self.lock.lock();
        let tables = inner.tables();
        tables.store.contains(id)
    }

    /// Sets and clears flag bits on a live object, returning whether the
    /// handle was live. Flags restructure nothing, so this is permitted
    /// while a [`TraversalGuard`] is held; the collector marks objects
    /// through it.
    pub fn update_flags(&self, id: ObjectId, set: ObjectFlags, clear: ObjectFlags) -> bool {
        let inner = self.lock.lock();
        let mut tables = inner.tables_mut_nonstructural("update_flags");
        match tables.store.get_mut(id) {
            Some(entry) => {
                entry.flags.remove(clear);
                entry.flags.insert(set);
                true
            }
            None => false,
        }
    }

    /// Number of live registrations, anonymous objects included.
    pub fn live_object_count(&self) -> usize {
        let inner = self.lock.lock();
        let tables = inner.tables();
        tables.store.len()
    }

    // ------------------------------------------------------------------
    // Collector integration
    // ------------------------------------------------------------------

    /// Holds the registry read-only. Queries remain legal for the holder
    /// (the lock is reentrant, and guards nest); any structural mutation
    /// from any code path aborts until the guard drops.
    pub fn lock_for_traversal(&self) -> TraversalGuard<'_> {
        TraversalGuard::acquire(&self.lock)
    }

    /// Installs a callback invoked on every handle a successful lookup or
    /// enumeration yields, for incremental reachability marking. The
    /// callback runs under the registry lock and must not call back in.
    pub fn set_reachability_hook(&self, hook: impl Fn(ObjectId) + Send + Sync + 'static) {
        let inner = self.lock.lock();
        inner.tables_mut("set_reachability_hook").reachability = Some(Box::new(hook));
    }

    /// Removes the reachability hook.
    pub fn clear_reachability_hook(&self) {
        let inner = self.lock.lock();
        inner.tables_mut("clear_reachability_hook").reachability = None;
    }

    // ------------------------------------------------------------------
    // Maintenance and statistics
    // ------------------------------------------------------------------

    /// Compacts every table and bucket after bulk removals.
    pub fn shrink(&self) {
        let start = Instant::now();
        let inner = self.lock.lock();
        inner.tables_mut("shrink").shrink_all();
        log::debug!("compacted registry tables in {:?}", start.elapsed());
    }

    /// Occupancy snapshot of every hash index.
    pub fn hash_stats(&self) -> RegistryHashStats {
        let inner = self.lock.lock();
        let tables = inner.tables();
        RegistryHashStats {
            name_hash: HashStats::collect(&tables.name_hash),
            outer_hash: HashStats::collect(&tables.outer_hash),
            outer_map: HashStats::collect(&tables.outer_map),
            class_map: HashStats::collect(&tables.class_map),
            package_map: HashStats::collect(&tables.package_map),
        }
    }

    /// Approximate heap bytes held per index and table.
    pub fn memory_overhead(&self) -> MemoryStats {
        let inner = self.lock.lock();
        let tables = inner.tables();
        tables.memory_overhead()
    }

    /// Verifies the registry is empty, for orderly shutdown after the last
    /// unregister. Lingering registrations are fatal.
    pub fn shutdown_checks(&self) {
        let inner = self.lock.lock();
        let tables = inner.tables();
        let live = tables.store.len();
        if live > 0 {
            consistency_failure(
                ConsistencyError::LingeringObjects { count: live },
                "shutdown",
            );
        }
        for (index, empty) in [
            ("name hash", tables.name_hash.is_empty()),
            ("outer hash", tables.outer_hash.is_empty()),
            ("outer map", tables.outer_map.is_empty()),
            ("class map", tables.class_map.is_empty()),
            ("package map", tables.package_map.is_empty()),
        ] {
            if !empty {
                consistency_failure(
                    ConsistencyError::RemoveMiscount { index },
                    "entries remain after the last object unregistered",
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Walk internals
    // ------------------------------------------------------------------

    fn passes_filters(
        tables: &RegistryTables,
        entry: &ObjectEntry,
        options: &FindOptions<'_>,
    ) -> bool {
        if entry
            .flags
            .intersects(options.exclude | ObjectFlags::DEFAULT_EXCLUSION)
        {
            return false;
        }
        match options.class {
            None => true,
            Some(class) if options.exact_class => entry.class == class,
            Some(class) => tables.classes.is_derived_from(entry.class, class),
        }
    }

    fn mark_reachable(tables: &RegistryTables, ids: &[ObjectId]) {
        if let Some(hook) = &tables.reachability {
            for &id in ids {
                hook(id);
            }
        }
    }

    /// Breadth-first wave walk over direct-children buckets, bounded by
    /// the live-object count. Visiting more objects than are alive means
    /// the outer chain contains a cycle, which is fatal.
    fn walk_outer(
        tables: &RegistryTables,
        root: ObjectId,
        include_nested: bool,
        exclude: ObjectFlags,
        visit: &mut dyn FnMut(ObjectId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let exclusion = exclude | ObjectFlags::DEFAULT_EXCLUSION;
        let limit = tables.store.len();
        let mut visited = 0usize;
        let mut wave: SmallVec<[ObjectId; 16]> = smallvec![root];
        let mut next: SmallVec<[ObjectId; 16]> = SmallVec::new();

        while !wave.is_empty() {
            for &parent in &wave {
                let Some(bucket) = tables.outer_map.find(&parent) else {
                    continue;
                };
                for id in bucket {
                    visited += 1;
                    if visited > limit {
                        consistency_failure(
                            ConsistencyError::OuterChainCycle,
                            &tables.object_debug(root),
                        );
                    }
                    let Some(entry) = tables.store.get(id) else {
                        continue;
                    };
                    if entry.flags.intersects(exclusion) {
                        continue;
                    }
                    visit(id)?;
                    if include_nested {
                        next.push(id);
                    }
                }
            }
            wave.clear();
            std::mem::swap(&mut wave, &mut next);
        }
        ControlFlow::Continue(())
    }

    /// Package membership walk: externally assigned objects first, then
    /// the structural subtree, skipping (and not descending into) objects
    /// assigned to a different package. A nested walk also descends into
    /// the subtrees of externally assigned members.
    fn walk_package(
        tables: &RegistryTables,
        package: ObjectId,
        include_nested: bool,
        exclude: ObjectFlags,
        visit: &mut dyn FnMut(ObjectId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let exclusion = exclude | ObjectFlags::DEFAULT_EXCLUSION;
        let mut seen: FxHashSet<ObjectId> = FxHashSet::default();
        let mut wave: SmallVec<[ObjectId; 16]> = smallvec![package];
        let mut next: SmallVec<[ObjectId; 16]> = SmallVec::new();

        if let Some(bucket) = tables.package_map.find(&package) {
            for id in bucket {
                let Some(entry) = tables.store.get(id) else {
                    continue;
                };
                if entry.flags.intersects(exclusion) {
                    continue;
                }
                if seen.insert(id) {
                    visit(id)?;
                    if include_nested {
                        wave.push(id);
                    }
                }
            }
        }

        let limit = tables.store.len();
        let mut visited = 0usize;

        while !wave.is_empty() {
            for &parent in &wave {
                let Some(bucket) = tables.outer_map.find(&parent) else {
                    continue;
                };
                for id in bucket {
                    visited += 1;
                    if visited > limit {
                        consistency_failure(
                            ConsistencyError::OuterChainCycle,
                            &tables.object_debug(package),
                        );
                    }
                    // Nested but assigned elsewhere: belongs to the other
                    // package, subtree and all.
                    if tables
                        .object_package
                        .get(&id)
                        .is_some_and(|&assigned| assigned != package)
                    {
                        continue;
                    }
                    let Some(entry) = tables.store.get(id) else {
                        continue;
                    };
                    if entry.flags.intersects(exclusion) {
                        continue;
                    }
                    if seen.insert(id) {
                        visit(id)?;
                        if include_nested {
                            next.push(id);
                        }
                    }
                }
            }
            wave.clear();
            std::mem::swap(&mut wave, &mut next);
        }
        ControlFlow::Continue(())
    }

    /// Iterative subtype closure over one or more roots, deduplicated.
    /// Roots come first in the returned order.
    fn class_closure(
        tables: &RegistryTables,
        roots: &[ClassId],
        include_derived: bool,
    ) -> SmallVec<[ClassId; 16]> {
        let mut closure: SmallVec<[ClassId; 16]> = SmallVec::new();
        let mut seen: FxHashSet<ClassId> = FxHashSet::default();
        let mut worklist: SmallVec<[ClassId; 16]> = SmallVec::new();

        for &root in roots {
            if seen.insert(root) {
                closure.push(root);
                worklist.push(root);
            }
        }
        if include_derived {
            while let Some(class) = worklist.pop() {
                let Some(children) = tables.class_children.get(&class) else {
                    continue;
                };
                for &child in children {
                    if seen.insert(child) {
                        closure.push(child);
                        worklist.push(child);
                    }
                }
            }
        }
        closure
    }

    fn walk_classes(
        tables: &RegistryTables,
        roots: &[ClassId],
        include_derived: bool,
        exclude: ObjectFlags,
        visit: &mut dyn FnMut(ObjectId) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let exclusion = exclude | ObjectFlags::DEFAULT_EXCLUSION;
        for class in Self::class_closure(tables, roots, include_derived) {
            let Some(bucket) = tables.class_map.find(&class) else {
                continue;
            };
            for id in bucket {
                let Some(entry) = tables.store.get(id) else {
                    continue;
                };
                if entry.flags.intersects(exclusion) {
                    continue;
                }
                visit(id)?;
            }
        }
        ControlFlow::Continue(())
    }
}

static GLOBAL: OnceCell<Registry> = OnceCell::new();

/// Installs the process-wide registry. Idempotent; later calls return the
/// instance the first call created.
pub fn initialize() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

/// The process-wide registry, created on first use.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}
