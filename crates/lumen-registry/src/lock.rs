//! Registry locking discipline
//!
//! One reentrant mutex guards every table. Reentrancy is part of the
//! contract: a collector holding the registry in read-only mode still runs
//! lookups, and those lookups re-acquire the same lock on the same thread.
//!
//! Inside the mutex the tables sit behind a `RefCell` and a read-only depth
//! counter. Mutations go through [`RegistryInner::tables_mut`], which turns
//! both "read-only mode is active" and "an enumeration on this thread is
//! mid-walk" into the same fatal diagnostic instead of silently corrupting
//! an index someone is iterating.

use crate::error::{consistency_failure, ConsistencyError};
use crate::tables::RegistryTables;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::{Cell, Ref, RefCell, RefMut};

pub(crate) struct RegistryInner {
    /// Nesting depth of read-only holders (traversal guards and in-flight
    /// enumeration callbacks). Plain `Cell`: only the lock-holding thread
    /// touches it.
    read_only: Cell<u32>,
    tables: RefCell<RegistryTables>,
}

impl RegistryInner {
    pub fn new() -> Self {
        Self {
            read_only: Cell::new(0),
            tables: RefCell::new(RegistryTables::new()),
        }
    }

    /// Shared view of the tables, for queries.
    pub fn tables(&self) -> Ref<'_, RegistryTables> {
        self.tables.borrow()
    }

    /// Mutable view of the tables, for structural mutations.
    ///
    /// Fatal when the registry is held read-only or when this thread is
    /// inside an enumeration over the same tables.
    pub fn tables_mut(&self, operation: &'static str) -> RefMut<'_, RegistryTables> {
        if self.read_only.get() > 0 {
            consistency_failure(ConsistencyError::MutationDuringTraversal, operation);
        }
        match self.tables.try_borrow_mut() {
            Ok(tables) => tables,
            Err(_) => consistency_failure(ConsistencyError::MutationDuringTraversal, operation),
        }
    }

    /// Mutable view for non-structural updates (flag changes).
    ///
    /// Flag updates move nothing between buckets, so they stay legal while
    /// the registry is held read-only; the collector marks objects through
    /// this path. Mutation from inside an enumeration is still fatal.
    pub fn tables_mut_nonstructural(&self, operation: &'static str) -> RefMut<'_, RegistryTables> {
        match self.tables.try_borrow_mut() {
            Ok(tables) => tables,
            Err(_) => consistency_failure(ConsistencyError::MutationDuringTraversal, operation),
        }
    }

    fn enter_read_only(&self) {
        self.read_only.set(self.read_only.get() + 1);
    }

    fn exit_read_only(&self) {
        self.read_only.set(self.read_only.get() - 1);
    }
}

/// Scoped read-only mode for the registry, handed to the collector.
///
/// While any guard is alive the holder may query freely (the lock is
/// reentrant) but every structural mutation, from any code path, is a fatal
/// consistency error. Guards nest; dropping releases one level.
pub struct TraversalGuard<'a> {
    guard: ReentrantMutexGuard<'a, RegistryInner>,
}

impl<'a> TraversalGuard<'a> {
    pub(crate) fn acquire(lock: &'a ReentrantMutex<RegistryInner>) -> Self {
        let guard = lock.lock();
        guard.enter_read_only();
        Self { guard }
    }
}

impl Drop for TraversalGuard<'_> {
    fn drop(&mut self) {
        self.guard.exit_read_only();
    }
}

/// Raises read-only mode for the duration of an enumeration callback, so a
/// callback that mutates fails on the depth check with the caller's
/// operation named rather than on a bare `RefCell` borrow error.
pub(crate) struct ReadOnlyScope<'a> {
    inner: &'a RegistryInner,
}

impl<'a> ReadOnlyScope<'a> {
    pub fn enter(inner: &'a RegistryInner) -> Self {
        inner.enter_read_only();
        Self { inner }
    }
}

impl Drop for ReadOnlyScope<'_> {
    fn drop(&mut self) {
        self.inner.exit_read_only();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_mut_allowed_when_unlocked() {
        let inner = RegistryInner::new();
        let tables = inner.tables_mut("test mutation");
        drop(tables);
        assert_eq!(inner.tables().store.len(), 0);
    }

    #[test]
    #[should_panic(expected = "locked for traversal")]
    fn test_read_only_scope_blocks_mutation() {
        let inner = RegistryInner::new();
        let _scope = ReadOnlyScope::enter(&inner);
        inner.tables_mut("test mutation");
    }

    #[test]
    fn test_read_only_scopes_nest() {
        let inner = RegistryInner::new();
        {
            let _outer = ReadOnlyScope::enter(&inner);
            let _inner_scope = ReadOnlyScope::enter(&inner);
        }
        // Both scopes released; mutation is legal again.
        drop(inner.tables_mut("test mutation"));
    }

    #[test]
    #[should_panic(expected = "locked for traversal")]
    fn test_live_shared_borrow_blocks_mutation() {
        let inner = RegistryInner::new();
        let _tables = inner.tables();
        inner.tables_mut("test mutation");
    }

    #[test]
    fn test_traversal_guard_is_reentrant() {
        let lock = ReentrantMutex::new(RegistryInner::new());
        let first = TraversalGuard::acquire(&lock);
        let second = TraversalGuard::acquire(&lock);
        drop(second);
        drop(first);
        drop(lock.lock().tables_mut("test mutation"));
    }
}
