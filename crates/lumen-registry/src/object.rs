//! Object handles and registration attributes
//!
//! The registry never owns indexed objects. A handle is a generational key
//! into the object store; the store records only what the indices need to
//! answer queries (name, outer, class, flags). Generational keys make a
//! recycled slot yield a distinct handle, so a stale handle can never alias
//! a newer object.

use crate::class::ClassId;
use crate::flags::ObjectFlags;
use crate::name::NameId;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Opaque handle to a registered object.
    pub struct ObjectId;
}

/// Registration attributes of a live object.
pub(crate) struct ObjectEntry {
    /// `None` for anonymous objects, which are stored but not indexed.
    pub name: Option<NameId>,
    /// Direct owning container; `None` for top-level objects.
    pub outer: Option<ObjectId>,
    pub class: ClassId,
    pub flags: ObjectFlags,
}

/// Arena of live object entries, the registry's unit of identity.
pub(crate) struct ObjectStore {
    objects: SlotMap<ObjectId, ObjectEntry>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: SlotMap::with_key(),
        }
    }

    pub fn insert(&mut self, entry: ObjectEntry) -> ObjectId {
        self.objects.insert(entry)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<ObjectEntry> {
        self.objects.remove(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.objects.get(id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ObjectEntry> {
        self.objects.get_mut(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of live objects; the upper bound for any nested walk.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn allocated_size(&self) -> usize {
        self.objects.capacity() * std::mem::size_of::<ObjectEntry>()
    }
}
