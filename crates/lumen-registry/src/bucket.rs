//! Compact hash bucket
//!
//! Across all of the registry's indices the overwhelming majority of hash
//! buckets hold zero, one, or two entries. The bucket stores up to two
//! handles inline and only spills to a heap-allocated set on the third
//! distinct element, demoting back to inline storage when it shrinks to two
//! or fewer. A bucket with `len() <= 2` never holds a heap allocation.

use crate::object::ObjectId;
use rustc_hash::FxHashSet;

/// Size-specialized set of object handles.
///
/// Duplicate prevention is the caller's responsibility: callers only add
/// handles they have verified are absent, and treat a `remove` count of
/// zero as index corruption.
#[derive(Debug, Default)]
pub enum HashBucket {
    /// No entries, no allocation.
    #[default]
    Empty,
    /// A single inline entry.
    One(ObjectId),
    /// Two inline entries.
    Two(ObjectId, ObjectId),
    /// Three or more entries, heap-backed. Boxed to keep the inline
    /// variants at two words.
    Spilled(Box<FxHashSet<ObjectId>>),
}

impl HashBucket {
    /// Adds a handle, promoting to the heap-backed representation on the
    /// third distinct element.
    pub fn add(&mut self, id: ObjectId) {
        match self {
            HashBucket::Empty => *self = HashBucket::One(id),
            HashBucket::One(a) => *self = HashBucket::Two(*a, id),
            HashBucket::Two(a, b) => {
                let mut set = Box::new(FxHashSet::default());
                set.insert(*a);
                set.insert(*b);
                set.insert(id);
                *self = HashBucket::Spilled(set);
            }
            HashBucket::Spilled(set) => {
                set.insert(id);
            }
        }
    }

    /// Removes a handle, returning how many entries were removed (0 or 1).
    ///
    /// A heap-backed bucket shrinking to two or fewer entries demotes back
    /// to inline storage and frees the set.
    pub fn remove(&mut self, id: ObjectId) -> usize {
        match self {
            HashBucket::Empty => 0,
            HashBucket::One(a) => {
                if *a == id {
                    *self = HashBucket::Empty;
                    1
                } else {
                    0
                }
            }
            HashBucket::Two(a, b) => {
                if *a == id {
                    *self = HashBucket::One(*b);
                    1
                } else if *b == id {
                    *self = HashBucket::One(*a);
                    1
                } else {
                    0
                }
            }
            HashBucket::Spilled(set) => {
                if !set.remove(&id) {
                    return 0;
                }
                if set.len() <= 2 {
                    let mut pair = [None, None];
                    for (slot, remaining) in pair.iter_mut().zip(set.drain()) {
                        *slot = Some(remaining);
                    }
                    *self = match pair {
                        [Some(a), Some(b)] => HashBucket::Two(a, b),
                        [Some(a), None] => HashBucket::One(a),
                        _ => HashBucket::Empty,
                    };
                }
                1
            }
        }
    }

    /// Whether the handle is present.
    pub fn contains(&self, id: ObjectId) -> bool {
        match self {
            HashBucket::Empty => false,
            HashBucket::One(a) => *a == id,
            HashBucket::Two(a, b) => *a == id || *b == id,
            HashBucket::Spilled(set) => set.contains(&id),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            HashBucket::Empty => 0,
            HashBucket::One(_) => 1,
            HashBucket::Two(..) => 2,
            HashBucket::Spilled(set) => set.len(),
        }
    }

    /// True when the bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        matches!(self, HashBucket::Empty)
    }

    /// Heap bytes held by the bucket; zero for the inline representations.
    pub fn allocated_size(&self) -> usize {
        match self {
            HashBucket::Spilled(set) => {
                std::mem::size_of::<FxHashSet<ObjectId>>()
                    + set.capacity() * std::mem::size_of::<ObjectId>()
            }
            _ => 0,
        }
    }

    /// Compacts a spilled set's capacity after bulk removals.
    pub fn shrink(&mut self) {
        if let HashBucket::Spilled(set) = self {
            set.shrink_to_fit();
        }
    }

    /// Uniform cursor over the bucket's handles, independent of the active
    /// representation.
    pub fn iter(&self) -> BucketIter<'_> {
        match self {
            HashBucket::Empty => BucketIter::Inline {
                first: None,
                second: None,
            },
            HashBucket::One(a) => BucketIter::Inline {
                first: Some(*a),
                second: None,
            },
            HashBucket::Two(a, b) => BucketIter::Inline {
                first: Some(*a),
                second: Some(*b),
            },
            HashBucket::Spilled(set) => BucketIter::Spilled(set.iter()),
        }
    }
}

impl<'a> IntoIterator for &'a HashBucket {
    type Item = ObjectId;
    type IntoIter = BucketIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`HashBucket`]'s handles.
pub enum BucketIter<'a> {
    /// Cursor over the inline representations.
    Inline {
        /// Next entry to yield.
        first: Option<ObjectId>,
        /// Entry yielded after `first`.
        second: Option<ObjectId>,
    },
    /// Cursor over the heap-backed representation.
    Spilled(std::collections::hash_set::Iter<'a, ObjectId>),
}

impl Iterator for BucketIter<'_> {
    type Item = ObjectId;

    fn next(&mut self) -> Option<ObjectId> {
        match self {
            BucketIter::Inline { first, second } => {
                let next = first.take();
                *first = second.take();
                next
            }
            BucketIter::Spilled(iter) => iter.next().copied(),
        }
    }
}
