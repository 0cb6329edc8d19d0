//! Keyed collections of compact buckets
//!
//! Shared add/remove discipline for the hash indices: adding finds or
//! creates the key's bucket; removing drops the bucket, and the key with
//! it, as soon as the bucket empties, keeping each map sized by what is
//! alive rather than by what has ever been seen.

use crate::bucket::HashBucket;
use crate::object::ObjectId;
use rustc_hash::FxHashMap;
use std::hash::Hash;

pub(crate) struct BucketMap<K> {
    buckets: FxHashMap<K, HashBucket>,
}

impl<K: Eq + Hash + Copy> BucketMap<K> {
    pub fn new() -> Self {
        Self {
            buckets: FxHashMap::default(),
        }
    }

    pub fn find(&self, key: &K) -> Option<&HashBucket> {
        self.buckets.get(key)
    }

    pub fn contains_pair(&self, key: &K, id: ObjectId) -> bool {
        self.buckets.get(key).is_some_and(|b| b.contains(id))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.buckets.contains_key(key)
    }

    pub fn add(&mut self, key: K, id: ObjectId) {
        self.buckets.entry(key).or_default().add(id);
    }

    /// Removes the pair, returning the removed-entry count (0 or 1). An
    /// emptied bucket is dropped along with its key.
    pub fn remove(&mut self, key: &K, id: ObjectId) -> usize {
        let Some(bucket) = self.buckets.get_mut(key) else {
            return 0;
        };
        let removed = bucket.remove(id);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        removed
    }

    /// Number of keys (buckets) in use.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &HashBucket)> {
        self.buckets.iter()
    }

    pub fn shrink(&mut self) {
        self.buckets.shrink_to_fit();
        for bucket in self.buckets.values_mut() {
            bucket.shrink();
        }
    }

    /// Approximate heap bytes: the map's own table plus every spilled
    /// bucket's set.
    pub fn allocated_size(&self) -> usize {
        let table = self.buckets.capacity() * std::mem::size_of::<(K, HashBucket)>();
        let spilled: usize = self.buckets.values().map(HashBucket::allocated_size).sum();
        table + spilled
    }
}
