//! Index occupancy and memory statistics
//!
//! Plain data snapshots, collected under the registry lock. Useful for
//! spotting pathological name collisions (a worst bucket far above the
//! mean) and for sizing the indices against live-object count.

use crate::bucket_map::BucketMap;
use std::hash::Hash;

/// Occupancy snapshot of one hash index.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashStats {
    /// Keys with a live bucket.
    pub buckets: usize,
    /// Total handles across all buckets.
    pub entries: usize,
    /// Buckets holding more than one handle.
    pub multi_entry_buckets: usize,
    /// Buckets that spilled to a heap-backed set.
    pub spilled_buckets: usize,
    /// Size of the largest bucket.
    pub worst_bucket: usize,
}

impl HashStats {
    pub(crate) fn collect<K: Eq + Hash + Copy>(map: &BucketMap<K>) -> Self {
        let mut stats = HashStats::default();
        for (_, bucket) in map.iter() {
            let len = bucket.len();
            stats.buckets += 1;
            stats.entries += len;
            if len > 1 {
                stats.multi_entry_buckets += 1;
            }
            if bucket.allocated_size() > 0 {
                stats.spilled_buckets += 1;
            }
            stats.worst_bucket = stats.worst_bucket.max(len);
        }
        stats
    }
}

/// Occupancy of every hash index, one [`HashStats`] each.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryHashStats {
    /// Name hash index (find by name, any container).
    pub name_hash: HashStats,
    /// Exact (name, outer) index.
    pub outer_hash: HashStats,
    /// Container to direct children index.
    pub outer_map: HashStats,
    /// Exact-class instance index.
    pub class_map: HashStats,
    /// External package membership index.
    pub package_map: HashStats,
}

/// Approximate heap bytes held per index and table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    /// Name hash index.
    pub name_hash_bytes: usize,
    /// Exact (name, outer) index.
    pub outer_hash_bytes: usize,
    /// Container to direct children index.
    pub outer_map_bytes: usize,
    /// Exact-class instance index.
    pub class_map_bytes: usize,
    /// Immediate-subtype adjacency.
    pub class_children_bytes: usize,
    /// External package membership index.
    pub package_map_bytes: usize,
    /// Object to external package reverse map.
    pub object_package_bytes: usize,
    /// Object arena plus the name interner.
    pub object_store_bytes: usize,
    /// Class arena plus its name lookup.
    pub class_table_bytes: usize,
}

impl MemoryStats {
    /// Sum across every index and table.
    pub fn total(&self) -> usize {
        self.name_hash_bytes
            + self.outer_hash_bytes
            + self.outer_map_bytes
            + self.class_map_bytes
            + self.class_children_bytes
            + self.package_map_bytes
            + self.object_package_bytes
            + self.object_store_bytes
            + self.class_table_bytes
    }
}
