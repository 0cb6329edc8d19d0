//! Lumen Object Registry
//!
//! A global, concurrent, multi-index registry of live runtime objects.
//! Objects register once, under a single lock acquisition, and are then
//! discoverable through five indices with no per-object index storage:
//!
//! - **Name**: leaf name in any container (`find_all_by_name`)
//! - **Outer pair**: exact (name, container) lookup (`find_object`)
//! - **Container**: direct or nested children (`objects_with_outer`)
//! - **Class**: exact class or full subtype closure (`objects_of_class`)
//! - **Package**: logical package membership (`objects_in_package`)
//!
//! All indices mutate together in one critical section; a collector can
//! freeze the registry read-only with [`Registry::lock_for_traversal`]
//! while it keeps running lookups. Index inconsistencies (double adds,
//! remove miscounts, outer cycles) are fatal rather than recoverable.
//!
//! # Example
//!
//! ```rust,ignore
//! use lumen_registry::{FindOptions, ObjectFlags, Registry};
//!
//! let registry = Registry::new();
//! let class = registry.register_class("Widget", None, true);
//! let root = registry.register_object("Root", None, class, ObjectFlags::empty());
//! let child = registry.register_object("Child", Some(root), class, ObjectFlags::empty());
//!
//! assert_eq!(
//!     registry.find_object(&FindOptions::named("Child").in_outer(root)),
//!     Some(child),
//! );
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod bucket;
mod bucket_map;
mod class;
mod error;
mod flags;
mod lock;
mod name;
mod object;
mod registry;
mod stats;
mod tables;

pub use class::ClassId;
pub use error::ConsistencyError;
pub use flags::ObjectFlags;
pub use lock::TraversalGuard;
pub use object::ObjectId;
pub use registry::{global, initialize, FindOptions, Registry};
pub use stats::{HashStats, MemoryStats, RegistryHashStats};
