//! Per-object flags used to filter query results

use bitflags::bitflags;

bitflags! {
    /// Flags recorded for each registered object.
    ///
    /// Queries take an exclusion mask; objects with any excluded flag set
    /// are skipped as if they were not indexed at all.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectFlags: u32 {
        /// The collector has determined the object is unreachable. Such
        /// objects are on their way out and must never be returned.
        const UNREACHABLE = 1 << 0;
        /// The object has been marked garbage but not yet collected.
        const GARBAGE = 1 << 1;
        /// The object is transient and should not be persisted.
        const TRANSIENT = 1 << 2;
        /// The object is a class default template, not a real instance.
        const CLASS_DEFAULT = 1 << 3;
    }
}

impl ObjectFlags {
    /// Exclusion mask applied to every query in addition to the caller's.
    pub const DEFAULT_EXCLUSION: ObjectFlags = ObjectFlags::UNREACHABLE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_exclusion_excludes_unreachable() {
        let flags = ObjectFlags::UNREACHABLE | ObjectFlags::TRANSIENT;
        assert!(flags.intersects(ObjectFlags::DEFAULT_EXCLUSION));
        assert!(!ObjectFlags::TRANSIENT.intersects(ObjectFlags::DEFAULT_EXCLUSION));
    }

    #[test]
    fn test_empty_flags_pass_any_mask() {
        assert!(!ObjectFlags::empty().intersects(ObjectFlags::all()));
    }
}
