//! Consistency failure taxonomy
//!
//! Every error in this module is fatal: it indicates a caller-side bug (a
//! missed unregister, a corrupted handle, a structural cycle) that the
//! registry cannot recover from without risking wrong answers to later
//! queries. Recoverable outcomes (not-found, ambiguous match) never go
//! through this module.

use thiserror::Error;

/// A violation of one of the registry's structural invariants.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// An object was inserted into an index it is already present in.
    #[error("{index} index: double add")]
    DoubleAdd {
        /// Name of the index that detected the violation.
        index: &'static str,
    },

    /// Removing an object from an index removed something other than
    /// exactly one entry.
    #[error("{index} index: remove miscount")]
    RemoveMiscount {
        /// Name of the index that detected the violation.
        index: &'static str,
    },

    /// A nested enumeration visited more objects than are alive, which is
    /// only possible if the outer chain contains a cycle.
    #[error("outer chain cycle detected during nested enumeration")]
    OuterChainCycle,

    /// Registering a class would make the subtype graph cyclic.
    #[error("class hierarchy cycle")]
    HierarchyCycle,

    /// A class was unregistered while instances of it are still indexed.
    #[error("class unregistered with live instances")]
    ClassHasLiveInstances,

    /// A structural mutation was attempted while the registry is held in
    /// read-only traversal mode or mid-enumeration.
    #[error("structural mutation while registry is locked for traversal")]
    MutationDuringTraversal,

    /// Objects were still registered when an empty shutdown state was
    /// asserted.
    #[error("{count} objects still registered at shutdown")]
    LingeringObjects {
        /// How many registrations were left.
        count: usize,
    },
}

/// Aborts the calling context over an index consistency violation.
///
/// There is deliberately no recovery path here: continuing past a corrupted
/// index could report a freed object as alive.
pub(crate) fn consistency_failure(error: ConsistencyError, detail: &str) -> ! {
    log::error!("object registry consistency failure: {error} ({detail})");
    panic!("object registry consistency failure: {error} ({detail})");
}
