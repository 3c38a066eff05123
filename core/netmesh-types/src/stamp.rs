//! Change stamps for last-writer-wins conflict resolution.
//!
//! Clocks are not assumed to be synchronized across nodes, so conflicting
//! writes are ordered by the Xpriso message token that carried them, not by
//! time. The originating node breaks ties, which makes the order total and
//! identical on every replica.

use crate::NetMeshBaseIdentifier;
use serde::{Deserialize, Serialize};

/// Ordering key attached to every property value.
///
/// Compares by `token` first, then by `origin`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeStamp {
    /// Token of the change; strictly increasing per originating node.
    pub token: u64,
    /// Node that performed the write.
    pub origin: NetMeshBaseIdentifier,
}

impl ChangeStamp {
    /// Creates a stamp.
    #[must_use]
    pub fn new(token: u64, origin: NetMeshBaseIdentifier) -> Self {
        Self { token, origin }
    }

    /// The stamp every property starts out with on `origin`.
    #[must_use]
    pub fn initial(origin: NetMeshBaseIdentifier) -> Self {
        Self { token: 0, origin }
    }

    /// Returns true if a write carrying `self` must replace a value carrying `other`.
    ///
    /// Equal stamps denote the same write, so re-applying it is a no-op.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self > other
    }
}
