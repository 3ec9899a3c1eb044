//! Replica identity types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing epoch number
pub type EpochNumber = u64;

/// Opaque value agreed on by one epoch (an encoded block proposal)
pub type Value = Vec<u8>;

/// Stable name of a replica or client (e.g. `"leader"`, `"member1"`).
///
/// Ordering is lexicographic and is used wherever the protocol needs a
/// deterministic choice between replicas.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Create a new replica ID
    pub fn new<S: Into<String>>(id: S) -> Self {
        ReplicaId(id.into())
    }

    /// Get the replica ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ReplicaId {
    fn from(s: String) -> Self {
        ReplicaId(s)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        ReplicaId(s.to_string())
    }
}
