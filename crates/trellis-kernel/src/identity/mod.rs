//! Identifier Registry
//!
//! Node identifiers come from two disjoint spaces:
//! - named nodes hash their name into `[0, AUTO_ID_BASE)`
//! - unnamed nodes draw from a counter starting at `AUTO_ID_BASE + 1`
//!
//! The same name always yields the same ID, which is what lets callers build
//! references by name.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Auto-generated identifiers are strictly greater than this value
pub const AUTO_ID_BASE: u64 = 1 << 63;

/// Unique identifier of a node within its scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Deterministic ID for a caller-supplied name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix) & (AUTO_ID_BASE - 1))
    }

    /// True for counter-allocated IDs
    #[inline]
    #[must_use]
    pub fn is_auto(self) -> bool {
        self.0 > AUTO_ID_BASE
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto() {
            write!(f, "auto#{}", self.0 - AUTO_ID_BASE)
        } else {
            write!(f, "{:016x}", self.0)
        }
    }
}

/// Per-scenario source of identifiers
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_auto: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_auto: AUTO_ID_BASE + 1,
        }
    }

    /// Hash `name` if given, otherwise take the next auto ID
    ///
    /// Uniqueness against the scenario registry is the caller's check; this
    /// only guarantees that auto IDs never repeat and never meet hashed ones.
    pub fn assign(&mut self, name: Option<&str>) -> NodeId {
        match name {
            Some(name) => NodeId::from_name(name),
            None => {
                let id = NodeId(self.next_auto);
                self.next_auto += 1;
                id
            }
        }
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
