//! Identifiers for dagfold entities.
//!
//! Nodes are addressed by integer handles into a [`Graph`](crate::Graph)
//! arena. Parameters carry a process-unique numeric identity so that two
//! lambdas whose parameters share a surface name never alias.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Node identifier - a stable handle into a graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Create from a raw arena index
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw arena index
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get the arena index as `usize`
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

static NEXT_PARAM: AtomicU64 = AtomicU64::new(1);

/// Parameter identifier - identifies one lambda parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamId(u64);

impl ParamId {
    /// Allocate a new process-unique ParamId
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_PARAM.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value (deserialized programs)
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ParamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "param_{}", self.0)
    }
}
