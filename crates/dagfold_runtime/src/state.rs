//! Memoization cache and taint set.
//!
//! A node is either cached, tainted, or neither; never both. Tainted nodes
//! depend on a bound parameter or a volatile tag and must be re-evaluated
//! on every visit. A state may be threaded through several sequential
//! evaluations of the same graph to reuse pure subresults.

use crate::stats::FoldStats;
use dagfold_core::{NodeId, Value};
use rustc_hash::{FxHashMap, FxHashSet};

/// Cache, taint set, and counters for one or more evaluations
#[derive(Debug, Clone, Default)]
pub struct FoldState {
    cache: FxHashMap<NodeId, Value>,
    taint: FxHashSet<NodeId>,
    stats: FoldStats,
}

impl FoldState {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value of an untainted node
    #[must_use]
    pub fn cached(&self, id: NodeId) -> Option<&Value> {
        if self.taint.contains(&id) {
            return None;
        }
        self.cache.get(&id)
    }

    /// Record the result of a completed node
    pub fn record(&mut self, id: NodeId, value: Value, tainted: bool) {
        if tainted {
            self.mark_tainted(id);
        } else {
            self.taint.remove(&id);
            self.cache.insert(id, value);
        }
    }

    /// Taint a node and evict it from the cache
    pub fn mark_tainted(&mut self, id: NodeId) {
        self.cache.remove(&id);
        self.taint.insert(id);
    }

    /// Check if a node is tainted
    #[must_use]
    pub fn is_tainted(&self, id: NodeId) -> bool {
        self.taint.contains(&id)
    }

    /// Check if a node has a cached value
    #[must_use]
    pub fn is_cached(&self, id: NodeId) -> bool {
        self.cached(id).is_some()
    }

    /// Number of cached nodes
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of tainted nodes
    #[must_use]
    pub fn taint_len(&self) -> usize {
        self.taint.len()
    }

    /// Drop all cached values and taint marks, keeping the counters
    pub fn clear(&mut self) {
        self.cache.clear();
        self.taint.clear();
    }

    /// Counters
    #[must_use]
    pub const fn stats(&self) -> &FoldStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FoldStats {
        &mut self.stats
    }

    /// Reset counters
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}
