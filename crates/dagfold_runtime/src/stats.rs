//! Fold statistics.
//!
//! Counters accumulate across every evaluation that shares a
//! [`FoldState`](crate::FoldState), which makes cache reuse between
//! repeated runs observable.

/// Fold counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    /// Tasks started (handler invocations)
    pub handler_runs: u64,
    /// Child requests served from the cache
    pub cache_hits: u64,
    /// Bound-parameter resolutions
    pub param_lookups: u64,
    /// Task resumptions
    pub steps: u64,
    /// Recoverable failures injected into a parent frame
    pub failures_injected: u64,
    /// Deepest frame stack observed
    pub max_depth: usize,
}

impl FoldStats {
    /// Create new stats
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task start
    pub fn record_handler_run(&mut self) {
        self.handler_runs += 1;
    }

    /// Record a cache hit
    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    /// Record a parameter lookup
    pub fn record_param_lookup(&mut self) {
        self.param_lookups += 1;
    }

    /// Record a task resumption
    pub fn record_step(&mut self) {
        self.steps += 1;
    }

    /// Record an injected failure
    pub fn record_failure(&mut self) {
        self.failures_injected += 1;
    }

    /// Record the current frame depth
    pub fn record_depth(&mut self, depth: usize) {
        self.max_depth = self.max_depth.max(depth);
    }

    /// Fold in the counters of a finished sub-evaluation
    ///
    /// Counts add up; `max_depth` keeps the deepest single stack, since a
    /// sub-evaluation runs on a stack of its own.
    pub fn merge(&mut self, other: &FoldStats) {
        self.handler_runs += other.handler_runs;
        self.cache_hits += other.cache_hits;
        self.param_lookups += other.param_lookups;
        self.steps += other.steps;
        self.failures_injected += other.failures_injected;
        self.max_depth = self.max_depth.max(other.max_depth);
    }

    /// Share of node visits answered from the cache (0.0 - 1.0)
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let visits = self.cache_hits + self.handler_runs;
        if visits == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / visits as f64
    }

    /// Reset stats
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
