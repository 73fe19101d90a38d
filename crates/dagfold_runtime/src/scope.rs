//! Lexical scope stack for bound parameters.
//!
//! Lookups scan from the innermost frame outwards, so an inner binding of a
//! parameter shadows an outer one. Only the engine pushes and truncates
//! frames; each pushed frame is popped when the child evaluation it was
//! pushed for completes, on every path.

use dagfold_core::{ParamId, Value};
use indexmap::IndexMap;

/// Stack of binding frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeStack {
    frames: Vec<Vec<(ParamId, Value)>>,
}

impl ScopeStack {
    /// Create an empty stack
    #[must_use]
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Seed a stack with one frame of bindings
    #[must_use]
    pub fn from_snapshot(bindings: Vec<(ParamId, Value)>) -> Self {
        let mut scope = Self::new();
        if !bindings.is_empty() {
            scope.push(bindings);
        }
        scope
    }

    /// Push a frame, returning the depth before the push
    pub fn push(&mut self, bindings: Vec<(ParamId, Value)>) -> usize {
        let depth = self.frames.len();
        self.frames.push(bindings);
        depth
    }

    /// Resolve a parameter, innermost frame first
    #[must_use]
    pub fn lookup(&self, param: ParamId) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.iter().rev().find(|(p, _)| *p == param).map(|(_, v)| v))
    }

    /// Pop frames until `depth` remain
    pub fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Current number of frames
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// All visible bindings flattened into one frame, shadowed ones dropped
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ParamId, Value)> {
        let mut visible: IndexMap<ParamId, Value> = IndexMap::new();
        for (param, value) in self.frames.iter().flatten() {
            visible.insert(*param, value.clone());
        }
        visible.into_iter().collect()
    }
}
