//! Handler registry.
//!
//! A registry maps tags to handlers. Registries compose by plain union:
//! when both sides define a tag the later one wins, with no conflict
//! detection. A missing tag is only reported when a node carrying it is
//! first visited.

use crate::handler::Handler;
use dagfold_core::{FoldError, FoldResult};
use indexmap::IndexMap;
use std::sync::Arc;

/// Entry for a registered handler
#[derive(Clone)]
pub struct HandlerEntry {
    /// The handler itself
    pub handler: Arc<dyn Handler>,
    /// Nodes with this tag are never cached
    pub volatile: bool,
}

impl HandlerEntry {
    /// Create a new entry
    #[must_use]
    pub fn new(handler: Arc<dyn Handler>, volatile: bool) -> Self {
        Self { handler, volatile }
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("volatile", &self.volatile)
            .finish_non_exhaustive()
    }
}

/// Registry for handlers
#[derive(Clone, Default)]
pub struct Registry {
    /// Registered handlers by tag
    entries: IndexMap<String, HandlerEntry>,
}

impl Registry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the tag
    pub fn register(&mut self, tag: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.insert(tag, HandlerEntry::new(Arc::new(handler), false))
    }

    /// Register a handler whose nodes are always tainted
    pub fn register_volatile(
        &mut self,
        tag: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> &mut Self {
        self.insert(tag, HandlerEntry::new(Arc::new(handler), true))
    }

    /// Insert a prepared entry, replacing any previous one for the tag
    pub fn insert(&mut self, tag: impl Into<String>, entry: HandlerEntry) -> &mut Self {
        self.entries.insert(tag.into(), entry);
        self
    }

    /// Builder form of [`Registry::register`]
    #[must_use]
    pub fn with(mut self, tag: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.register(tag, handler);
        self
    }

    /// Builder form of [`Registry::register_volatile`]
    #[must_use]
    pub fn with_volatile(mut self, tag: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.register_volatile(tag, handler);
        self
    }

    /// Merge `other` into this registry; entries from `other` win
    pub fn merge(&mut self, other: Registry) {
        for (tag, entry) in other.entries {
            self.entries.insert(tag, entry);
        }
    }

    /// Union of two registries; entries from `other` win
    #[must_use]
    pub fn union(mut self, other: Registry) -> Self {
        self.merge(other);
        self
    }

    /// Get the entry for a tag
    ///
    /// # Errors
    ///
    /// Returns [`FoldError::MissingHandler`] if the tag is not registered
    pub fn get(&self, tag: &str) -> FoldResult<&HandlerEntry> {
        self.entries.get(tag).ok_or_else(|| FoldError::MissingHandler {
            tag: tag.to_string(),
        })
    }

    /// Check if a tag is registered
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Check if a tag is registered as volatile
    #[must_use]
    pub fn is_volatile(&self, tag: &str) -> bool {
        self.entries.get(tag).is_some_and(|e| e.volatile)
    }

    /// Remove a tag, returning its entry
    pub fn unregister(&mut self, tag: &str) -> Option<HandlerEntry> {
        self.entries.shift_remove(tag)
    }

    /// Registered tags in registration order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Get the count of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}
