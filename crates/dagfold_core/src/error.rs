//! Error taxonomy for folding.
//!
//! Only [`FoldError::Failed`] is recoverable: it is injected into the
//! enclosing frames one at a time and may be intercepted by structured
//! error nodes. Every other variant aborts the whole evaluation.

use crate::id::{NodeId, ParamId};
use crate::Value;

/// Fold result type
pub type FoldResult<T> = Result<T, FoldError>;

/// Fold error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FoldError {
    /// No handler registered for a reached tag
    #[error("no handler registered for tag `{tag}`")]
    MissingHandler {
        /// Tag that was reached
        tag: String,
    },

    /// A handler raised an error value
    #[error("handler failed: {0}")]
    Failed(Value),

    /// A bound parameter was read outside of any binding
    #[error("parameter {param} is not bound")]
    UnboundParameter {
        /// Parameter that was read
        param: ParamId,
    },

    /// Node payload does not fit its handler, or refers to a missing node
    #[error("invalid node {node}: {reason}")]
    InvalidNode {
        /// Offending node
        node: NodeId,
        /// What is wrong with it
        reason: String,
    },

    /// Configured step budget exhausted
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded {
        /// Configured limit
        limit: u64,
    },

    /// Internal error (detached task could not be joined)
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl FoldError {
    /// Build a handler failure carrying `value`
    #[must_use]
    pub fn failed(value: impl Into<Value>) -> Self {
        Self::Failed(value.into())
    }

    /// Build an invalid-node error
    #[must_use]
    pub fn invalid_node(node: NodeId, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            node,
            reason: reason.into(),
        }
    }

    /// Whether ancestor frames may intercept this error
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Split a handler failure into its error value; fatal errors are
    /// handed back unchanged
    ///
    /// # Errors
    ///
    /// Returns `self` when the error is not recoverable
    pub fn into_error_value(self) -> Result<Value, Self> {
        match self {
            Self::Failed(value) => Ok(value),
            fatal => Err(fatal),
        }
    }
}
