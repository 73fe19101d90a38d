//! Program nodes.
//!
//! A node is a tag plus a typed payload. The payload variants cover the
//! shapes the built-in handler families read; plugin-defined tags carry
//! their data in [`Payload::Custom`] or reuse one of the generic shapes.

use crate::id::{NodeId, ParamId};
use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Tag selecting the handler for a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Create a new tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Embedded lambda: `body` is evaluated under a binding of `param`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lambda {
    /// Bound parameter
    pub param: ParamId,
    /// Body node
    pub body: NodeId,
}

impl Lambda {
    /// Create a new lambda
    #[must_use]
    pub const fn new(param: ParamId, body: NodeId) -> Self {
        Self { param, body }
    }
}

/// Node payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// No data
    Empty,
    /// Constant value
    Literal(Value),
    /// Bound-parameter reference, resolved through the scope stack
    Param(ParamId),
    /// Single child
    Child(NodeId),
    /// Positional children
    Args(Vec<NodeId>),
    /// Named children, in declaration order
    Fields(IndexMap<String, NodeId>),
    /// Apply a lambda to an argument
    Apply {
        /// Argument node
        arg: NodeId,
        /// Lambda to apply
        lambda: Lambda,
    },
    /// Map a lambda over a collection in bounded batches
    ParMap {
        /// Collection node (must fold to an array)
        collection: NodeId,
        /// Batch size
        concurrency: usize,
        /// Per-element body
        lambda: Lambda,
    },
    /// Race an expression against a deadline
    Timeout {
        /// Guarded expression
        expr: NodeId,
        /// Deadline in milliseconds
        ms: u64,
        /// Substitute evaluated on expiry
        fallback: NodeId,
    },
    /// Re-evaluate an expression until it succeeds
    Retry {
        /// Retried expression
        expr: NodeId,
        /// Maximum number of attempts
        attempts: u32,
        /// Delay between failed attempts in milliseconds
        delay_ms: u64,
    },
    /// Structured error handling
    Try {
        /// Guarded expression
        expr: NodeId,
        /// Handler bound to the caught error
        catch: Option<Lambda>,
        /// Handlers keyed by error discriminant (`_` is the default)
        matches: Option<IndexMap<String, Lambda>>,
        /// Evaluated once on every path
        finally: Option<NodeId>,
    },
    /// Fail with `error` unless `condition` holds
    Guard {
        /// Boolean condition
        condition: NodeId,
        /// Error value expression
        error: NodeId,
    },
    /// Opaque data for plugin-defined tags
    Custom(Value),
}

impl Payload {
    /// All child handles referenced by this payload, lambda bodies included
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Empty | Self::Literal(_) | Self::Param(_) | Self::Custom(_) => Vec::new(),
            Self::Child(child) => vec![*child],
            Self::Args(args) => args.clone(),
            Self::Fields(fields) => fields.values().copied().collect(),
            Self::Apply { arg, lambda } => vec![*arg, lambda.body],
            Self::ParMap {
                collection, lambda, ..
            } => vec![*collection, lambda.body],
            Self::Timeout { expr, fallback, .. } => vec![*expr, *fallback],
            Self::Retry { expr, .. } => vec![*expr],
            Self::Try {
                expr,
                catch,
                matches,
                finally,
            } => {
                let mut out = vec![*expr];
                out.extend(catch.iter().map(|l| l.body));
                if let Some(matches) = matches {
                    out.extend(matches.values().map(|l| l.body));
                }
                out.extend(finally.iter().copied());
                out
            }
            Self::Guard { condition, error } => vec![*condition, *error],
        }
    }
}

/// A tagged program node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Handler tag
    pub tag: Tag,
    /// Payload interpreted by the handler
    pub payload: Payload,
}

impl Node {
    /// Tag of bound-parameter nodes
    pub const PARAM_TAG: &'static str = "core/param";

    /// Create a new node
    #[must_use]
    pub fn new(tag: impl Into<Tag>, payload: Payload) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }

    /// Create a bound-parameter reference
    #[must_use]
    pub fn param(param: ParamId) -> Self {
        Self::new(Self::PARAM_TAG, Payload::Param(param))
    }

    /// Parameter identity if this is a bound-parameter reference
    #[must_use]
    pub fn param_id(&self) -> Option<ParamId> {
        match self.payload {
            Payload::Param(param) => Some(param),
            _ => None,
        }
    }

    /// Child handles of this node
    #[must_use]
    pub fn children(&self) -> Vec<NodeId> {
        self.payload.children()
    }
}
