//! dagfold Core Types
//!
//! This crate contains the pure data model of a dagfold program: the node
//! arena, parameter identities, entry envelopes, shared runtime values and
//! the error taxonomy.
//! Nothing here performs I/O or evaluation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod value;

// Re-exports
pub use error::{FoldError, FoldResult};
pub use graph::{Ast, Envelope, Graph, Root};
pub use id::{NodeId, ParamId};
pub use node::{Lambda, Node, Payload, Tag};
pub use value::{Array, Map, Object, Value};
