//! dagfold Runtime
//!
//! Stack-safe fold engine for dagfold programs. Handlers are resumable
//! state machines driven by an explicit frame stack; pure subresults are
//! memoized by node identity and invalidated through taint tracking.
//! Concurrency and structured-error control flow are ordinary handlers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod handler;
pub mod handlers;
pub mod registry;
pub mod scope;
pub mod state;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use engine::{Engine, EngineConfig};
pub use handler::{Awaited, Evaluated, Handler, Request, Resume, Step, Task, TaskContext, args, leaf};
pub use handlers::{standard, standard_reference};
pub use registry::{HandlerEntry, Registry};
pub use scope::ScopeStack;
pub use state::FoldState;
pub use stats::FoldStats;
