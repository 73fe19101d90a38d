//! Built-in handler families.
//!
//! - [`core`]: literals, lists, records, lambda application
//! - [`concurrency`]: bounded parallel map, race, timeout, retry
//! - [`errors`]: fail, try/catch/match/finally, attempt, guard, settle

pub mod concurrency;
pub mod core;
pub mod errors;

use crate::registry::Registry;
use dagfold_core::Value;

/// Tags of the built-in handlers
pub mod tags {
    /// Constant value
    pub const LITERAL: &str = "core/literal";
    /// Ordered list of children
    pub const LIST: &str = "core/list";
    /// Record of named children
    pub const RECORD: &str = "core/record";
    /// Lambda application
    pub const APPLY: &str = "core/apply";
    /// Bound-parameter reference (resolved by the engine)
    pub const PARAM: &str = dagfold_core::Node::PARAM_TAG;

    /// Bounded parallel map
    pub const PAR_MAP: &str = "async/par_map";
    /// First branch to settle wins
    pub const RACE: &str = "async/race";
    /// Deadline with fallback
    pub const TIMEOUT: &str = "async/timeout";
    /// Repeated fresh attempts
    pub const RETRY: &str = "async/retry";

    /// Explicit failure
    pub const FAIL: &str = "error/fail";
    /// try/catch/match/finally
    pub const TRY: &str = "error/try";
    /// Capture success or failure as data
    pub const ATTEMPT: &str = "error/attempt";
    /// Conditional failure
    pub const GUARD: &str = "error/guard";
    /// Evaluate all, partition outcomes
    pub const SETTLE: &str = "error/settle";
}

/// All built-in handlers with the concurrent `par_map`
#[must_use]
pub fn standard() -> Registry {
    core::handlers()
        .union(concurrency::handlers())
        .union(errors::handlers())
}

/// All built-in handlers with the one-at-a-time `par_map`
#[must_use]
pub fn standard_reference() -> Registry {
    core::handlers()
        .union(concurrency::reference_handlers())
        .union(errors::handlers())
}

/// JSON type name used in handler failure messages
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
