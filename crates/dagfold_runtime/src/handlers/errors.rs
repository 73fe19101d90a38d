//! Structured-error combinators.
//!
//! Failures reach these handlers as [`Resume::Error`] through the engine's
//! one-frame-at-a-time unwinding. Only recoverable failures are seen here;
//! fatal errors abort the evaluation before any ancestor is resumed.
//!
//! `try` selects a `match` branch by the error's discriminant: a string
//! error is its own discriminant, an object error uses its `"kind"` string
//! field, and any other error only matches the `_` branch. When both the
//! guarded path and `finally` fail, the `finally` failure is reported.

use super::{tags, type_name};
use crate::handler::{Handler, Resume, Step, Task, TaskContext};
use crate::registry::Registry;
use dagfold_core::{FoldError, FoldResult, Lambda, Node, NodeId, Payload, Value};
use indexmap::IndexMap;
use tracing::trace;

/// Key of the default `match` branch
pub const DEFAULT_BRANCH: &str = "_";

/// Registry with the structured-error handlers
#[must_use]
pub fn handlers() -> Registry {
    Registry::new()
        .with(tags::FAIL, FailHandler)
        .with(tags::TRY, TryHandler)
        .with(tags::ATTEMPT, AttemptHandler)
        .with(tags::GUARD, GuardHandler)
        .with(tags::SETTLE, SettleHandler)
}

/// Discriminant used to select a `match` branch
#[must_use]
pub fn discriminant(error: &Value) -> Option<&str> {
    match error {
        Value::String(kind) => Some(&**kind),
        Value::Object(fields) => fields.get("kind").and_then(Value::as_str),
        _ => None,
    }
}

fn single_child(id: NodeId, node: &Node) -> FoldResult<NodeId> {
    match node.payload {
        Payload::Child(child) => Ok(child),
        _ => Err(FoldError::invalid_node(id, "expected a single child")),
    }
}

struct FailHandler;

impl Handler for FailHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        Ok(Box::new(FailTask(single_child(id, node)?)))
    }
}

struct FailTask(NodeId);

impl Task for FailTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => Step::child(self.0),
            Resume::Value(err) | Resume::Error(err) => Step::Fail(FoldError::Failed(err)),
            Resume::Elapsed => Step::unexpected(cx.node(), &input),
        }
    }
}

struct TryHandler;

impl Handler for TryHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Try {
            expr,
            catch,
            matches,
            finally,
        } = &node.payload
        else {
            return Err(FoldError::invalid_node(id, "expected try"));
        };
        Ok(Box::new(TryTask {
            expr: *expr,
            catch: *catch,
            matches: matches.clone(),
            finally: *finally,
            phase: TryPhase::Body,
        }))
    }
}

enum TryPhase {
    Body,
    Recovering,
    Finally(Result<Value, Value>),
}

struct TryTask {
    expr: NodeId,
    catch: Option<Lambda>,
    matches: Option<IndexMap<String, Lambda>>,
    finally: Option<NodeId>,
    phase: TryPhase,
}

impl TryTask {
    fn recovery(&self, error: &Value) -> Option<Lambda> {
        if self.catch.is_some() {
            return self.catch;
        }
        let branches = self.matches.as_ref()?;
        discriminant(error)
            .and_then(|kind| branches.get(kind))
            .or_else(|| branches.get(DEFAULT_BRANCH))
            .copied()
    }

    /// Run `finally` (uncached, once) before settling on `outcome`
    fn settle(&mut self, outcome: Result<Value, Value>) -> Step {
        match self.finally {
            Some(finally) => {
                self.phase = TryPhase::Finally(outcome);
                Step::fresh(finally)
            }
            None => outcome_step(outcome),
        }
    }
}

fn outcome_step(outcome: Result<Value, Value>) -> Step {
    match outcome {
        Ok(value) => Step::Done(value),
        Err(err) => Step::Fail(FoldError::Failed(err)),
    }
}

impl Task for TryTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match (std::mem::replace(&mut self.phase, TryPhase::Body), input) {
            (TryPhase::Body, Resume::Start) => Step::child(self.expr),
            (TryPhase::Body, Resume::Value(value)) => self.settle(Ok(value)),
            (TryPhase::Body, Resume::Error(err)) => match self.recovery(&err) {
                Some(lambda) => {
                    trace!(node = %cx.node(), error = %err, "recovering");
                    self.phase = TryPhase::Recovering;
                    Step::scoped(lambda.body, vec![(lambda.param, err)])
                }
                None => self.settle(Err(err)),
            },
            (TryPhase::Recovering, Resume::Value(value)) => self.settle(Ok(value)),
            (TryPhase::Recovering, Resume::Error(err)) => self.settle(Err(err)),
            (TryPhase::Finally(outcome), Resume::Value(_)) => outcome_step(outcome),
            (TryPhase::Finally(_), Resume::Error(err)) => Step::Fail(FoldError::Failed(err)),
            (_, input) => Step::unexpected(cx.node(), &input),
        }
    }
}

struct AttemptHandler;

impl Handler for AttemptHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        Ok(Box::new(AttemptTask(single_child(id, node)?)))
    }
}

struct AttemptTask(NodeId);

impl Task for AttemptTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => Step::child(self.0),
            Resume::Value(ok) => Step::Done(Value::object([("ok", ok), ("err", Value::Null)])),
            Resume::Error(err) => Step::Done(Value::object([("ok", Value::Null), ("err", err)])),
            Resume::Elapsed => Step::unexpected(cx.node(), &input),
        }
    }
}

struct GuardHandler;

impl Handler for GuardHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Guard { condition, error } = node.payload else {
            return Err(FoldError::invalid_node(id, "expected guard"));
        };
        Ok(Box::new(GuardTask {
            condition,
            error,
            failing: false,
        }))
    }
}

struct GuardTask {
    condition: NodeId,
    error: NodeId,
    /// Condition was false; evaluating the error value
    failing: bool,
}

impl Task for GuardTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match (self.failing, input) {
            (false, Resume::Start) => Step::child(self.condition),
            (false, Resume::Value(Value::Bool(true))) => Step::Done(Value::Null),
            (false, Resume::Value(Value::Bool(false))) => {
                self.failing = true;
                Step::child(self.error)
            }
            (false, Resume::Value(other)) => Step::fail(format!(
                "guard condition must be a boolean, found {}",
                type_name(&other)
            )),
            (true, Resume::Value(err)) | (_, Resume::Error(err)) => Step::Fail(FoldError::Failed(err)),
            (_, input) => Step::unexpected(cx.node(), &input),
        }
    }
}

struct SettleHandler;

impl Handler for SettleHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Args(exprs) = &node.payload else {
            return Err(FoldError::invalid_node(id, "expected arguments"));
        };
        Ok(Box::new(SettleTask {
            exprs: exprs.clone(),
            next: 0,
            fulfilled: Vec::new(),
            rejected: Vec::new(),
        }))
    }
}

struct SettleTask {
    exprs: Vec<NodeId>,
    next: usize,
    fulfilled: Vec<Value>,
    rejected: Vec<Value>,
}

impl Task for SettleTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => {}
            Resume::Value(value) => self.fulfilled.push(value),
            Resume::Error(err) => self.rejected.push(err),
            Resume::Elapsed => return Step::unexpected(cx.node(), &input),
        }
        match self.exprs.get(self.next) {
            Some(expr) => {
                self.next += 1;
                Step::child(*expr)
            }
            None => Step::Done(Value::object([
                ("fulfilled", Value::from(std::mem::take(&mut self.fulfilled))),
                ("rejected", Value::from(std::mem::take(&mut self.rejected))),
            ])),
        }
    }
}
