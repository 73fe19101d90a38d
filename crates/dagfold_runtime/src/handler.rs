//! Resumable handler protocol.
//!
//! A [`Handler`] is registered for one tag and creates a fresh [`Task`] for
//! every visit of a node with that tag. A task is an explicit state machine:
//! the engine resumes it with a [`Resume`] input and it answers with a
//! [`Step`], either asking for more input through a [`Request`] or
//! finishing. Tasks never call back into the engine directly, which is what
//! keeps graph recursion off the native stack.

use crate::engine::Engine;
use crate::scope::ScopeStack;
use crate::stats::FoldStats;
use dagfold_core::{FoldError, FoldResult, Node, NodeId, ParamId, Payload, Value};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Input fed to a task when it is resumed
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// First resumption after the task was created
    Start,
    /// Value of the last requested child or awaited sub-evaluation
    Value(Value),
    /// Failure injected from the last requested child
    Error(Value),
    /// A timer awaited by this task fired
    Elapsed,
}

/// What a task wants next
pub enum Step {
    /// Suspend until the request is serviced
    Request(Request),
    /// Finish with a value
    Done(Value),
    /// Finish with an error
    Fail(FoldError),
}

impl Step {
    /// Request the value of a child node
    #[must_use]
    pub fn child(node: NodeId) -> Self {
        Self::Request(Request::Child(node))
    }

    /// Request a child evaluated under extra parameter bindings
    #[must_use]
    pub fn scoped(node: NodeId, bindings: Vec<(ParamId, Value)>) -> Self {
        Self::Request(Request::Scoped { node, bindings })
    }

    /// Request a child evaluated without cache continuity
    #[must_use]
    pub fn fresh(node: NodeId) -> Self {
        Self::Request(Request::Fresh(node))
    }

    /// Suspend on a host future
    #[must_use]
    pub fn wait(future: BoxFuture<'static, Awaited>) -> Self {
        Self::Request(Request::Await(future))
    }

    /// Fail with a handler error value
    #[must_use]
    pub fn fail(value: impl Into<Value>) -> Self {
        Self::Fail(FoldError::failed(value))
    }

    /// Fail because the task was resumed with an input it never asked for
    #[must_use]
    pub fn unexpected(node: NodeId, input: &Resume) -> Self {
        Self::Fail(FoldError::Internal {
            message: format!("{node} resumed with unexpected input {input:?}"),
        })
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(request) => f.debug_tuple("Request").field(request).finish(),
            Self::Done(value) => f.debug_tuple("Done").field(value).finish(),
            Self::Fail(err) => f.debug_tuple("Fail").field(err).finish(),
        }
    }
}

/// Request serviced by the engine
pub enum Request {
    /// Value of a child node
    Child(NodeId),
    /// Value of a child node under additional bindings
    Scoped {
        /// Child node
        node: NodeId,
        /// Bindings pushed for exactly the lifetime of the child frame
        bindings: Vec<(ParamId, Value)>,
    },
    /// Value of a child node evaluated against a scratch cache
    Fresh(NodeId),
    /// Await a host future
    Await(BoxFuture<'static, Awaited>),
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Child(node) => f.debug_tuple("Child").field(node).finish(),
            Self::Scoped { node, bindings } => f
                .debug_struct("Scoped")
                .field("node", node)
                .field("bindings", bindings)
                .finish(),
            Self::Fresh(node) => f.debug_tuple("Fresh").field(node).finish(),
            Self::Await(_) => f.write_str("Await(..)"),
        }
    }
}

/// Outcome of an awaited host future
#[derive(Debug, Clone, PartialEq)]
pub enum Awaited {
    /// A sub-evaluation settled
    Settled(Evaluated),
    /// A timer fired
    Elapsed,
}

/// Result of a complete evaluation together with its taint
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    /// Value or error
    pub result: FoldResult<Value>,
    /// Whether the result depended on bindings or volatile tags
    pub tainted: bool,
    /// Counters of a detached sub-evaluation, merged into the caller's
    /// state when delivered
    pub stats: FoldStats,
}

impl Evaluated {
    /// Outcome with no counters attached
    #[must_use]
    pub fn new(result: FoldResult<Value>, tainted: bool) -> Self {
        Self {
            result,
            tainted,
            stats: FoldStats::default(),
        }
    }

    /// Untainted success
    #[must_use]
    pub fn value(value: Value) -> Self {
        Self::new(Ok(value), false)
    }
}

/// Handler for one tag
pub trait Handler: Send + Sync {
    /// Create a task evaluating `node`
    ///
    /// # Errors
    ///
    /// Returns error if the node cannot be handled (usually a payload
    /// shape mismatch)
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>>;
}

/// One in-progress handler invocation
pub trait Task: Send {
    /// Advance the state machine
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step;
}

/// What a task may see of the running evaluation
pub struct TaskContext<'a> {
    engine: &'a Engine,
    scope: &'a ScopeStack,
    node: NodeId,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(engine: &'a Engine, scope: &'a ScopeStack, node: NodeId) -> Self {
        Self {
            engine,
            scope,
            node,
        }
    }

    /// Node the task is evaluating
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Start an independent sub-evaluation of `node`
    ///
    /// The sub-evaluation runs on its own tokio task with a fresh fold
    /// state and a copy of the current bindings plus `bindings`. It starts
    /// when the returned future is first polled; dropping the future after
    /// that abandons the task without cancelling it.
    #[must_use]
    pub fn spawn(&self, node: NodeId, bindings: Vec<(ParamId, Value)>) -> BoxFuture<'static, Evaluated> {
        let mut scope = ScopeStack::from_snapshot(self.scope.snapshot());
        if !bindings.is_empty() {
            scope.push(bindings);
        }
        self.engine.spawn_detached(node, scope)
    }
}

/// Create a handler that computes a value from the node alone
pub fn leaf<F>(f: F) -> impl Handler
where
    F: Fn(NodeId, &Node) -> FoldResult<Value> + Send + Sync + 'static,
{
    Leaf(f)
}

struct Leaf<F>(F);

impl<F> Handler for Leaf<F>
where
    F: Fn(NodeId, &Node) -> FoldResult<Value> + Send + Sync + 'static,
{
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        Ok(Box::new(Ready(Some((self.0)(id, node)))))
    }
}

struct Ready(Option<FoldResult<Value>>);

impl Task for Ready {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match (input, self.0.take()) {
            (Resume::Start, Some(Ok(value))) => Step::Done(value),
            (Resume::Start, Some(Err(err))) => Step::Fail(err),
            (input, _) => Step::unexpected(cx.node(), &input),
        }
    }
}

/// Create a handler that folds its `Child`/`Args` children left to right
/// and combines their values
pub fn args<F>(f: F) -> impl Handler
where
    F: Fn(Vec<Value>) -> FoldResult<Value> + Send + Sync + 'static,
{
    Args(Arc::new(f))
}

struct Args<F>(Arc<F>);

impl<F> Handler for Args<F>
where
    F: Fn(Vec<Value>) -> FoldResult<Value> + Send + Sync + 'static,
{
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let children = match &node.payload {
            Payload::Child(child) => vec![*child],
            Payload::Args(args) => args.clone(),
            Payload::Empty => Vec::new(),
            other => return Err(FoldError::invalid_node(id, format!("expected arguments, found {other:?}"))),
        };
        Ok(Box::new(Collect {
            values: Vec::with_capacity(children.len()),
            children,
            combine: Arc::clone(&self.0),
        }))
    }
}

struct Collect<F> {
    children: Vec<NodeId>,
    values: Vec<Value>,
    combine: Arc<F>,
}

impl<F> Task for Collect<F>
where
    F: Fn(Vec<Value>) -> FoldResult<Value> + Send + Sync + 'static,
{
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => {}
            Resume::Value(value) => self.values.push(value),
            Resume::Error(err) => return Step::Fail(FoldError::Failed(err)),
            Resume::Elapsed => return Step::unexpected(cx.node(), &input),
        }
        match self.children.get(self.values.len()) {
            Some(next) => Step::child(*next),
            None => match (self.combine)(std::mem::take(&mut self.values)) {
                Ok(value) => Step::Done(value),
                Err(err) => Step::Fail(err),
            },
        }
    }
}
