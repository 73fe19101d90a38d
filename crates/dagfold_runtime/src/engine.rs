//! Fold engine.
//!
//! Evaluates a root node by driving handler tasks on an explicit frame
//! stack instead of the native call stack, so graph depth is bounded by
//! heap only. Results of untainted nodes are memoized by node identity in
//! a [`FoldState`]; nodes that read a bound parameter or carry a volatile
//! tag, directly or through any descendant, are tainted and re-evaluated on
//! every visit.
//!
//! Failures unwind one frame at a time: a recoverable failure is fed to the
//! parent task as [`Resume::Error`], giving structured-error handlers the
//! chance to intercept it. Fatal errors abort the whole evaluation.

use crate::handler::{Awaited, Evaluated, Request, Resume, Step, Task, TaskContext};
use crate::registry::Registry;
use crate::scope::ScopeStack;
use crate::state::FoldState;
use dagfold_core::{FoldError, FoldResult, Graph, NodeId, Root, Value};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, trace};

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum task resumptions per evaluation (unbounded when `None`)
    pub max_steps: Option<u64>,
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the step budget
    #[must_use]
    pub fn with_max_steps(mut self, limit: u64) -> Self {
        self.max_steps = Some(limit);
        self
    }
}

/// Fold engine for one graph and one registry
///
/// Cloning is cheap; clones share the graph and the registry.
#[derive(Debug, Clone)]
pub struct Engine {
    graph: Arc<Graph>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl Engine {
    /// Create a new engine
    #[must_use]
    pub fn new(graph: Graph, registry: Registry) -> Self {
        Self {
            graph: Arc::new(graph),
            registry: Arc::new(registry),
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Graph being evaluated
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Registry used for dispatch
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate `root` against `state`
    ///
    /// `state` may be reused across sequential evaluations of this graph.
    /// Handlers that start sub-evaluations require a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the uncaught failure, or the first fatal error
    pub async fn fold(&self, root: impl Into<Root>, state: &mut FoldState) -> FoldResult<Value> {
        let root = root.into().node();
        let span = tracing::debug_span!("fold", %root);
        self.run(root, state, ScopeStack::new())
            .instrument(span)
            .await
            .result
    }

    /// Evaluate `root` against a throwaway state
    ///
    /// # Errors
    ///
    /// See [`Engine::fold`]
    pub async fn fold_fresh(&self, root: impl Into<Root>) -> FoldResult<Value> {
        let mut state = FoldState::new();
        self.fold(root, &mut state).await
    }

    /// Evaluate `root` on a private current-thread runtime
    ///
    /// # Errors
    ///
    /// Returns [`FoldError::Internal`] when called from within a tokio
    /// runtime (use [`Engine::fold`] there), otherwise see [`Engine::fold`]
    pub fn fold_blocking(&self, root: impl Into<Root>, state: &mut FoldState) -> FoldResult<Value> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(FoldError::Internal {
                message: "fold_blocking called from within an async runtime".to_string(),
            });
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FoldError::Internal {
                message: format!("failed to start runtime: {e}"),
            })?;
        runtime.block_on(self.fold(root, state))
    }

    async fn run(&self, root: NodeId, state: &mut FoldState, scope: ScopeStack) -> Evaluated {
        Run::new(self, state, scope).drive(root).await
    }

    /// Evaluate `node` on its own tokio task, sharing nothing mutable
    ///
    /// The counters of the private state travel back in
    /// [`Evaluated::stats`].
    pub(crate) fn spawn_detached(&self, node: NodeId, scope: ScopeStack) -> BoxFuture<'static, Evaluated> {
        let engine = self.clone();
        Box::pin(async move {
            let task = tokio::spawn(async move {
                let mut state = FoldState::new();
                let mut evaluated = engine.run(node, &mut state, scope).await;
                evaluated.stats = *state.stats();
                evaluated
            });
            match task.await {
                Ok(evaluated) => evaluated,
                Err(err) => Evaluated::new(
                    Err(FoldError::Internal {
                        message: format!("sub-evaluation of {node} did not complete: {err}"),
                    }),
                    true,
                ),
            }
        })
    }
}

/// One in-progress handler invocation
struct Frame {
    node: NodeId,
    task: Box<dyn Task>,
    volatile: bool,
    /// Some observed child was tainted
    tainted: bool,
    /// Scope depth restored when the frame completes
    scope_depth: usize,
    /// Frame owns the top scratch state
    fresh: bool,
}

enum Entered {
    /// A frame was pushed; resume it with `Resume::Start`
    Pushed,
    /// Answered without a frame (parameter, cache hit, or start failure)
    Ready(FoldResult<Value>, bool),
}

/// State of one evaluation
struct Run<'a> {
    engine: &'a Engine,
    state: &'a mut FoldState,
    /// Scratch states of active fresh frames, innermost last
    overlays: Vec<FoldState>,
    scope: ScopeStack,
    frames: Vec<Frame>,
    steps: u64,
}

impl<'a> Run<'a> {
    fn new(engine: &'a Engine, state: &'a mut FoldState, scope: ScopeStack) -> Self {
        Self {
            engine,
            state,
            overlays: Vec::new(),
            scope,
            frames: Vec::new(),
            steps: 0,
        }
    }

    async fn drive(mut self, root: NodeId) -> Evaluated {
        let base = self.scope.depth();
        let mut input = match self.enter(root, base, false) {
            Entered::Pushed => Resume::Start,
            Entered::Ready(result, tainted) => return Evaluated::new(result, tainted),
        };

        loop {
            if let Err(err) = self.tick() {
                return self.abort(err);
            }

            let (result, tainted) = match self.resume_top(input) {
                Step::Done(value) => self.complete(value),
                Step::Fail(err) => self.unwind(err),
                Step::Request(request) => {
                    let entered = match request {
                        Request::Child(node) => {
                            let depth = self.scope.depth();
                            self.enter(node, depth, false)
                        }
                        Request::Scoped { node, bindings } => {
                            let depth = self.scope.push(bindings);
                            self.enter(node, depth, false)
                        }
                        Request::Fresh(node) => {
                            let depth = self.scope.depth();
                            self.enter(node, depth, true)
                        }
                        Request::Await(future) => {
                            input = match future.await {
                                Awaited::Elapsed => Resume::Elapsed,
                                Awaited::Settled(Evaluated {
                                    result,
                                    tainted,
                                    stats,
                                }) => {
                                    self.state.stats_mut().merge(&stats);
                                    if let Some(top) = self.frames.last_mut() {
                                        top.tainted |= tainted;
                                    }
                                    match self.deliver(result) {
                                        Ok(input) => input,
                                        Err(err) => return self.abort(err),
                                    }
                                }
                            };
                            continue;
                        }
                    };
                    match entered {
                        Entered::Pushed => {
                            input = Resume::Start;
                            continue;
                        }
                        Entered::Ready(result, tainted) => (result, tainted),
                    }
                }
            };

            // Deliver to the frame that asked, or finish.
            let Some(parent) = self.frames.last_mut() else {
                return Evaluated::new(result, tainted);
            };
            parent.tainted |= tainted;
            input = match self.deliver(result) {
                Ok(input) => input,
                Err(err) => return self.abort(err),
            };
        }
    }

    /// Parent input for a child outcome; fatal errors are handed back
    fn deliver(&mut self, result: FoldResult<Value>) -> FoldResult<Resume> {
        match result {
            Ok(value) => Ok(Resume::Value(value)),
            Err(err) => {
                let value = err.into_error_value()?;
                self.state.stats_mut().record_failure();
                Ok(Resume::Error(value))
            }
        }
    }

    fn tick(&mut self) -> FoldResult<()> {
        self.steps += 1;
        self.state.stats_mut().record_step();
        match self.engine.config.max_steps {
            Some(limit) if self.steps > limit => Err(FoldError::StepLimitExceeded { limit }),
            _ => Ok(()),
        }
    }

    /// Cache and taint set currently in effect
    fn active(&mut self) -> &mut FoldState {
        match self.overlays.last_mut() {
            Some(overlay) => overlay,
            None => &mut *self.state,
        }
    }

    fn resume_top(&mut self, input: Resume) -> Step {
        let Some(frame) = self.frames.last_mut() else {
            return Step::Fail(FoldError::Internal {
                message: "resumed with no active frame".to_string(),
            });
        };
        let cx = TaskContext::new(self.engine, &self.scope, frame.node);
        frame.task.resume(&cx, input)
    }

    fn enter(&mut self, id: NodeId, restore_depth: usize, fresh: bool) -> Entered {
        let engine = self.engine;
        let Some(node) = engine.graph.get(id) else {
            self.scope.truncate(restore_depth);
            return Entered::Ready(Err(FoldError::invalid_node(id, "not in graph")), false);
        };

        if let Some(param) = node.param_id() {
            let value = self.scope.lookup(param).cloned();
            self.scope.truncate(restore_depth);
            self.state.stats_mut().record_param_lookup();
            self.active().mark_tainted(id);
            trace!(node = %id, %param, bound = value.is_some(), "parameter lookup");
            return Entered::Ready(value.ok_or(FoldError::UnboundParameter { param }), true);
        }

        if !fresh {
            if let Some(value) = self.active().cached(id).cloned() {
                self.scope.truncate(restore_depth);
                self.state.stats_mut().record_cache_hit();
                trace!(node = %id, "cache hit");
                return Entered::Ready(Ok(value), false);
            }
        }

        let entry = match engine.registry.get(node.tag.as_str()) {
            Ok(entry) => entry,
            Err(err) => {
                self.scope.truncate(restore_depth);
                debug!(node = %id, tag = %node.tag, "no handler registered");
                return Entered::Ready(Err(err), false);
            }
        };

        match entry.handler.start(id, node) {
            Ok(task) => {
                if fresh {
                    self.overlays.push(FoldState::new());
                }
                self.frames.push(Frame {
                    node: id,
                    task,
                    volatile: entry.volatile,
                    tainted: false,
                    scope_depth: restore_depth,
                    fresh,
                });
                let depth = self.frames.len();
                let stats = self.state.stats_mut();
                stats.record_handler_run();
                stats.record_depth(depth);
                trace!(node = %id, tag = %node.tag, depth, fresh, "push frame");
                Entered::Pushed
            }
            Err(err) => {
                self.scope.truncate(restore_depth);
                Entered::Ready(Err(err), entry.volatile)
            }
        }
    }

    fn complete(&mut self, value: Value) -> (FoldResult<Value>, bool) {
        let Some(frame) = self.frames.pop() else {
            return (
                Err(FoldError::Internal {
                    message: "completed with no active frame".to_string(),
                }),
                true,
            );
        };
        self.scope.truncate(frame.scope_depth);
        let tainted = frame.volatile || frame.tainted;
        if frame.fresh {
            self.overlays.pop();
        } else {
            self.active().record(frame.node, value.clone(), tainted);
        }
        trace!(node = %frame.node, tainted, "frame completed");
        (Ok(value), tainted)
    }

    fn unwind(&mut self, err: FoldError) -> (FoldResult<Value>, bool) {
        let Some(frame) = self.frames.pop() else {
            return (Err(err), true);
        };
        self.scope.truncate(frame.scope_depth);
        if frame.fresh {
            self.overlays.pop();
        }
        trace!(node = %frame.node, error = %err, recoverable = err.is_recoverable(), "frame failed");
        (Err(err), frame.volatile || frame.tainted)
    }

    fn abort(&mut self, err: FoldError) -> Evaluated {
        debug!(error = %err, frames = self.frames.len(), "aborting fold");
        while let Some(frame) = self.frames.pop() {
            self.scope.truncate(frame.scope_depth);
        }
        self.overlays.clear();
        Evaluated::new(Err(err), true)
    }
}
