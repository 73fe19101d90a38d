//! Graph builders and instrumented handlers shared by unit tests.

use crate::engine::Engine;
use crate::handler::{Handler, Task, args};
use crate::handlers::{self, tags};
use crate::registry::Registry;
use dagfold_core::{FoldError, FoldResult, Graph, Lambda, Node, NodeId, ParamId, Payload, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Incrementally built graph
pub(crate) struct Program {
    pub graph: Graph,
}

impl Program {
    pub fn new() -> Self {
        Self { graph: Graph::new() }
    }

    pub fn add(&mut self, tag: &str, payload: Payload) -> NodeId {
        self.graph.add(Node::new(tag, payload)).unwrap()
    }

    pub fn lit(&mut self, value: impl Into<Value>) -> NodeId {
        self.add(tags::LITERAL, Payload::Literal(value.into()))
    }

    pub fn list(&mut self, items: &[NodeId]) -> NodeId {
        self.add(tags::LIST, Payload::Args(items.to_vec()))
    }

    pub fn record(&mut self, fields: &[(&str, NodeId)]) -> NodeId {
        let fields: IndexMap<String, NodeId> = fields.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
        self.add(tags::RECORD, Payload::Fields(fields))
    }

    pub fn param(&mut self, param: ParamId) -> NodeId {
        self.graph.add(Node::param(param)).unwrap()
    }

    pub fn apply(&mut self, arg: NodeId, param: ParamId, body: NodeId) -> NodeId {
        self.add(
            tags::APPLY,
            Payload::Apply {
                arg,
                lambda: Lambda::new(param, body),
            },
        )
    }

    pub fn fail(&mut self, error: NodeId) -> NodeId {
        self.add(tags::FAIL, Payload::Child(error))
    }

    pub fn engine(self, registry: Registry) -> Engine {
        Engine::new(self.graph, registry)
    }
}

/// Standard handlers plus `math/add`
pub(crate) fn registry() -> Registry {
    handlers::standard().with(
        "math/add",
        args(|values| {
            let sum = values.iter().map(|v| v.as_i64().unwrap_or(0)).sum::<i64>();
            Ok(Value::from(sum))
        }),
    )
}

/// Per-node start counts
#[derive(Clone, Default)]
pub(crate) struct Runs(Arc<Mutex<HashMap<NodeId, usize>>>);

impl Runs {
    pub fn get(&self, id: NodeId) -> usize {
        self.0.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.lock().unwrap().values().sum()
    }

    pub fn max(&self) -> usize {
        self.0.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

pub(crate) struct Counting<H> {
    inner: H,
    runs: Runs,
}

impl<H: Handler> Handler for Counting<H> {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        *self.runs.0.lock().unwrap().entry(id).or_default() += 1;
        self.inner.start(id, node)
    }
}

/// Wrap a handler so every start is counted per node
pub(crate) fn counting<H: Handler>(inner: H) -> (Counting<H>, Runs) {
    let runs = Runs::default();
    (
        Counting {
            inner,
            runs: runs.clone(),
        },
        runs,
    )
}

/// Leaf handler failing on its first `failures` starts, then yielding `"success"`
pub(crate) fn flaky(failures: usize) -> (impl Handler, Runs) {
    let seen = Arc::new(Mutex::new(0usize));
    counting(crate::handler::leaf(move |_, _| {
        let mut seen = seen.lock().unwrap();
        *seen += 1;
        if *seen <= failures {
            Err(FoldError::failed(format!("attempt {seen} failed")))
        } else {
            Ok(Value::from("success"))
        }
    }))
}
