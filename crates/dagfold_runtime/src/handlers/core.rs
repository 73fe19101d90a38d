//! Structural handlers: literals, lists, records, lambda application.

use super::tags;
use crate::handler::{Handler, Resume, Step, Task, TaskContext, args, leaf};
use crate::registry::Registry;
use dagfold_core::{FoldError, FoldResult, Lambda, Map, Node, NodeId, Payload, Value};

/// Registry with the structural handlers
#[must_use]
pub fn handlers() -> Registry {
    Registry::new()
        .with(tags::LITERAL, leaf(literal))
        .with(tags::LIST, args(|values| Ok(Value::from(values))))
        .with(tags::RECORD, RecordHandler)
        .with(tags::APPLY, ApplyHandler)
}

fn literal(id: NodeId, node: &Node) -> FoldResult<Value> {
    match &node.payload {
        Payload::Literal(value) => Ok(value.clone()),
        other => Err(FoldError::invalid_node(id, format!("expected literal, found {other:?}"))),
    }
}

struct RecordHandler;

impl Handler for RecordHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Fields(fields) = &node.payload else {
            return Err(FoldError::invalid_node(id, "expected fields"));
        };
        Ok(Box::new(RecordTask {
            pending: fields.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            object: Map::new(),
        }))
    }
}

struct RecordTask {
    pending: Vec<(String, NodeId)>,
    object: Map,
}

impl Task for RecordTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match input {
            Resume::Start => {}
            Resume::Value(value) => {
                if let Some((key, _)) = self.pending.get(self.object.len()) {
                    self.object.insert(key.clone(), value);
                }
            }
            Resume::Error(err) => return Step::Fail(FoldError::Failed(err)),
            Resume::Elapsed => return Step::unexpected(cx.node(), &input),
        }
        match self.pending.get(self.object.len()) {
            Some((_, child)) => Step::child(*child),
            None => Step::Done(Value::from(std::mem::take(&mut self.object))),
        }
    }
}

struct ApplyHandler;

impl Handler for ApplyHandler {
    fn start(&self, id: NodeId, node: &Node) -> FoldResult<Box<dyn Task>> {
        let Payload::Apply { arg, lambda } = &node.payload else {
            return Err(FoldError::invalid_node(id, "expected apply"));
        };
        Ok(Box::new(ApplyTask {
            arg: *arg,
            lambda: *lambda,
            bound: false,
        }))
    }
}

struct ApplyTask {
    arg: NodeId,
    lambda: Lambda,
    bound: bool,
}

impl Task for ApplyTask {
    fn resume(&mut self, cx: &TaskContext<'_>, input: Resume) -> Step {
        match (input, self.bound) {
            (Resume::Start, false) => Step::child(self.arg),
            (Resume::Value(value), false) => {
                self.bound = true;
                Step::scoped(self.lambda.body, vec![(self.lambda.param, value)])
            }
            (Resume::Value(value), true) => Step::Done(value),
            (Resume::Error(err), _) => Step::Fail(FoldError::Failed(err)),
            (input, _) => Step::unexpected(cx.node(), &input),
        }
    }
}
