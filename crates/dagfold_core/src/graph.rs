//! Arena of program nodes.
//!
//! The graph is append-only and a node may only reference nodes that were
//! added before it, so a graph built through [`Graph::add`] is acyclic by
//! construction. The same handle may be referenced by any number of
//! parents; evaluation treats every reference to one handle as one unit of
//! work.

use crate::error::{FoldError, FoldResult};
use crate::id::NodeId;
use crate::node::Node;
use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A directed acyclic graph of program nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// All nodes, indexed by `NodeId`
    nodes: Vec<Node>,
}

impl Graph {
    /// Create a new empty graph
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a node to the graph
    ///
    /// # Errors
    ///
    /// Returns error if the node references a handle not yet in the graph
    pub fn add(&mut self, node: Node) -> FoldResult<NodeId> {
        let raw = u32::try_from(self.nodes.len()).map_err(|_| FoldError::Internal {
            message: "graph arena exhausted".to_string(),
        })?;
        let id = NodeId::from_raw(raw);
        if let Some(child) = node.children().into_iter().find(|c| c.as_u32() >= raw) {
            return Err(FoldError::invalid_node(
                id,
                format!("references {child} which is not in the graph yet"),
            ));
        }
        self.nodes.push(node);
        Ok(id)
    }

    /// Get node by ID
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Validate the graph structure
    ///
    /// Every child handle must point strictly backwards, which rules out
    /// dangling references and cycles in deserialized graphs.
    ///
    /// # Errors
    ///
    /// Returns error naming the first offending node
    pub fn validate(&self) -> FoldResult<()> {
        for (id, node) in self.iter() {
            for child in node.children() {
                if child >= id {
                    return Err(FoldError::invalid_node(
                        id,
                        format!("child {child} does not precede its parent"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Iterate nodes with their handles
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId::from_raw(i as u32), node))
    }

    /// Get total node count
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Body of an entry envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    /// Node whose value is the program result
    pub result: NodeId,
    /// Any further metadata, kept as-is
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Wrapper produced by builders: `{ast: {result, ..}, ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Program body
    pub ast: Ast,
    /// Any further metadata, kept as-is
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Envelope {
    /// Wrap a result node with no metadata
    #[must_use]
    pub fn new(result: NodeId) -> Self {
        Self {
            ast: Ast {
                result,
                extra: IndexMap::new(),
            },
            extra: IndexMap::new(),
        }
    }
}

/// Evaluation entry: a bare node or an envelope around one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Root {
    /// Bare root node
    Node(NodeId),
    /// Envelope whose `ast.result` is the root
    Envelope(Envelope),
}

impl Root {
    /// The node to evaluate
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::Node(id) => *id,
            Self::Envelope(envelope) => envelope.ast.result,
        }
    }
}

impl From<NodeId> for Root {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<Envelope> for Root {
    fn from(envelope: Envelope) -> Self {
        Self::Envelope(envelope)
    }
}
