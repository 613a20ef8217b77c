//! Core graph data structures and topology validation
//!
//! A [`Graph`] holds the static topology: nodes in declaration order, static and
//! conditional edges, and the entry node. It is assembled by
//! [`StateGraph`](crate::StateGraph) and frozen inside a
//! [`CompiledGraph`](crate::CompiledGraph); nothing mutates it after
//! [`Graph::validate`] succeeds.
//!
//! ```text
//!   START ──► fetch ──► classify ──┬─ "book"   ──► book ──► END
//!                                  ├─ "cancel" ──► cancel ─► END
//!                                  └─ END
//! ```
//!
//! Declaration order matters: it is the order in which the updates of nodes that
//! ran in the same superstep are merged, and the order of every frontier.

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier
pub type NodeId = String;

/// Sentinel used as the source of the entry edge
pub const START: &str = "__start__";

/// Terminal sentinel; reaching it ends a branch
pub const END: &str = "__end__";

/// Boxed future returned by a node handler
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Node handler: `(state) -> partial update`
pub type NodeExecutor = Arc<dyn Fn(Value) -> NodeFuture + Send + Sync>;

/// Router of a conditional edge: `(state) -> label`
pub type Router = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Outgoing edge of a node
#[derive(Clone)]
pub enum Edge {
    /// Always continue to the target
    Direct(NodeId),

    /// Continue to the target mapped from the router's label
    Conditional {
        router: Router,
        branches: BTreeMap<String, NodeId>,
    },
}

impl Edge {
    /// Every node this edge can lead to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(target) => vec![target.as_str()],
            Edge::Conditional { branches, .. } => branches.values().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(node_id) => f.debug_tuple("Direct").field(node_id).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .field("branches", branches)
                .finish(),
        }
    }
}

/// A declared node
#[derive(Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub handler: NodeExecutor,
    /// Nested graph that makes up the whole node body
    pub subgraph: Option<CompiledGraph>,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("id", &self.id)
            .field("handler", &"<function>")
            .field("subgraph", &self.subgraph.is_some())
            .finish()
    }
}

/// Static graph topology
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<NodeSpec>,
    index: HashMap<NodeId, usize>,
    duplicates: Vec<NodeId>,
    edges: HashMap<NodeId, Vec<Edge>>,
    entry: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. Collisions are reported by [`Graph::validate`].
    pub fn add_node(&mut self, spec: NodeSpec) {
        if self.index.contains_key(&spec.id) || spec.id == START || spec.id == END {
            self.duplicates.push(spec.id);
            return;
        }
        self.index.insert(spec.id.clone(), self.nodes.len());
        self.nodes.push(spec);
    }

    pub fn add_edge(&mut self, source: impl Into<NodeId>, edge: Edge) {
        self.edges.entry(source.into()).or_default().push(edge);
    }

    pub fn set_entry(&mut self, node: impl Into<NodeId>) {
        self.entry = Some(node.into());
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn edges_from(&self, id: &str) -> &[Edge] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declaration position of a node; unknown ids sort last
    pub fn order_of(&self, id: &str) -> usize {
        self.index.get(id).copied().unwrap_or(usize::MAX)
    }

    /// Sort node ids by declaration order and drop duplicates
    pub fn sort_by_declaration(&self, ids: &mut Vec<NodeId>) {
        ids.sort_by_key(|id| self.order_of(id));
        ids.dedup();
    }

    /// Check the topology.
    ///
    /// Fails on duplicate ids, a missing or unknown entry, and edges that refer to
    /// undeclared nodes. Unreachable nodes are only logged.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = self.duplicates.first() {
            return Err(GraphError::DuplicateNodeId(id.clone()));
        }

        let entry = self.entry.as_deref().ok_or(GraphError::NoEntryPoint)?;
        if !self.contains(entry) {
            return Err(GraphError::UnknownEdgeTarget {
                from: START.to_string(),
                to: entry.to_string(),
            });
        }

        // Deterministic error reporting: walk sources in declaration order.
        let mut sources: Vec<&NodeId> = self.edges.keys().collect();
        sources.sort_by(|a, b| self.order_of(a).cmp(&self.order_of(b)).then_with(|| a.cmp(b)));
        for source in sources {
            if !self.contains(source) {
                return Err(GraphError::UnknownEdgeTarget {
                    from: source.clone(),
                    to: source.clone(),
                });
            }
            for edge in self.edges_from(source) {
                if let Edge::Conditional { branches, .. } = edge {
                    if branches.is_empty() {
                        return Err(GraphError::UnknownEdgeTarget {
                            from: source.clone(),
                            to: "<no branches>".to_string(),
                        });
                    }
                }
                for target in edge.targets() {
                    if target != END && !self.contains(target) {
                        return Err(GraphError::UnknownEdgeTarget {
                            from: source.clone(),
                            to: target.to_string(),
                        });
                    }
                }
            }
        }

        let reachable = self.reachable_from(entry);
        for node in &self.nodes {
            if !reachable.contains(node.id.as_str()) {
                tracing::warn!(node = %node.id, "Node is unreachable from entry '{}'", entry);
            }
        }

        Ok(())
    }

    /// Nodes reachable from `start` through any edge
    pub fn reachable_from<'a>(&'a self, start: &'a str) -> HashSet<&'a str> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if id == END || !seen.insert(id) {
                continue;
            }
            for edge in self.edges_from(id) {
                queue.extend(edge.targets());
            }
        }
        seen
    }
}
