//! StateGraph builder API for declaring workflows
//!
//! [`StateGraph`] collects nodes, edges and breakpoints, then [`compile`]
//! validates the topology and freezes it into a [`CompiledGraph`].
//!
//! ```text
//!   StateGraph ──add_node / add_edge / add_conditional_edges──► compile()
//!                                                                  │
//!                                     validate: ids, entry, edge targets
//!                                                                  ▼
//!                                                           CompiledGraph
//! ```
//!
//! # Example
//!
//! ```rust
//! use stategraph_core::{AppendReducer, RunConfig, StateGraph, StateSchema, END};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> stategraph_core::Result<()> {
//! let schema = StateSchema::new().with_reducer("log", AppendReducer);
//! let mut graph = StateGraph::new().with_schema(schema);
//!
//! graph.add_node("classify", |state| async move {
//!     let urgent = state["text"].as_str().unwrap_or_default().contains('!');
//!     Ok(json!({ "urgent": urgent, "log": ["classify"] }))
//! });
//! graph.add_node("page", |_| async { Ok(json!({ "log": ["page"] })) });
//! graph.add_node("queue", |_| async { Ok(json!({ "log": ["queue"] })) });
//!
//! graph.add_edge("__start__", "classify");
//! graph.add_conditional_edges(
//!     "classify",
//!     |state| if state["urgent"] == json!(true) { "urgent" } else { "normal" },
//!     [("urgent", "page"), ("normal", "queue")],
//! );
//! graph.add_edge("page", END);
//! graph.add_edge("queue", END);
//!
//! let outcome = graph.compile()?.invoke(json!({"text": "down!"}), &RunConfig::new("t1")).await?;
//! assert_eq!(outcome.state()["log"], json!(["classify", "page"]));
//! # Ok(())
//! # }
//! ```
//!
//! [`compile`]: StateGraph::compile

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeExecutor, NodeId, NodeSpec, Router, START};
use crate::interrupt::InterruptConfig;
use crate::state::StateSchema;
use crate::subgraph::subgraph_handler;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Builder for a stateful graph
pub struct StateGraph {
    graph: Graph,
    schema: StateSchema,
    interrupt_config: InterruptConfig,
}

impl StateGraph {
    /// Empty graph with overwrite semantics for every key
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            schema: StateSchema::new(),
            interrupt_config: InterruptConfig::new(),
        }
    }

    /// Use `schema` to merge node updates
    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Add a node.
    ///
    /// The handler receives a snapshot of the state and returns a partial
    /// update. Ids must be unique; a collision is reported by
    /// [`compile`](StateGraph::compile).
    pub fn add_node<F, Fut>(&mut self, id: impl Into<NodeId>, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let executor: NodeExecutor = Arc::new(move |state| Box::pin(handler(state)));
        self.add_node_with_executor(id, executor)
    }

    /// Add a node with a pre-built executor
    pub fn add_node_with_executor(&mut self, id: impl Into<NodeId>, executor: NodeExecutor) -> &mut Self {
        self.graph.add_node(NodeSpec {
            id: id.into(),
            handler: executor,
            subgraph: None,
        });
        self
    }

    /// Add a node whose whole body is a compiled graph.
    ///
    /// The nested graph runs on the parent's thread under its own namespace,
    /// and its pauses pause this node.
    pub fn add_subgraph(&mut self, id: impl Into<NodeId>, subgraph: CompiledGraph) -> &mut Self {
        self.graph.add_node(NodeSpec {
            id: id.into(),
            handler: subgraph_handler(subgraph.clone()),
            subgraph: Some(subgraph),
        });
        self
    }

    /// Add a static edge. An edge from [`START`] sets the entry node.
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        let from = from.into();
        let to = to.into();
        if from == START {
            self.graph.set_entry(to);
        } else {
            self.graph.add_edge(from, Edge::Direct(to));
        }
        self
    }

    /// Add a conditional edge.
    ///
    /// After `source` completes, `router` maps the merged state to a label and
    /// `mapping` maps the label to the next node. The label `__end__` (or a
    /// mapping to it) ends the branch; any other unmapped label fails the run
    /// with `RouterReturnedInvalidLabel`.
    pub fn add_conditional_edges<F, L, I, K, V>(
        &mut self,
        source: impl Into<NodeId>,
        router: F,
        mapping: I,
    ) -> &mut Self
    where
        F: Fn(&Value) -> L + Send + Sync + 'static,
        L: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let router: Router = Arc::new(move |state| router(state).into());
        let branches: BTreeMap<String, NodeId> = mapping
            .into_iter()
            .map(|(label, target)| (label.into(), target.into()))
            .collect();
        self.graph.add_edge(source, Edge::Conditional { router, branches });
        self
    }

    /// Set the node the first superstep runs
    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.graph.set_entry(node);
        self
    }

    /// Pause before these nodes run
    pub fn interrupt_before<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_config = std::mem::take(&mut self.interrupt_config).before(nodes);
        self
    }

    /// Pause after these nodes run, once their step is merged
    pub fn interrupt_after<I, S>(&mut self, nodes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_config = std::mem::take(&mut self.interrupt_config).after(nodes);
        self
    }

    pub fn with_interrupt_config(mut self, interrupt_config: InterruptConfig) -> Self {
        self.interrupt_config = interrupt_config;
        self
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    ///
    /// - `DuplicateNodeId` if two nodes share an id or a node uses a reserved id
    /// - `NoEntryPoint` if no entry was set
    /// - `UnknownEdgeTarget` if an edge or the entry names an undeclared node
    /// - `Configuration` if a breakpoint names an undeclared node
    pub fn compile(self) -> Result<CompiledGraph> {
        self.graph.validate()?;

        let breakpoints = self
            .interrupt_config
            .interrupt_before
            .iter()
            .chain(&self.interrupt_config.interrupt_after);
        for node in breakpoints {
            if !self.graph.contains(node) {
                return Err(GraphError::Configuration(format!(
                    "breakpoint on unknown node '{}'",
                    node
                )));
            }
        }

        tracing::debug!(
            nodes = self.graph.nodes().count(),
            entry = ?self.graph.entry(),
            "Graph compiled"
        );
        Ok(CompiledGraph::new(self.graph, self.schema, self.interrupt_config))
    }

    /// Get a reference to the underlying graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Default for StateGraph {
    fn default() -> Self {
        Self::new()
    }
}
