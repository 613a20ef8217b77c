//! # stategraph-core - Stateful graph workflows with interrupt and resume
//!
//! Build workflows as graphs of async nodes over a shared JSON state, run them
//! in supersteps, checkpoint after every step, and pause anywhere for outside
//! input.
//!
//! ## Core Concepts
//!
//! ### 1. StateGraph
//!
//! [`StateGraph`] declares nodes, static edges and conditional edges, then
//! compiles into a [`CompiledGraph`]. A node receives a snapshot of the state
//! and returns a partial update.
//!
//! ### 2. Reducers
//!
//! A [`StateSchema`] decides how an update merges into the state, per key:
//! overwrite by default, or [`AppendReducer`], [`SumReducer`],
//! [`MergeReducer`], [`AddMessagesReducer`] or any [`FnReducer`].
//!
//! ### 3. Supersteps
//!
//! Every node in the frontier runs concurrently on the same snapshot. Updates
//! are merged in node declaration order, so a run is reproducible whatever the
//! completion order. The step is checkpointed, then edges and routers pick the
//! next frontier.
//!
//! ### 4. Interrupts
//!
//! [`interrupt`] pauses the calling node and hands a payload to the caller.
//! [`CompiledGraph::resume`] supplies the answer and re-executes the node from
//! the top; earlier `interrupt` calls replay their recorded answers. Static
//! breakpoints ([`InterruptConfig`]) pause before or after chosen nodes.
//!
//! ### 5. Nested graphs
//!
//! A compiled graph can be a node ([`StateGraph::add_subgraph`]) or be called
//! from inside one ([`invoke_subgraph`]). Pauses propagate to the parent.
//!
//! ### 6. Long-term store
//!
//! A [`Store`] keeps namespaced items that every thread of a graph can read,
//! for memories that outlive one conversation. See [`store`].
//!
//! ## Quick Start
//!
//! ```rust
//! use stategraph_core::{interrupt, RunConfig, RunOutcome, StateGraph, END};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> stategraph_core::Result<()> {
//! let mut graph = StateGraph::new();
//! graph.add_node("ask", |_| async {
//!     let name = interrupt(json!("What is your name?"))?;
//!     Ok(json!({ "name": name }))
//! });
//! graph.set_entry("ask");
//! graph.add_edge("ask", END);
//! let compiled = graph.compile()?;
//!
//! let config = RunConfig::new("session-1");
//! let outcome = compiled.invoke(json!({}), &config).await?;
//! assert_eq!(outcome.interrupted().and_then(|i| i.payload()), Some(&json!("What is your name?")));
//!
//! let outcome = compiled.resume(&config, json!("Ada")).await?;
//! assert_eq!(outcome, RunOutcome::Complete(json!({ "name": "Ada" })));
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through `tracing`; install any subscriber to see run,
//! superstep and checkpoint events.

pub mod builder;
pub mod compiled;
pub mod config;
pub mod error;
pub mod graph;
pub mod interrupt;
pub(crate) mod pregel;
pub mod state;
pub mod store;
pub mod subgraph;

pub use builder::StateGraph;
pub use compiled::{
    CompiledGraph, EventStream, InterruptInfo, Interrupted, PendingTask, Resume, RunOutcome,
    StateSnapshot, StepEvent,
};
pub use config::{RunConfig, DEFAULT_RECURSION_LIMIT};
pub use error::{GraphError, Result};
pub use graph::{Edge, Graph, NodeExecutor, NodeFuture, NodeId, NodeSpec, Router, END, START};
pub use interrupt::{interrupt, InterruptConfig, InterruptRecord};
pub use state::{
    AddMessagesReducer, AppendReducer, FnReducer, MergeReducer, OverwriteReducer, Reducer,
    StateError, StateSchema, SumReducer,
};
pub use store::{get_store, InMemoryStore, Item, Store, StoreError};
pub use subgraph::{invoke_subgraph, subgraph_handler};

pub use stategraph_checkpoint::{
    BreakpointWhen, Checkpoint, CheckpointConfig, CheckpointSaver, CheckpointSource,
    InMemoryCheckpointSaver, PendingInterrupt, PendingKind,
};
