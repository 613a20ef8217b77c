//! Running a compiled graph from inside a node
//!
//! A nested run shares the parent's thread and checkpointer but writes to its
//! own log, addressed by a namespace derived from the calling node:
//!
//! ```text
//!   thread "t1", ns ""                  parent log
//!   thread "t1", ns "review"            first nested call made by node "review"
//!   thread "t1", ns "review:1"          second nested call made by node "review"
//!   thread "t1", ns "review|check"      a graph nested inside that one
//! ```
//!
//! When the nested run pauses, the calling node pauses too. Every pending entry
//! of the nested run is kept on the parent's pending entry, and the first
//! nested payload is surfaced unchanged as the parent's payload. Resuming the
//! parent re-executes the calling node; the nested call that paused picks up
//! from its own checkpoint instead of starting over, and receives the answer.
//! Nested calls that already completed return their recorded result.
//!
//! When the nested run has several pending nodes, answer the parent node with
//! an object keyed by nested node id:
//!
//! ```text
//!   resume({"outer": {"left": "L", "right": "R"}})
//! ```
//!
//! The nested graph sees only the keys its schema declares (everything, if it
//! declares none) and its result is the set of keys it changed.

use crate::compiled::{CompiledGraph, Resume, RunOutcome};
use crate::error::{GraphError, Result};
use crate::graph::NodeExecutor;
use crate::interrupt::{NestedCall, NodeScope};
use crate::pregel::Start;
use serde_json::{Map, Value};
use stategraph_checkpoint::PendingInterrupt;
use std::sync::Arc;
use tracing::debug;

/// Run `graph` as a nested graph of the node currently executing.
///
/// Returns the keys of the nested final state that differ from `input`.
/// Propagates a nested pause as a pause of the calling node, so use `?`.
///
/// ```rust,no_run
/// use stategraph_core::{invoke_subgraph, CompiledGraph, Result};
/// use serde_json::{json, Value};
///
/// async fn review(state: Value, checker: CompiledGraph) -> Result<Value> {
///     let checked = invoke_subgraph(&checker, &state).await?;
///     Ok(json!({ "verdict": checked["verdict"].clone() }))
/// }
/// ```
pub async fn invoke_subgraph(graph: &CompiledGraph, input: &Value) -> Result<Value> {
    let scope = NodeScope::current().map_err(|_| {
        GraphError::execution("invoke_subgraph must be called from inside a node handler")
    })?;
    let (index, config, nested) = match scope.begin_subgraph() {
        NestedCall::Completed(result) => {
            debug!(node = %scope.node_id(), "Reusing result of completed nested graph");
            return Ok(result);
        }
        NestedCall::Run { index, config, resume } => (index, config, resume),
    };
    let seed = graph.schema().slice(input);

    let start = match nested {
        Some(resume) => match resume.value {
            Some(value) => Start::Resume(value),
            None => Start::Continue,
        },
        None => Start::Fresh(seed.clone()),
    };
    debug!(
        node = %scope.node_id(),
        checkpoint_ns = %config.checkpoint_ns,
        ?start,
        "Running nested graph"
    );

    let graph = match (&scope.store, graph.store()) {
        (Some(store), None) => graph.clone().with_store(Arc::clone(store)),
        _ => graph.clone(),
    };
    let namespace = config.checkpoint_ns.clone();
    let outcome = graph
        .run_to_outcome(Arc::clone(&scope.saver), config, scope.limits.clone(), start)
        .await?;

    match outcome {
        RunOutcome::Complete(state) => {
            let result = changed_keys(&seed, &state);
            scope.complete_subgraph(index, result.clone());
            Ok(result)
        }
        RunOutcome::Interrupted(interrupted) => {
            let pending: Vec<PendingInterrupt> =
                interrupted.interrupts.iter().map(PendingInterrupt::from).collect();
            Err(scope.suspend_for_subgraph(index, namespace, pending))
        }
    }
}

/// Answer to forward into a nested run whose pending entries are `nested`.
///
/// With more than one answerable nested node, an object whose keys all name
/// nested pending nodes is split into per-node answers.
pub(crate) fn nested_resume(nested: &[PendingInterrupt], value: Value) -> Resume {
    let answerable = nested.iter().filter(|p| !p.is_breakpoint()).count();
    match value {
        Value::Object(map)
            if answerable > 1
                && !map.is_empty()
                && map.keys().all(|id| nested.iter().any(|p| &p.node_id == id)) =>
        {
            Resume::ByNode(map.into_iter().collect())
        }
        value => Resume::Value(value),
    }
}

/// Node handler whose whole body is `graph`
pub fn subgraph_handler(graph: CompiledGraph) -> NodeExecutor {
    let graph = Arc::new(graph);
    Arc::new(move |state| {
        let graph = Arc::clone(&graph);
        Box::pin(async move { invoke_subgraph(&graph, &state).await })
    })
}

fn changed_keys(before: &Value, after: &Value) -> Value {
    match after {
        Value::Object(after) => {
            let changed: Map<String, Value> = after
                .iter()
                .filter(|(key, value)| before.get(key.as_str()) != Some(*value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Value::Object(changed)
        }
        other => other.clone(),
    }
}
