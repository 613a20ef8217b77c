//! Interrupt controller: cooperative suspension inside node handlers
//!
//! Every node execution runs inside a [`NodeScope`] installed as a tokio task
//! local. [`interrupt`] looks the scope up, so handlers never pass a context
//! around:
//!
//! ```rust,no_run
//! use stategraph_core::{interrupt, Result};
//! use serde_json::{json, Value};
//!
//! async fn get_valid_age(_state: Value) -> Result<Value> {
//!     let mut prompt = "Please enter your age".to_string();
//!     loop {
//!         let answer = interrupt(json!(prompt))?;
//!         let text = answer.as_str().unwrap_or_default().to_string();
//!         match text.parse::<i64>() {
//!             Ok(age) if age >= 0 => return Ok(json!({ "age": age })),
//!             _ => prompt = format!("'{}' is not a valid age. Please enter a non-negative integer.", text),
//!         }
//!     }
//! }
//! ```
//!
//! # Replay
//!
//! Each handler execution has a call counter starting at 0. Call `k` returns the
//! k-th recorded answer if one exists. The first call without an answer records
//! a pending entry `{node_id, call_index: k, payload}` and returns
//! [`GraphError::Interrupt`], which `?` propagates out of the handler.
//!
//! Resuming appends the supplied value to the node's [`InterruptRecord`] and
//! restarts the handler from the top. Code before and between `interrupt` calls
//! runs again on every resume; only the answers are stable. Nested graph calls
//! that completed earlier in the episode are stable too: the record keeps their
//! results and the call returns them without running the nested graph again.

use crate::compiled::Resume;
use crate::config::RunLimits;
use crate::error::{GraphError, Result};
use crate::graph::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::store::Store;
use stategraph_checkpoint::{CheckpointConfig, CheckpointSaver, PendingInterrupt, PendingKind};
use std::collections::BTreeMap;
use std::sync::Arc;

tokio::task_local! {
    static NODE_SCOPE: Arc<NodeScope>;
}

/// Pause the current node and surface `payload` to the caller.
///
/// Returns the answer supplied on resume. Fails with
/// [`GraphError::InterruptOutsideNode`] when called outside a node handler.
pub fn interrupt(payload: impl Into<Value>) -> Result<Value> {
    let payload = payload.into();
    match NODE_SCOPE.try_with(|scope| scope.interrupt(payload)) {
        Ok(result) => result,
        Err(_) => Err(GraphError::InterruptOutsideNode),
    }
}

/// Static breakpoints around nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptConfig {
    /// Halt before a superstep that would run any of these nodes
    #[serde(default)]
    pub interrupt_before: Vec<NodeId>,

    /// Halt after a superstep in which any of these nodes completed
    #[serde(default)]
    pub interrupt_after: Vec<NodeId>,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.interrupt_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn should_interrupt_before(&self, node: &str) -> bool {
        self.interrupt_before.iter().any(|n| n == node)
    }

    pub fn should_interrupt_after(&self, node: &str) -> bool {
        self.interrupt_after.iter().any(|n| n == node)
    }

    pub fn is_empty(&self) -> bool {
        self.interrupt_before.is_empty() && self.interrupt_after.is_empty()
    }
}

/// Answers recorded for one node across the executions of a pending episode
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptRecord {
    pub node_id: NodeId,
    /// Execution number of the handler, starting at 1
    pub attempt: u32,
    pub resume_values: Vec<Value>,
    /// Results of nested graph calls that already completed, by call position
    pub completed_subgraphs: BTreeMap<usize, Value>,
}

impl InterruptRecord {
    /// Record for a node that has never been interrupted
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            attempt: 1,
            resume_values: Vec::new(),
            completed_subgraphs: BTreeMap::new(),
        }
    }

    /// Record for the next execution of a pending node
    pub fn from_pending(pending: &PendingInterrupt) -> Self {
        Self {
            node_id: pending.node_id.clone(),
            attempt: pending.attempt + 1,
            resume_values: pending.resume_values.clone(),
            completed_subgraphs: pending.completed_subgraphs.clone(),
        }
    }

    /// Answer for the call at `call_index`, if one was recorded
    pub fn next_answer(&self, call_index: usize) -> Option<&Value> {
        self.resume_values.get(call_index)
    }

    /// Pending entry for an unanswered call
    pub fn record_pending(&self, call_index: usize, payload: Value) -> PendingInterrupt {
        PendingInterrupt::new(self.node_id.clone(), call_index, payload)
            .with_resume_values(self.resume_values.clone())
            .with_attempt(self.attempt)
            .with_completed_subgraphs(self.completed_subgraphs.clone())
    }

    pub fn push_answer(&mut self, value: Value) {
        self.resume_values.push(value);
    }
}

/// Value forwarded to a nested graph that suspended during an earlier execution
#[derive(Debug, Clone)]
pub(crate) struct NestedResume {
    /// Which nested call within the handler suspended
    pub index: usize,
    /// `None` continues the nested run without an answer
    pub value: Option<Resume>,
}

/// How a nested-graph call of the current handler execution proceeds
#[derive(Debug)]
pub(crate) enum NestedCall {
    /// The call completed earlier in this pending episode; its result is reused
    Completed(Value),
    Run {
        index: usize,
        config: CheckpointConfig,
        resume: Option<NestedResume>,
    },
}

#[derive(Debug)]
struct Cursor {
    record: InterruptRecord,
    next_call: usize,
    subgraph_calls: usize,
    nested_resume: Option<NestedResume>,
    raised: Option<PendingInterrupt>,
}

/// Execution context of one node handler run
pub(crate) struct NodeScope {
    pub config: CheckpointConfig,
    pub saver: Arc<dyn CheckpointSaver>,
    pub limits: RunLimits,
    pub store: Option<Arc<dyn Store>>,
    cursor: Mutex<Cursor>,
}

impl NodeScope {
    pub fn new(
        config: CheckpointConfig,
        saver: Arc<dyn CheckpointSaver>,
        limits: RunLimits,
        store: Option<Arc<dyn Store>>,
        record: InterruptRecord,
        nested_resume: Option<NestedResume>,
    ) -> Self {
        Self {
            config,
            saver,
            limits,
            store,
            cursor: Mutex::new(Cursor {
                record,
                next_call: 0,
                subgraph_calls: 0,
                nested_resume,
                raised: None,
            }),
        }
    }

    /// Run `future` with this scope installed
    pub async fn run<F>(self: &Arc<Self>, future: F) -> F::Output
    where
        F: std::future::Future,
    {
        NODE_SCOPE.scope(Arc::clone(self), future).await
    }

    /// Scope of the node currently executing on this task
    pub fn current() -> Result<Arc<NodeScope>> {
        NODE_SCOPE
            .try_with(Arc::clone)
            .map_err(|_| GraphError::InterruptOutsideNode)
    }

    pub fn node_id(&self) -> NodeId {
        self.cursor.lock().record.node_id.clone()
    }

    fn interrupt(&self, payload: Value) -> Result<Value> {
        let mut cursor = self.cursor.lock();
        let call_index = cursor.next_call;
        cursor.next_call += 1;

        if let Some(answer) = cursor.record.next_answer(call_index) {
            tracing::debug!(
                node = %cursor.record.node_id,
                call_index,
                "Replaying recorded interrupt answer"
            );
            return Ok(answer.clone());
        }

        if cursor.raised.is_none() {
            let pending = cursor.record.record_pending(call_index, payload);
            cursor.raised = Some(pending);
        }
        Err(GraphError::Interrupt {
            node_id: cursor.record.node_id.clone(),
            call_index,
        })
    }

    /// Reserve the next nested-graph call of this handler execution.
    ///
    /// A call that completed earlier in the pending episode yields its recorded
    /// result. Otherwise returns the nested config and, if this call is the one
    /// that suspended earlier, the answer to forward into it.
    pub fn begin_subgraph(&self) -> NestedCall {
        let mut cursor = self.cursor.lock();
        let index = cursor.subgraph_calls;
        cursor.subgraph_calls += 1;

        if let Some(result) = cursor.record.completed_subgraphs.get(&index) {
            return NestedCall::Completed(result.clone());
        }

        let segment = if index == 0 {
            cursor.record.node_id.clone()
        } else {
            format!("{}:{}", cursor.record.node_id, index)
        };
        let resume = if cursor.nested_resume.as_ref().map(|n| n.index) == Some(index) {
            cursor.nested_resume.take()
        } else {
            None
        };
        NestedCall::Run {
            index,
            config: self.config.child(&segment),
            resume,
        }
    }

    /// Keep the result of the nested call at `index` for later executions
    pub fn complete_subgraph(&self, index: usize, result: Value) {
        self.cursor.lock().record.completed_subgraphs.insert(index, result);
    }

    /// Mark the node pending because the nested graph at `index` suspended.
    ///
    /// `nested` holds every pending entry of the nested run; the first one's
    /// payload becomes the payload of this node.
    pub fn suspend_for_subgraph(
        &self,
        index: usize,
        namespace: String,
        nested: Vec<PendingInterrupt>,
    ) -> GraphError {
        let mut cursor = self.cursor.lock();
        if cursor.raised.is_none() {
            let payload = nested.first().map(|p| p.payload.clone()).unwrap_or(Value::Null);
            let pending = cursor
                .record
                .record_pending(index, payload)
                .with_kind(PendingKind::Subgraph {
                    namespace,
                    pending: nested,
                });
            cursor.raised = Some(pending);
        }
        GraphError::Interrupt {
            node_id: cursor.record.node_id.clone(),
            call_index: index,
        }
    }

    /// Pending entry raised during this execution, if any
    pub fn take_raised(&self) -> Option<PendingInterrupt> {
        self.cursor.lock().raised.take()
    }
}
