//! Type definitions for compiled graph execution

use crate::error::Result;
use crate::graph::NodeId;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stategraph_checkpoint::{Checkpoint, CheckpointConfig, PendingInterrupt, PendingKind};
use std::collections::BTreeMap;
use std::pin::Pin;

/// Result of `invoke` or `resume`
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Frontier became empty; carries the final state
    Complete(Value),
    /// At least one node is waiting for input
    Interrupted(Interrupted),
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Complete(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted(_))
    }

    /// State at the point the call returned
    pub fn state(&self) -> &Value {
        match self {
            RunOutcome::Complete(state) => state,
            RunOutcome::Interrupted(interrupted) => &interrupted.state,
        }
    }

    pub fn interrupted(&self) -> Option<&Interrupted> {
        match self {
            RunOutcome::Interrupted(interrupted) => Some(interrupted),
            RunOutcome::Complete(_) => None,
        }
    }

    /// Final state, or `None` if the run is paused
    pub fn into_final_state(self) -> Option<Value> {
        match self {
            RunOutcome::Complete(state) => Some(state),
            RunOutcome::Interrupted(_) => None,
        }
    }
}

/// A paused run
#[derive(Debug, Clone, PartialEq)]
pub struct Interrupted {
    /// Committed state; excludes every write of the suspended nodes
    pub state: Value,
    /// One entry per pending node, in declaration order
    pub interrupts: Vec<InterruptInfo>,
    pub step_seq: u64,
}

impl Interrupted {
    /// Payload of the first pending node
    pub fn payload(&self) -> Option<&Value> {
        self.interrupts.first().map(|i| &i.payload)
    }

    /// First pending node
    pub fn node_id(&self) -> Option<&str> {
        self.interrupts.first().map(|i| i.node_id.as_str())
    }

    /// Payload of every pending node, descending into nested graphs.
    ///
    /// A node paused on a nested graph contributes the payloads of all the
    /// nested pending nodes rather than its own copy of the first one.
    pub fn payloads(&self) -> Vec<&Value> {
        fn collect<'a>(pending: &'a PendingInterrupt, out: &mut Vec<&'a Value>) {
            match pending.nested() {
                [] => out.push(&pending.payload),
                nested => nested.iter().for_each(|p| collect(p, out)),
            }
        }

        let mut out = Vec::new();
        for info in &self.interrupts {
            match &info.kind {
                PendingKind::Subgraph { pending, .. } if !pending.is_empty() => {
                    pending.iter().for_each(|p| collect(p, &mut out))
                }
                _ => out.push(&info.payload),
            }
        }
        out
    }

    pub(crate) fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            state: checkpoint.state.clone(),
            interrupts: checkpoint.pending.iter().map(InterruptInfo::from).collect(),
            step_seq: checkpoint.step_seq,
        }
    }
}

/// What the caller sees for one pending node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptInfo {
    /// Pending node of the graph that was invoked
    pub node_id: NodeId,
    /// Value passed to `interrupt`, forwarded unchanged from nested graphs
    pub payload: Value,
    pub call_index: usize,
    pub kind: PendingKind,
}

impl InterruptInfo {
    /// Pending nodes of the nested run this node is waiting on
    pub fn nested(&self) -> Vec<InterruptInfo> {
        match &self.kind {
            PendingKind::Subgraph { pending, .. } => pending.iter().map(InterruptInfo::from).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&InterruptInfo> for PendingInterrupt {
    fn from(info: &InterruptInfo) -> Self {
        PendingInterrupt::new(info.node_id.clone(), info.call_index, info.payload.clone())
            .with_kind(info.kind.clone())
    }
}

impl From<&PendingInterrupt> for InterruptInfo {
    fn from(pending: &PendingInterrupt) -> Self {
        Self {
            node_id: pending.node_id.clone(),
            payload: pending.payload.clone(),
            call_index: pending.call_index,
            kind: pending.kind.clone(),
        }
    }
}

/// Answer(s) for a paused thread
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// Answer for the single pending node
    Value(Value),
    /// Answers keyed by pending node; omitted nodes stay paused.
    ///
    /// A node paused on a nested graph with several pending nodes takes an
    /// object keyed by nested node id.
    ByNode(BTreeMap<NodeId, Value>),
}

impl From<Value> for Resume {
    fn from(value: Value) -> Self {
        Resume::Value(value)
    }
}

impl From<&str> for Resume {
    fn from(value: &str) -> Self {
        Resume::Value(Value::from(value))
    }
}

impl From<BTreeMap<NodeId, Value>> for Resume {
    fn from(map: BTreeMap<NodeId, Value>) -> Self {
        Resume::ByNode(map)
    }
}

/// Pending node as reported by `get_state`
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTask {
    pub node_id: NodeId,
    pub call_index: usize,
    pub payload: Value,
    pub kind: PendingKind,
    /// Handler executions so far in this pending episode
    pub attempt: u32,
    /// Snapshot of the nested graph, for subgraph-pending nodes when requested
    pub state: Option<Box<StateSnapshot>>,
}

/// Point-in-time view of a thread
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub values: Value,
    /// Frontier that runs when execution continues; empty once complete
    pub next: Vec<NodeId>,
    pub step_seq: u64,
    pub pending_tasks: Vec<PendingTask>,
    pub config: CheckpointConfig,
    pub created_at: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    pub(crate) fn empty(config: CheckpointConfig) -> Self {
        Self {
            values: Value::Object(Default::default()),
            next: Vec::new(),
            step_seq: 0,
            pending_tasks: Vec::new(),
            config,
            created_at: None,
        }
    }

    pub(crate) fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            values: checkpoint.state.clone(),
            next: checkpoint.next.clone(),
            step_seq: checkpoint.step_seq,
            pending_tasks: checkpoint
                .pending
                .iter()
                .map(|p| PendingTask {
                    node_id: p.node_id.clone(),
                    call_index: p.call_index,
                    payload: p.payload.clone(),
                    kind: p.kind.clone(),
                    attempt: p.attempt,
                    state: None,
                })
                .collect(),
            config: checkpoint.config(),
            created_at: Some(checkpoint.created_at),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        !self.pending_tasks.is_empty()
    }
}

/// Event yielded by `stream`
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// A superstep completed and was checkpointed
    Step {
        step_seq: u64,
        completed: Vec<NodeId>,
        state: Value,
    },
    /// Run paused; last event of the stream
    Interrupted(Interrupted),
    /// Run finished; last event of the stream
    Complete { state: Value },
}

/// Stream of step events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StepEvent>> + Send>>;
