//! Checkpoint record types
//!
//! A [`Checkpoint`] is one entry of a thread's append-only log. It is written at the
//! end of every superstep and at every suspension, and it is the only thing the
//! scheduler needs to continue a run later.
//!
//! # Record Shape
//!
//! ```text
//! {
//!   "thread_id": "t-1",
//!   "step_seq": 3,
//!   "state": { ... },
//!   "pending": [ { "node_id": "ask", "call_index": 0, "payload": "age?" } ],
//!   "completed_nodes": ["fetch"],
//!   ...optional fields, all defaulted when absent
//! }
//! ```
//!
//! The five leading fields are required. A stored record missing any of them is
//! reported as corrupt by the saver that tried to load it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Separator between segments of a nested checkpoint namespace.
pub const NS_SEPARATOR: char = '|';

/// Identifies one checkpoint log: a thread plus a namespace path.
///
/// The root graph of a thread uses the empty namespace. A subgraph running inside
/// node `review` of the root gets namespace `review`; one level further down it
/// becomes `review|inner`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub struct CheckpointConfig {
    /// Thread identifier
    pub thread_id: String,

    /// Namespace path, empty for the root graph
    #[serde(default)]
    pub checkpoint_ns: String,
}

impl CheckpointConfig {
    /// Config for the root namespace of a thread
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
        }
    }

    /// Set the namespace path
    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = checkpoint_ns.into();
        self
    }

    /// Config for a namespace nested one level below this one
    pub fn child(&self, segment: &str) -> Self {
        let checkpoint_ns = if self.checkpoint_ns.is_empty() {
            segment.to_string()
        } else {
            format!("{}{}{}", self.checkpoint_ns, NS_SEPARATOR, segment)
        };
        Self {
            thread_id: self.thread_id.clone(),
            checkpoint_ns,
        }
    }

    pub fn is_root(&self) -> bool {
        self.checkpoint_ns.is_empty()
    }

    /// Namespace segments, outermost first
    pub fn namespace_path(&self) -> Vec<&str> {
        if self.checkpoint_ns.is_empty() {
            Vec::new()
        } else {
            self.checkpoint_ns.split(NS_SEPARATOR).collect()
        }
    }
}

/// What produced a checkpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Seed state written when a run starts from new input
    Input,
    /// Written by the step loop
    #[default]
    Loop,
    /// Written by a manual state edit
    Update,
}

/// Which side of a node a static breakpoint sits on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointWhen {
    Before,
    After,
}

/// Why a node is pending
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingKind {
    /// The handler called `interrupt` and is waiting for an answer
    #[default]
    Interrupt,
    /// A static breakpoint fired around the node
    Breakpoint { when: BreakpointWhen },
    /// A nested graph run by the node suspended; its own log lives under `namespace`
    Subgraph {
        namespace: String,
        /// Pending entries of the nested run, one per nested pending node
        #[serde(default)]
        pending: Vec<PendingInterrupt>,
    },
}

/// A node waiting for outside input.
///
/// `resume_values` is the interrupt record for the node: the answers supplied so
/// far, in the order the handler asked for them. It is replayed positionally every
/// time the handler restarts and disappears with the entry once the node completes.
/// `completed_subgraphs` plays the same role for nested graph calls that finished
/// during the episode: their results are returned again instead of re-running them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingInterrupt {
    /// Node that is suspended
    pub node_id: String,

    /// Position of the unanswered call within the handler execution
    pub call_index: usize,

    /// Value surfaced to the caller
    pub payload: Value,

    #[serde(default)]
    pub kind: PendingKind,

    /// Answers recorded for earlier calls
    #[serde(default)]
    pub resume_values: Vec<Value>,

    /// Handler executions so far in this pending episode
    #[serde(default)]
    pub attempt: u32,

    /// Results of nested graph calls that completed, by call position
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub completed_subgraphs: BTreeMap<usize, Value>,
}

impl PendingInterrupt {
    pub fn new(node_id: impl Into<String>, call_index: usize, payload: Value) -> Self {
        Self {
            node_id: node_id.into(),
            call_index,
            payload,
            kind: PendingKind::Interrupt,
            resume_values: Vec::new(),
            attempt: 1,
            completed_subgraphs: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: PendingKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_resume_values(mut self, resume_values: Vec<Value>) -> Self {
        self.resume_values = resume_values;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_completed_subgraphs(mut self, completed: BTreeMap<usize, Value>) -> Self {
        self.completed_subgraphs = completed;
        self
    }

    /// Entries of a nested run this node is waiting on; empty for other kinds
    pub fn nested(&self) -> &[PendingInterrupt] {
        match &self.kind {
            PendingKind::Subgraph { pending, .. } => pending,
            _ => &[],
        }
    }

    pub fn is_breakpoint(&self) -> bool {
        matches!(self.kind, PendingKind::Breakpoint { .. })
    }
}

fn new_checkpoint_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One entry of a thread's checkpoint log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub thread_id: String,

    /// Strictly increasing within one (thread, namespace) log
    pub step_seq: u64,

    /// State after every completed merge of the step; never contains writes
    /// from a suspended node
    pub state: Value,

    pub pending: Vec<PendingInterrupt>,

    /// Nodes that completed in the step this checkpoint closes
    pub completed_nodes: Vec<String>,

    #[serde(default = "new_checkpoint_id")]
    pub id: String,

    #[serde(default)]
    pub checkpoint_ns: String,

    /// Frontier to run when execution continues from this checkpoint
    #[serde(default)]
    pub next: Vec<String>,

    #[serde(default)]
    pub source: CheckpointSource,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint with no pending entries
    pub fn new(config: &CheckpointConfig, step_seq: u64, state: Value) -> Self {
        Self {
            thread_id: config.thread_id.clone(),
            step_seq,
            state,
            pending: Vec::new(),
            completed_nodes: Vec::new(),
            id: new_checkpoint_id(),
            checkpoint_ns: config.checkpoint_ns.clone(),
            next: Vec::new(),
            source: CheckpointSource::Loop,
            created_at: Utc::now(),
        }
    }

    pub fn with_pending(mut self, pending: Vec<PendingInterrupt>) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_completed_nodes(mut self, completed_nodes: Vec<String>) -> Self {
        self.completed_nodes = completed_nodes;
        self
    }

    pub fn with_next(mut self, next: Vec<String>) -> Self {
        self.next = next;
        self
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = source;
        self
    }

    /// True when the run stopped at this checkpoint waiting for input
    pub fn is_interrupted(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Pending entry for a node, if any
    pub fn pending_for(&self, node_id: &str) -> Option<&PendingInterrupt> {
        self.pending.iter().find(|p| p.node_id == node_id)
    }

    /// Config addressing the log this checkpoint belongs to
    pub fn config(&self) -> CheckpointConfig {
        CheckpointConfig::new(self.thread_id.clone()).with_checkpoint_ns(self.checkpoint_ns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_namespace() {
        let root = CheckpointConfig::new("t1");
        assert!(root.is_root());

        let child = root.child("review");
        assert_eq!(child.checkpoint_ns, "review");
        let grandchild = child.child("inner:1");
        assert_eq!(grandchild.checkpoint_ns, "review|inner:1");
        assert_eq!(grandchild.namespace_path(), vec!["review", "inner:1"]);
        assert_eq!(grandchild.thread_id, "t1");
    }

    #[test]
    fn test_minimal_record_loads_with_defaults() {
        let raw = json!({
            "thread_id": "t1",
            "step_seq": 2,
            "state": {"x": 1},
            "pending": [{"node_id": "ask", "call_index": 0, "payload": "age?"}],
            "completed_nodes": []
        });

        let checkpoint: Checkpoint = serde_json::from_value(raw).unwrap();
        assert_eq!(checkpoint.step_seq, 2);
        assert!(checkpoint.is_interrupted());
        let pending = checkpoint.pending_for("ask").unwrap();
        assert_eq!(pending.kind, PendingKind::Interrupt);
        assert!(pending.resume_values.is_empty());
        assert!(checkpoint.next.is_empty());
        assert!(checkpoint.checkpoint_ns.is_empty());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let raw = json!({
            "thread_id": "t1",
            "step_seq": 2,
            "pending": [],
            "completed_nodes": []
        });

        assert!(serde_json::from_value::<Checkpoint>(raw).is_err());
    }

    #[test]
    fn test_pending_kind_serialization() {
        let pending = PendingInterrupt::new("sub", 0, json!("q")).with_kind(PendingKind::Subgraph {
            namespace: "sub".to_string(),
            pending: Vec::new(),
        });
        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(value["kind"], json!({"type": "subgraph", "namespace": "sub", "pending": []}));
        assert!(value.get("completed_subgraphs").is_none());

        let legacy: PendingKind =
            serde_json::from_value(json!({"type": "subgraph", "namespace": "sub"})).unwrap();
        assert!(matches!(legacy, PendingKind::Subgraph { ref pending, .. } if pending.is_empty()));

        let breakpoint = PendingKind::Breakpoint {
            when: BreakpointWhen::Before,
        };
        let value = serde_json::to_value(&breakpoint).unwrap();
        assert_eq!(value, json!({"type": "breakpoint", "when": "before"}));
    }

    #[test]
    fn test_nested_pending_and_completed_calls_survive_encoding() {
        let nested = vec![
            PendingInterrupt::new("left", 0, json!("left?")),
            PendingInterrupt::new("right", 0, json!("right?")),
        ];
        let pending = PendingInterrupt::new("outer", 1, json!("left?"))
            .with_kind(PendingKind::Subgraph {
                namespace: "outer:1".to_string(),
                pending: nested.clone(),
            })
            .with_completed_subgraphs(BTreeMap::from([(0, json!({"checked": true}))]));

        let decoded: PendingInterrupt =
            serde_json::from_value(serde_json::to_value(&pending).unwrap()).unwrap();
        assert_eq!(decoded.nested(), nested.as_slice());
        assert_eq!(decoded.completed_subgraphs.get(&0), Some(&json!({"checked": true})));
        assert!(PendingInterrupt::new("ask", 0, json!("q")).nested().is_empty());
    }
}
