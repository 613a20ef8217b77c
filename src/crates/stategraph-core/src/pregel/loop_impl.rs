//! The superstep loop
//!
//! One [`PregelLoop`] drives one run of one graph over one checkpoint log:
//!
//! ```text
//!   prepare ──► tick ──► tick ──► ... ──► Complete | Interrupted
//!                │
//!                ├─ halt on interrupt_before breakpoints
//!                ├─ run frontier concurrently on one snapshot
//!                ├─ merge completed updates in declaration order
//!                ├─ any node suspended? checkpoint pending, stop
//!                ├─ route to next frontier
//!                ├─ halt on interrupt_after breakpoints
//!                └─ checkpoint
//! ```
//!
//! Nothing is written when a step fails or times out, so the log always ends
//! with the last fully committed step.

use super::algo;
use crate::compiled::{CompiledGraph, Interrupted, Resume, StepEvent};
use crate::config::RunLimits;
use crate::error::{GraphError, Result};
use crate::graph::{NodeExecutor, NodeId};
use crate::interrupt::{InterruptRecord, NestedResume, NodeScope};
use crate::subgraph::nested_resume;
use futures::future::join_all;
use serde_json::Value;
use stategraph_checkpoint::{
    BreakpointWhen, Checkpoint, CheckpointConfig, CheckpointSaver, CheckpointSource,
    PendingInterrupt, PendingKind,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a run begins
#[derive(Debug, Clone)]
pub(crate) enum Start {
    /// New run from the entry node; input is merged into the thread's latest state
    Input(Value),
    /// New run from the entry node on exactly this state
    Fresh(Value),
    /// Continue from the latest checkpoint without answers
    Continue,
    /// Answer pending nodes of the latest checkpoint
    Resume(Resume),
}

/// What a pending node does in the first step after a restore
enum ResumeTask {
    Rerun {
        record: InterruptRecord,
        nested: Option<NestedResume>,
    },
    Hold(PendingInterrupt),
}

enum NodeOutcome {
    Completed(Value),
    Suspended(PendingInterrupt),
    Failed(GraphError),
}

pub(crate) struct PregelLoop {
    graph: CompiledGraph,
    saver: Arc<dyn CheckpointSaver>,
    config: CheckpointConfig,
    limits: RunLimits,
    state: Value,
    frontier: Vec<NodeId>,
    step_seq: u64,
    steps_run: usize,
    resumed: HashMap<NodeId, ResumeTask>,
    carried_completed: Vec<NodeId>,
    /// Nodes whose before-breakpoint was passed by the restore
    passed_breakpoints: HashSet<NodeId>,
}

impl PregelLoop {
    /// Load the latest checkpoint of `config` and set up the first step
    pub async fn prepare(
        graph: CompiledGraph,
        saver: Arc<dyn CheckpointSaver>,
        config: CheckpointConfig,
        limits: RunLimits,
        start: Start,
    ) -> Result<Self> {
        let latest = saver.get_latest(&config).await?;
        let mut pregel = Self {
            graph,
            saver,
            config,
            limits,
            state: Value::Object(Default::default()),
            frontier: Vec::new(),
            step_seq: latest.as_ref().map(|c| c.step_seq).unwrap_or(0),
            steps_run: 0,
            resumed: HashMap::new(),
            carried_completed: Vec::new(),
            passed_breakpoints: HashSet::new(),
        };

        match (start, latest) {
            (Start::Input(input), latest) => {
                let prior = latest.map(|c| {
                    if c.is_interrupted() {
                        debug!(pending = c.pending.len(), "Discarding stale pending entries");
                    }
                    c.state
                });
                pregel.start_run(prior, &input).await?;
            }
            (Start::Fresh(seed), _) => pregel.start_run(None, &seed).await?,
            (Start::Continue, Some(checkpoint)) => pregel.restore(checkpoint, BTreeMap::new(), true)?,
            (Start::Continue, None) => pregel.start_run(None, &Value::Null).await?,
            (Start::Resume(resume), Some(checkpoint)) if checkpoint.is_interrupted() => {
                let answers = resolve_answers(&checkpoint.pending, resume)?;
                pregel.restore(checkpoint, answers, false)?;
            }
            (Start::Resume(_), _) => {
                return Err(GraphError::InvalidResumeState(format!(
                    "thread '{}' has no pending interrupt",
                    pregel.config.thread_id
                )))
            }
        }
        Ok(pregel)
    }

    async fn start_run(&mut self, prior: Option<Value>, input: &Value) -> Result<()> {
        let mut state = prior.unwrap_or_else(|| Value::Object(Default::default()));
        self.graph.schema().apply(&mut state, input)?;

        let entry = self.graph.graph().entry().ok_or(GraphError::NoEntryPoint)?.to_string();
        let checkpoint = self
            .checkpoint(state, Vec::new(), Vec::new(), vec![entry.clone()])
            .with_source(CheckpointSource::Input);
        self.commit(checkpoint).await?;
        self.frontier = vec![entry];
        Ok(())
    }

    fn restore(
        &mut self,
        checkpoint: Checkpoint,
        answers: BTreeMap<NodeId, Value>,
        continue_all: bool,
    ) -> Result<()> {
        if let Some(unknown) = checkpoint
            .next
            .iter()
            .find(|id| !self.graph.graph().contains(id))
        {
            return Err(GraphError::CheckpointCorruption {
                thread_id: checkpoint.thread_id.clone(),
                reason: format!("frontier references unknown node '{}'", unknown),
            });
        }

        let mut carry_completed = false;
        for pending in checkpoint.pending {
            let answer = answers.get(&pending.node_id).cloned();
            let node_id = pending.node_id.clone();
            let kind = pending.kind.clone();
            let task = match kind {
                PendingKind::Breakpoint { when } => {
                    // An after-breakpoint was already honored when the node completed
                    if when == BreakpointWhen::Before {
                        self.passed_breakpoints.insert(node_id);
                    }
                    continue;
                }
                PendingKind::Interrupt => {
                    carry_completed = true;
                    match answer {
                        Some(value) => {
                            let mut record = InterruptRecord::from_pending(&pending);
                            record.push_answer(value);
                            ResumeTask::Rerun {
                                record,
                                nested: None,
                            }
                        }
                        None => ResumeTask::Hold(pending),
                    }
                }
                PendingKind::Subgraph { .. } => {
                    carry_completed = true;
                    if answer.is_some() || continue_all {
                        ResumeTask::Rerun {
                            record: InterruptRecord::from_pending(&pending),
                            nested: Some(NestedResume {
                                index: pending.call_index,
                                value: answer.map(|value| nested_resume(pending.nested(), value)),
                            }),
                        }
                    } else {
                        ResumeTask::Hold(pending)
                    }
                }
            };
            self.resumed.insert(node_id, task);
        }

        if carry_completed {
            self.carried_completed = checkpoint.completed_nodes;
        }
        self.state = checkpoint.state;
        self.step_seq = checkpoint.step_seq;
        self.frontier = checkpoint.next;
        Ok(())
    }

    /// Run one superstep.
    ///
    /// Returns `StepEvent::Step` while the run continues; `Complete` and
    /// `Interrupted` are terminal.
    pub async fn tick(&mut self) -> Result<StepEvent> {
        if self.frontier.is_empty() {
            info!(thread_id = %self.config.thread_id, step_seq = self.step_seq, "Run complete");
            return Ok(StepEvent::Complete {
                state: self.state.clone(),
            });
        }
        if self.steps_run >= self.limits.recursion_limit {
            return Err(GraphError::RecursionLimit(self.limits.recursion_limit));
        }

        let breakpoints = self.graph.interrupt_config();
        let halted: Vec<NodeId> = self
            .frontier
            .iter()
            .filter(|id| {
                breakpoints.should_interrupt_before(id)
                    && !self.passed_breakpoints.contains(*id)
                    && !self.resumed.contains_key(*id)
            })
            .cloned()
            .collect();
        if !halted.is_empty() {
            let pending = breakpoint_entries(&halted, BreakpointWhen::Before);
            let checkpoint = self.checkpoint(self.state.clone(), pending, Vec::new(), self.frontier.clone());
            return self.suspend(checkpoint).await;
        }
        self.passed_breakpoints.clear();

        debug!(
            thread_id = %self.config.thread_id,
            checkpoint_ns = %self.config.checkpoint_ns,
            step_seq = self.step_seq + 1,
            frontier = ?self.frontier,
            "Running superstep"
        );

        let mut suspended = Vec::new();
        let mut tasks = Vec::new();
        for id in &self.frontier {
            let (record, nested) = match self.resumed.remove(id) {
                Some(ResumeTask::Hold(pending)) => {
                    suspended.push(pending);
                    continue;
                }
                Some(ResumeTask::Rerun { record, nested }) => (record, nested),
                None => (InterruptRecord::new(id.clone()), None),
            };
            let handler = match self.graph.graph().node(id) {
                Some(node) => node.handler.clone(),
                None => return Err(GraphError::execution(format!("unknown node '{}'", id))),
            };
            let scope = Arc::new(NodeScope::new(
                self.config.clone(),
                Arc::clone(&self.saver),
                self.limits.clone(),
                self.graph.store().cloned(),
                record,
                nested,
            ));
            tasks.push(execute_node(id.clone(), handler, scope, self.state.clone()));
        }

        let joined = join_all(tasks);
        let mut results = match self.limits.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, joined).await.map_err(|_| {
                warn!(thread_id = %self.config.thread_id, "Superstep timed out; discarding its writes");
                GraphError::Timeout {
                    thread_id: self.config.thread_id.clone(),
                    elapsed: self.limits.timeout.unwrap_or_default(),
                }
            })?,
            None => joined.await,
        };

        let graph = self.graph.graph();
        results.sort_by_key(|(id, _)| graph.order_of(id));
        let mut writes = Vec::new();
        for (id, outcome) in results {
            match outcome {
                NodeOutcome::Completed(update) => writes.push((id, update)),
                NodeOutcome::Suspended(pending) => suspended.push(pending),
                NodeOutcome::Failed(err) => {
                    error!(node = %id, error = %err, "Node failed; last checkpoint kept");
                    return Err(err);
                }
            }
        }

        let mut state = self.state.clone();
        algo::apply_writes(self.graph.schema(), &mut state, &writes)?;

        let mut completed = std::mem::take(&mut self.carried_completed);
        completed.extend(writes.into_iter().map(|(id, _)| id));
        graph.sort_by_declaration(&mut completed);
        self.steps_run += 1;

        if !suspended.is_empty() {
            suspended.sort_by_key(|p| graph.order_of(&p.node_id));
            let next = suspended.iter().map(|p| p.node_id.clone()).collect();
            let checkpoint = self.checkpoint(state, suspended, completed, next);
            return self.suspend(checkpoint).await;
        }

        let next = algo::next_frontier(graph, &completed, &state)?;

        let after: Vec<NodeId> = completed
            .iter()
            .filter(|id| breakpoints.should_interrupt_after(id))
            .cloned()
            .collect();
        if !after.is_empty() {
            let pending = breakpoint_entries(&after, BreakpointWhen::After);
            let checkpoint = self.checkpoint(state, pending, completed, next);
            return self.suspend(checkpoint).await;
        }

        let checkpoint = self.checkpoint(state, Vec::new(), completed.clone(), next.clone());
        self.commit(checkpoint).await?;
        self.frontier = next;

        Ok(StepEvent::Step {
            step_seq: self.step_seq,
            completed,
            state: self.state.clone(),
        })
    }

    fn checkpoint(
        &self,
        state: Value,
        pending: Vec<PendingInterrupt>,
        completed: Vec<NodeId>,
        next: Vec<NodeId>,
    ) -> Checkpoint {
        Checkpoint::new(&self.config, self.step_seq + 1, state)
            .with_pending(pending)
            .with_completed_nodes(completed)
            .with_next(next)
    }

    async fn commit(&mut self, checkpoint: Checkpoint) -> Result<()> {
        let step_seq = checkpoint.step_seq;
        let state = checkpoint.state.clone();
        self.saver.append(&self.config, checkpoint).await?;
        debug!(
            thread_id = %self.config.thread_id,
            checkpoint_ns = %self.config.checkpoint_ns,
            step_seq,
            "Checkpoint written"
        );
        self.step_seq = step_seq;
        self.state = state;
        Ok(())
    }

    async fn suspend(&mut self, checkpoint: Checkpoint) -> Result<StepEvent> {
        let interrupted = Interrupted::from_checkpoint(&checkpoint);
        self.commit(checkpoint).await?;
        self.frontier.clear();
        info!(
            thread_id = %self.config.thread_id,
            checkpoint_ns = %self.config.checkpoint_ns,
            pending = ?interrupted.interrupts.iter().map(|i| i.node_id.as_str()).collect::<Vec<_>>(),
            "Run interrupted"
        );
        Ok(StepEvent::Interrupted(interrupted))
    }
}

fn breakpoint_entries(nodes: &[NodeId], when: BreakpointWhen) -> Vec<PendingInterrupt> {
    nodes
        .iter()
        .map(|id| {
            PendingInterrupt::new(id.clone(), 0, Value::Null)
                .with_kind(PendingKind::Breakpoint { when })
        })
        .collect()
}

/// Map a resume request onto `pending`.
///
/// Answers for nodes paused on a nested graph are checked against the nested
/// pending entries too, so an answer the nested run would reject fails here,
/// before anything executes.
fn resolve_answers(pending: &[PendingInterrupt], resume: Resume) -> Result<BTreeMap<NodeId, Value>> {
    let answers = match resume {
        Resume::Value(value) => {
            let answerable: Vec<&PendingInterrupt> = pending.iter().filter(|p| !p.is_breakpoint()).collect();
            match answerable.as_slice() {
                [] => BTreeMap::new(),
                [only] => BTreeMap::from([(only.node_id.clone(), value)]),
                many => {
                    return Err(GraphError::InvalidResumeState(format!(
                        "{} nodes are pending ({}); resume with a value per node",
                        many.len(),
                        many.iter().map(|p| p.node_id.as_str()).collect::<Vec<_>>().join(", ")
                    )))
                }
            }
        }
        Resume::ByNode(answers) => {
            if answers.is_empty() {
                return Err(GraphError::InvalidResumeState(
                    "resume map is empty".to_string(),
                ));
            }
            if let Some(unknown) = answers.keys().find(|id| !pending.iter().any(|p| &p.node_id == *id)) {
                return Err(GraphError::InvalidResumeState(format!(
                    "node '{}' is not pending",
                    unknown
                )));
            }
            answers
        }
    };

    for entry in pending {
        let nested = entry.nested();
        if nested.is_empty() {
            continue;
        }
        if let Some(answer) = answers.get(&entry.node_id) {
            resolve_answers(nested, nested_resume(nested, answer.clone())).map_err(|err| match err {
                GraphError::InvalidResumeState(reason) => {
                    GraphError::InvalidResumeState(format!("in nested graph of '{}': {}", entry.node_id, reason))
                }
                other => other,
            })?;
        }
    }
    Ok(answers)
}

async fn execute_node(
    node_id: NodeId,
    handler: NodeExecutor,
    scope: Arc<NodeScope>,
    input: Value,
) -> (NodeId, NodeOutcome) {
    debug!(node = %node_id, "Executing node");
    let result = scope.run(handler(input)).await;

    let outcome = match (result, scope.take_raised()) {
        (result, Some(pending)) => {
            if result.is_ok() {
                warn!(node = %node_id, "Handler returned after an unanswered interrupt; node stays pending");
            }
            NodeOutcome::Suspended(pending)
        }
        (Ok(update), None) => NodeOutcome::Completed(update),
        (Err(GraphError::Execution(message)), None) => NodeOutcome::Failed(GraphError::NodeExecution {
            node: node_id.clone(),
            error: message,
        }),
        (Err(err @ GraphError::Interrupt { .. }), None) => NodeOutcome::Failed(GraphError::NodeExecution {
            node: node_id.clone(),
            error: err.to_string(),
        }),
        (Err(err), None) => NodeOutcome::Failed(err),
    };
    (node_id, outcome)
}
