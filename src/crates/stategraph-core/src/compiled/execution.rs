//! Execution methods: invoke and resume

use super::{CompiledGraph, EventStream, Resume, RunOutcome, StepEvent};
use crate::config::{RunConfig, RunLimits};
use crate::error::{GraphError, Result};
use crate::pregel::{PregelLoop, Start};
use futures::StreamExt;
use serde_json::Value;
use stategraph_checkpoint::{CheckpointConfig, CheckpointSaver};
use std::sync::Arc;
use tracing::info;

impl CompiledGraph {
    /// Run the graph on a thread.
    ///
    /// A non-null `input` starts a new run from the entry node, merged through
    /// the reducers into the thread's latest state (empty for a new thread).
    /// `Value::Null` continues from the latest checkpoint instead: breakpoints
    /// are passed, unanswered interrupts stay pending, and a step that failed
    /// earlier is retried.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stategraph_core::{RunConfig, RunOutcome, StateGraph, END};
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> stategraph_core::Result<()> {
    /// let mut graph = StateGraph::new();
    /// graph.add_node("greet", |state| async move {
    ///     let name = state["name"].as_str().unwrap_or("world").to_string();
    ///     Ok(json!({ "greeting": format!("hello {}", name) }))
    /// });
    /// graph.set_entry("greet");
    /// graph.add_edge("greet", END);
    ///
    /// let compiled = graph.compile()?;
    /// let outcome = compiled.invoke(json!({"name": "ada"}), &RunConfig::new("t1")).await?;
    /// assert_eq!(outcome, RunOutcome::Complete(json!({"name": "ada", "greeting": "hello ada"})));
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self, input, config), fields(thread_id = %config.thread_id))]
    pub async fn invoke(&self, input: Value, config: &RunConfig) -> Result<RunOutcome> {
        let start = if input.is_null() {
            Start::Continue
        } else {
            Start::Input(input)
        };
        info!(node_count = self.graph.nodes().count(), "Starting run");
        self.run_to_outcome(
            Arc::clone(&self.checkpoint_saver),
            CheckpointConfig::new(config.thread_id.as_str()),
            RunLimits::start(config),
            start,
        )
        .await
    }

    /// Answer the pending interrupt(s) of a thread and continue.
    ///
    /// Fails with `InvalidResumeState`, without touching the log, when the
    /// thread has nothing pending or the answer names a node that is not
    /// pending.
    #[tracing::instrument(skip(self, config, resume), fields(thread_id = %config.thread_id))]
    pub async fn resume(&self, config: &RunConfig, resume: impl Into<Resume>) -> Result<RunOutcome> {
        info!("Resuming run");
        self.run_to_outcome(
            Arc::clone(&self.checkpoint_saver),
            CheckpointConfig::new(config.thread_id.as_str()),
            RunLimits::start(config),
            Start::Resume(resume.into()),
        )
        .await
    }

    /// Lazily drive one run over `config`'s log, holding its lock while the
    /// stream is alive
    pub(crate) fn event_stream(
        &self,
        saver: Arc<dyn CheckpointSaver>,
        config: CheckpointConfig,
        limits: RunLimits,
        start: Start,
    ) -> EventStream {
        let graph = self.clone();
        Box::pin(async_stream::try_stream! {
            let _guard = graph.thread_locks.acquire(&config).await;
            let mut pregel = PregelLoop::prepare(graph.clone(), saver, config, limits, start).await?;
            loop {
                let event = pregel.tick().await?;
                let terminal = !matches!(event, StepEvent::Step { .. });
                yield event;
                if terminal {
                    break;
                }
            }
        })
    }

    pub(crate) async fn run_to_outcome(
        &self,
        saver: Arc<dyn CheckpointSaver>,
        config: CheckpointConfig,
        limits: RunLimits,
        start: Start,
    ) -> Result<RunOutcome> {
        let mut events = self.event_stream(saver, config, limits, start);
        while let Some(event) = events.next().await {
            match event? {
                StepEvent::Step { .. } => continue,
                StepEvent::Complete { state } => return Ok(RunOutcome::Complete(state)),
                StepEvent::Interrupted(interrupted) => return Ok(RunOutcome::Interrupted(interrupted)),
            }
        }
        Err(GraphError::execution("run ended without a final event"))
    }
}
