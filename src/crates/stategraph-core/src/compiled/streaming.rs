//! Streaming execution methods
//!
//! The stream is lazy: nothing runs until it is polled, and each poll advances
//! the run by at most one superstep. It yields one `StepEvent::Step` per
//! committed superstep and ends with `Complete` or `Interrupted`. An error
//! ends the stream after being yielded.

use super::{CompiledGraph, EventStream, Resume};
use crate::config::{RunConfig, RunLimits};
use crate::pregel::Start;
use serde_json::Value;
use stategraph_checkpoint::CheckpointConfig;
use std::sync::Arc;

impl CompiledGraph {
    /// Stream a run step by step.
    ///
    /// Same start semantics as [`invoke`](CompiledGraph::invoke).
    ///
    /// ```rust
    /// use futures::StreamExt;
    /// use stategraph_core::{RunConfig, StateGraph, StepEvent, END};
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> stategraph_core::Result<()> {
    /// let mut graph = StateGraph::new();
    /// graph.add_node("one", |_| async { Ok(json!({"n": 1})) });
    /// graph.add_node("two", |_| async { Ok(json!({"n": 2})) });
    /// graph.set_entry("one");
    /// graph.add_edge("one", "two");
    /// graph.add_edge("two", END);
    /// let compiled = graph.compile()?;
    ///
    /// let events: Vec<_> = compiled.stream(json!({}), &RunConfig::new("t1")).collect().await;
    /// assert_eq!(events.len(), 3);
    /// assert!(matches!(events[2], Ok(StepEvent::Complete { .. })));
    /// # Ok(())
    /// # }
    /// ```
    pub fn stream(&self, input: Value, config: &RunConfig) -> EventStream {
        let start = if input.is_null() {
            Start::Continue
        } else {
            Start::Input(input)
        };
        self.event_stream(
            Arc::clone(&self.checkpoint_saver),
            CheckpointConfig::new(config.thread_id.as_str()),
            RunLimits::start(config),
            start,
        )
    }

    /// Stream the continuation of a paused thread
    pub fn resume_stream(&self, config: &RunConfig, resume: impl Into<Resume>) -> EventStream {
        self.event_stream(
            Arc::clone(&self.checkpoint_saver),
            CheckpointConfig::new(config.thread_id.as_str()),
            RunLimits::start(config),
            Start::Resume(resume.into()),
        )
    }
}
