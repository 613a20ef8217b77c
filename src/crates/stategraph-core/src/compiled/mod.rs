//! CompiledGraph execution engine for running stateful workflows
//!
//! Once a [`StateGraph`](crate::StateGraph) is compiled it becomes a
//! [`CompiledGraph`]: immutable, cheap to clone, and runnable on any number of
//! threads. Each thread has its own checkpoint log; runs on different threads
//! never share state.
//!
//! # Execution Modes
//!
//! - [`invoke`](CompiledGraph::invoke) runs until the graph completes or pauses
//! - [`resume`](CompiledGraph::resume) answers a pause and continues
//! - [`stream`](CompiledGraph::stream) / [`resume_stream`](CompiledGraph::resume_stream)
//!   yield one [`StepEvent`] per superstep
//!
//! # Inspection
//!
//! - [`get_state`](CompiledGraph::get_state) returns the latest [`StateSnapshot`],
//!   optionally with the snapshots of paused nested graphs
//! - [`get_state_history`](CompiledGraph::get_state_history) lists every snapshot
//! - [`update_state`](CompiledGraph::update_state) edits a paused thread

mod execution;
mod graph;
mod state;
mod streaming;
mod types;

pub use graph::CompiledGraph;
pub use types::{
    EventStream, InterruptInfo, Interrupted, PendingTask, Resume, RunOutcome, StateSnapshot,
    StepEvent,
};
