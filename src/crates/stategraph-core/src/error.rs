//! Error types for graph construction and execution
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── DuplicateNodeId / UnknownEdgeTarget / NoEntryPoint   - compile time
//! ├── RouterReturnedInvalidLabel / ReducerMismatch          - runtime structural
//! ├── InvalidResumeState / InterruptOutsideNode             - resume protocol
//! ├── CheckpointCorruption / Checkpoint / Store             - storage
//! ├── NodeExecution / Execution                             - handler failures
//! ├── Timeout / RecursionLimit                              - run limits
//! ├── Serialization / Configuration / State
//! └── Interrupt                                             - suspension signal
//! ```
//!
//! `Interrupt` is not a failure. It is what [`interrupt`](crate::interrupt::interrupt)
//! returns when a handler must pause, so that `?` unwinds the handler back to the
//! scheduler. Handlers should propagate it untouched:
//!
//! ```rust,no_run
//! use stategraph_core::{interrupt, Result};
//! use serde_json::{json, Value};
//!
//! async fn ask_name(_state: Value) -> Result<Value> {
//!     let name = interrupt(json!("What is your name?"))?;
//!     Ok(json!({ "name": name }))
//! }
//! ```
//!
//! Compile-time errors are all raised by `StateGraph::compile`, before any
//! execution. Handler failures leave the last committed checkpoint intact, so
//! invoking the thread again with `Value::Null` retries the failed step.

use crate::state::StateError;
use crate::store::StoreError;
use stategraph_checkpoint::CheckpointError;
use std::time::Duration;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Two nodes share an id, or a node uses a reserved sentinel id
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    /// An edge or branch mapping points at a node that was never declared
    #[error("Edge from '{from}' references unknown node '{to}'")]
    UnknownEdgeTarget { from: String, to: String },

    #[error("Graph has no entry point")]
    NoEntryPoint,

    /// A router produced a label outside its declared mapping
    #[error("Router on '{node}' returned undeclared label '{label}'")]
    RouterReturnedInvalidLabel { node: String, label: String },

    /// Strict schema received a key without a reducer
    #[error("No reducer registered for state key '{key}'")]
    ReducerMismatch { key: String },

    /// Resume target does not match the pending nodes of the thread
    #[error("Invalid resume: {0}")]
    InvalidResumeState(String),

    #[error("interrupt called outside an active node execution")]
    InterruptOutsideNode,

    /// A persisted record for the thread could not be decoded
    #[error("Corrupt checkpoint for thread '{thread_id}': {reason}")]
    CheckpointCorruption { thread_id: String, reason: String },

    /// Node handler failed
    #[error("Node '{node}' failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Handler-level failure message, attributed to its node by the scheduler
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Run on thread '{thread_id}' timed out after {elapsed:?}")]
    Timeout { thread_id: String, elapsed: Duration },

    #[error("Recursion limit of {0} supersteps reached without completing")]
    RecursionLimit(usize),

    /// Storage backend failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    /// Long-term store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("State error: {0}")]
    State(StateError),

    /// Suspension signal produced by `interrupt`
    #[error("Node '{node_id}' suspended at interrupt call {call_index}")]
    Interrupt { node_id: String, call_index: usize },
}

impl GraphError {
    /// Shorthand for a handler failure with a message
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// True for the suspension signal returned by `interrupt`
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt { .. })
    }
}

impl From<CheckpointError> for GraphError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Corruption { thread_id, reason } => {
                Self::CheckpointCorruption { thread_id, reason }
            }
            other => Self::Checkpoint(other),
        }
    }
}

impl From<StateError> for GraphError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::ReducerMismatch(key) => Self::ReducerMismatch { key },
            other => Self::State(other),
        }
    }
}
