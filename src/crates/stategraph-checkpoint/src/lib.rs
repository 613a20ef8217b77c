//! # stategraph-checkpoint - Checkpoint Logs for Graph Execution
//!
//! Trait-based checkpoint abstractions and an in-memory implementation. The step
//! scheduler in `stategraph-core` writes a [`Checkpoint`] at the end of every
//! superstep and at every suspension; everything needed to resume a paused run
//! lives in that record.
//!
//! ## Core Concepts
//!
//! - [`CheckpointSaver`] - append-only log per `(thread_id, namespace)`:
//!   `append`, `get_latest`, `list`
//! - [`Checkpoint`] - state snapshot plus the nodes waiting for input
//! - [`PendingInterrupt`] - one waiting node, carrying its recorded answers
//! - [`CheckpointConfig`] - thread id plus nested namespace path
//! - [`InMemoryCheckpointSaver`] - reference backend for development and tests
//!
//! ## Quick Start
//!
//! ```rust
//! use stategraph_checkpoint::{Checkpoint, CheckpointConfig, CheckpointSaver, InMemoryCheckpointSaver};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! let config = CheckpointConfig::new("thread-123");
//!
//! saver.append(&config, Checkpoint::new(&config, 1, json!({"count": 1}))).await?;
//!
//! let latest = saver.get_latest(&config).await?.expect("written above");
//! assert_eq!(latest.state["count"], 1);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    BreakpointWhen, Checkpoint, CheckpointConfig, CheckpointSource, PendingInterrupt,
    PendingKind, NS_SEPARATOR,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::CheckpointSaver;
