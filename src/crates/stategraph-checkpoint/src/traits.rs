//! Storage trait for checkpoint backends
//!
//! The scheduler talks to persistence only through [`CheckpointSaver`]. A backend
//! (file, key-value store, relational table) implements three operations over
//! per-(thread, namespace) logs and must round-trip the [`Checkpoint`] record
//! shape exactly.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use stategraph_checkpoint::{Checkpoint, CheckpointConfig, CheckpointSaver, Result};
//!
//! struct SqlSaver { /* pool */ }
//!
//! #[async_trait]
//! impl CheckpointSaver for SqlSaver {
//!     async fn append(&self, config: &CheckpointConfig, checkpoint: Checkpoint) -> Result<()> {
//!         // INSERT INTO checkpoints (thread_id, ns, step_seq, record) ...
//!         todo!()
//!     }
//!
//!     async fn get_latest(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
//!         // SELECT ... ORDER BY step_seq DESC LIMIT 1
//!         todo!()
//!     }
//!
//!     async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>> {
//!         // SELECT ... ORDER BY step_seq ASC
//!         todo!()
//!     }
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointConfig};
use crate::error::Result;
use async_trait::async_trait;

/// Append-only checkpoint log, keyed by thread id and namespace path.
///
/// Logs for different threads are fully independent: an error reading one thread
/// must not affect any other.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a checkpoint to the log addressed by `config`.
    ///
    /// Implementations must reject a record whose `step_seq` is not greater than
    /// the latest one in the same log.
    async fn append(&self, config: &CheckpointConfig, checkpoint: Checkpoint) -> Result<()>;

    /// Latest checkpoint of the log, `None` if nothing was written yet
    async fn get_latest(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>>;

    /// Whole log in append order (oldest first)
    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>>;
}
