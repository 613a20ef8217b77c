//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointSaver`] keeps every log in a `HashMap` behind an
//! `Arc<RwLock<..>>`. Records are stored encoded, exactly as a durable backend
//! would store them, so a record that cannot be decoded surfaces as
//! [`CheckpointError::Corruption`] the same way it would from a database.
//!
//! ```text
//! (thread_id, checkpoint_ns)
//!   ("session-1", "")          -> [rec step 1, rec step 2, rec step 3]
//!   ("session-1", "review")    -> [rec step 1, rec step 2]
//!   ("session-2", "")          -> [rec step 1]
//! ```
//!
//! Data is lost when the process exits.

use crate::checkpoint::{Checkpoint, CheckpointConfig};
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type LogKey = (String, String);

fn log_key(config: &CheckpointConfig) -> LogKey {
    (config.thread_id.clone(), config.checkpoint_ns.clone())
}

/// In-memory checkpoint saver
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: Arc<RwLock<HashMap<LogKey, Vec<Vec<u8>>>>>,
    serializer: JsonSerializer,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            serializer: JsonSerializer::new(),
        }
    }

    /// Get the number of threads being tracked
    pub async fn thread_count(&self) -> usize {
        let storage = self.storage.read().await;
        let mut threads: Vec<&String> = storage.keys().map(|(thread, _)| thread).collect();
        threads.sort();
        threads.dedup();
        threads.len()
    }

    /// Get the total number of checkpoints across all logs
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Namespaces that have a log for `thread_id`, sorted
    pub async fn namespaces(&self, thread_id: &str) -> Vec<String> {
        let storage = self.storage.read().await;
        let mut namespaces: Vec<String> = storage
            .keys()
            .filter(|(thread, _)| thread == thread_id)
            .map(|(_, ns)| ns.clone())
            .collect();
        namespaces.sort();
        namespaces
    }

    /// Append an already-encoded record without validation.
    ///
    /// Used when importing logs produced elsewhere.
    pub async fn append_raw(&self, config: &CheckpointConfig, record: Vec<u8>) {
        self.storage
            .write()
            .await
            .entry(log_key(config))
            .or_default()
            .push(record);
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn append(&self, config: &CheckpointConfig, checkpoint: Checkpoint) -> Result<()> {
        if checkpoint.thread_id != config.thread_id {
            return Err(CheckpointError::Invalid(format!(
                "checkpoint belongs to thread '{}', not '{}'",
                checkpoint.thread_id, config.thread_id
            )));
        }
        if checkpoint.checkpoint_ns != config.checkpoint_ns {
            return Err(CheckpointError::Invalid(format!(
                "checkpoint namespace '{}' does not match '{}'",
                checkpoint.checkpoint_ns, config.checkpoint_ns
            )));
        }

        let record = self.serializer.dumps(&checkpoint)?;
        let mut storage = self.storage.write().await;
        let log = storage.entry(log_key(config)).or_default();

        if let Some(last) = log.last() {
            let last = self.serializer.load_checkpoint(&config.thread_id, last)?;
            if checkpoint.step_seq <= last.step_seq {
                return Err(CheckpointError::Invalid(format!(
                    "step_seq {} does not follow {}",
                    checkpoint.step_seq, last.step_seq
                )));
            }
        }

        tracing::trace!(
            thread_id = %config.thread_id,
            checkpoint_ns = %config.checkpoint_ns,
            step_seq = checkpoint.step_seq,
            "Appended checkpoint"
        );
        log.push(record);
        Ok(())
    }

    async fn get_latest(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        match storage.get(&log_key(config)).and_then(|log| log.last()) {
            Some(record) => Ok(Some(
                self.serializer.load_checkpoint(&config.thread_id, record)?,
            )),
            None => Ok(None),
        }
    }

    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>> {
        let storage = self.storage.read().await;
        storage
            .get(&log_key(config))
            .map(|log| {
                log.iter()
                    .map(|record| self.serializer.load_checkpoint(&config.thread_id, record))
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
