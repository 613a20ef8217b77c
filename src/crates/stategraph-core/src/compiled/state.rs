//! State inspection and editing

use super::{CompiledGraph, StateSnapshot};
use crate::error::Result;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use stategraph_checkpoint::{Checkpoint, CheckpointConfig, CheckpointSource, PendingKind};
use tracing::debug;

impl CompiledGraph {
    /// Latest snapshot of a thread.
    ///
    /// With `include_subgraphs`, every pending task that is waiting on a nested
    /// graph carries that graph's snapshot, recursively. A thread with no
    /// checkpoints yields an empty snapshot.
    pub async fn get_state(&self, thread_id: &str, include_subgraphs: bool) -> Result<StateSnapshot> {
        self.snapshot_at(CheckpointConfig::new(thread_id), include_subgraphs)
            .await
    }

    fn snapshot_at(
        &self,
        config: CheckpointConfig,
        include_subgraphs: bool,
    ) -> BoxFuture<'_, Result<StateSnapshot>> {
        async move {
            let Some(checkpoint) = self.checkpoint_saver.get_latest(&config).await? else {
                return Ok(StateSnapshot::empty(config));
            };
            let mut snapshot = StateSnapshot::from_checkpoint(&checkpoint);

            if include_subgraphs {
                for task in &mut snapshot.pending_tasks {
                    if let PendingKind::Subgraph { namespace, .. } = &task.kind {
                        let nested = CheckpointConfig::new(config.thread_id.as_str())
                            .with_checkpoint_ns(namespace.as_str());
                        task.state = Some(Box::new(self.snapshot_at(nested, true).await?));
                    }
                }
            }
            Ok(snapshot)
        }
        .boxed()
    }

    /// All snapshots of a thread, newest first
    pub async fn get_state_history(&self, thread_id: &str) -> Result<Vec<StateSnapshot>> {
        let log = self
            .checkpoint_saver
            .list(&CheckpointConfig::new(thread_id))
            .await?;
        Ok(log.iter().rev().map(StateSnapshot::from_checkpoint).collect())
    }

    /// Merge `values` into the latest state of a thread through the reducers.
    ///
    /// Pending entries and the next frontier are preserved, so a paused run can
    /// be edited and then resumed.
    pub async fn update_state(&self, thread_id: &str, values: Value) -> Result<StateSnapshot> {
        let config = CheckpointConfig::new(thread_id);
        let _guard = self.thread_locks.acquire(&config).await;

        let checkpoint = match self.checkpoint_saver.get_latest(&config).await? {
            Some(previous) => {
                let mut state = previous.state;
                self.schema.apply(&mut state, &values)?;
                Checkpoint::new(&config, previous.step_seq + 1, state)
                    .with_pending(previous.pending)
                    .with_completed_nodes(previous.completed_nodes)
                    .with_next(previous.next)
            }
            None => {
                let mut state = Value::Object(Default::default());
                self.schema.apply(&mut state, &values)?;
                Checkpoint::new(&config, 1, state)
            }
        }
        .with_source(CheckpointSource::Update);

        let snapshot = StateSnapshot::from_checkpoint(&checkpoint);
        self.checkpoint_saver.append(&config, checkpoint).await?;
        debug!(thread_id, step_seq = snapshot.step_seq, "State updated");
        Ok(snapshot)
    }
}
