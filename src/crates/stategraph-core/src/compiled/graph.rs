//! CompiledGraph struct and configuration

use crate::graph::Graph;
use crate::interrupt::InterruptConfig;
use crate::state::StateSchema;
use crate::store::Store;
use stategraph_checkpoint::{CheckpointConfig, CheckpointSaver, InMemoryCheckpointSaver};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Executable, immutable graph.
///
/// Cloning is cheap; clones share the topology, the checkpointer, the store
/// and the per-thread locks.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) graph: Arc<Graph>,
    pub(crate) schema: Arc<StateSchema>,
    pub(crate) interrupt_config: Arc<InterruptConfig>,
    pub(crate) checkpoint_saver: Arc<dyn CheckpointSaver>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) thread_locks: Arc<ThreadLocks>,
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph, schema: StateSchema, interrupt_config: InterruptConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            schema: Arc::new(schema),
            interrupt_config: Arc::new(interrupt_config),
            checkpoint_saver: Arc::new(InMemoryCheckpointSaver::new()),
            store: None,
            thread_locks: Arc::new(ThreadLocks::default()),
        }
    }

    /// Set the checkpoint saver.
    ///
    /// Without one, the graph keeps its log in a private in-memory saver.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpoint_saver = saver;
        self
    }

    pub fn get_checkpoint_saver(&self) -> &Arc<dyn CheckpointSaver> {
        &self.checkpoint_saver
    }

    /// Set the long-term store handlers reach through [`get_store`](crate::store::get_store).
    ///
    /// Unlike checkpoints, store items are not scoped to a thread. Nested graphs
    /// without a store of their own use this one.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn interrupt_config(&self) -> &InterruptConfig {
        &self.interrupt_config
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.graph.nodes().map(|n| n.id.as_str()).collect::<Vec<_>>())
            .field("entry", &self.graph.entry())
            .field("schema", &self.schema)
            .field("interrupt_config", &self.interrupt_config)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// One async mutex per checkpoint log, so a thread runs at most one call at a time.
///
/// An entry lives only while some call holds or waits for it.
#[derive(Default)]
pub(crate) struct ThreadLocks {
    locks: parking_lot::Mutex<HashMap<CheckpointConfig, Arc<AsyncMutex<()>>>>,
}

impl ThreadLocks {
    /// Wait until no other call holds `config`, then hold it until the guard drops
    pub async fn acquire(self: &Arc<Self>, config: &CheckpointConfig) -> ThreadGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(config.clone()).or_default())
        };
        ThreadGuard {
            guard: Some(lock.lock_owned().await),
            config: config.clone(),
            locks: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Held lock on one checkpoint log
pub(crate) struct ThreadGuard {
    guard: Option<OwnedMutexGuard<()>>,
    config: CheckpointConfig,
    locks: Arc<ThreadLocks>,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        // Waiters clone the entry under the map lock, so a count of one
        // after releasing means nobody else wants it
        let mut locks = self.locks.locks.lock();
        drop(self.guard.take());
        if locks.get(&self.config).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::config::RunConfig;
    use crate::graph::END;
    use serde_json::json;

    #[tokio::test]
    async fn test_released_lock_is_removed() {
        let locks = Arc::new(ThreadLocks::default());
        let config = CheckpointConfig::new("t1");

        let guard = locks.acquire(&config).await;
        assert_eq!(locks.len(), 1);
        drop(guard);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_lock_with_waiter_survives_release() {
        let locks = Arc::new(ThreadLocks::default());
        let config = CheckpointConfig::new("t1");

        let first = locks.acquire(&config).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            let config = config.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&config).await;
            })
        };
        while locks
            .locks
            .lock()
            .get(&config)
            .is_some_and(|lock| Arc::strong_count(lock) < 3)
        {
            tokio::task::yield_now().await;
        }

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_no_locks_remain_after_runs() {
        let mut graph = StateGraph::new();
        graph.add_node("work", |_| async { Ok(json!({ "done": true })) });
        graph.set_entry("work");
        graph.add_edge("work", END);
        let graph = graph.compile().unwrap();

        for thread in ["a", "b", "c"] {
            graph.invoke(json!({}), &RunConfig::new(thread)).await.unwrap();
        }
        graph.get_state("a", false).await.unwrap();
        graph.update_state("b", json!({ "done": false })).await.unwrap();
        assert_eq!(graph.thread_locks.len(), 0);
    }
}
