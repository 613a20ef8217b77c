//! Long-term memory shared across threads
//!
//! Checkpoints belong to one thread. A [`Store`] holds items that outlive any
//! thread, such as facts a user mentioned in earlier conversations. Items sit
//! under hierarchical namespaces and are addressed by a key within one:
//!
//! ```text
//!   ["user-1", "memories"]   key "m-0"   {"food_preference": "I like pizza"}
//!   ["user-1", "memories"]   key "m-1"   {"city": "Lyon"}
//!   ["user-2", "memories"]   key "m-0"   {"food_preference": "sushi"}
//! ```
//!
//! Attach a store with [`CompiledGraph::with_store`](crate::CompiledGraph::with_store)
//! and reach it from a handler with [`get_store`]:
//!
//! ```rust,no_run
//! use stategraph_core::store::get_store;
//! use stategraph_core::{GraphError, Result};
//! use serde_json::{json, Value};
//!
//! async fn recall(state: Value) -> Result<Value> {
//!     let store = get_store().ok_or_else(|| GraphError::execution("no store attached"))?;
//!     let user = state["user_id"].as_str().unwrap_or("anonymous");
//!     let memories = store.search(&[user, "memories"], None, None).await?;
//!     let values: Vec<Value> = memories.into_iter().map(|item| item.value).collect();
//!     Ok(json!({ "memories": values }))
//! }
//! ```
//!
//! Store writes are not part of the checkpoint log: a handler that writes and
//! then pauses writes again when it re-executes, so use stable keys.

use crate::interrupt::NodeScope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Namespaces need at least one segment and no empty segments
    #[error("Invalid namespace {0:?}")]
    InvalidNamespace(Vec<String>),

    /// Failure reported by a storage backend
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// One stored value with its address and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Namespaced key-value storage shared by every thread of a graph
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the value at `key` in `namespace`
    async fn put(&self, namespace: &[&str], key: &str, value: Value) -> Result<()>;

    async fn get(&self, namespace: &[&str], key: &str) -> Result<Option<Item>>;

    /// Items whose namespace starts with `prefix`.
    ///
    /// `filter` is an object; an item matches when each of its fields equals
    /// the same field of the item's value. Namespaces come out in sorted order
    /// and items within one in insertion order.
    async fn search(
        &self,
        prefix: &[&str],
        filter: Option<&Value>,
        limit: Option<usize>,
    ) -> Result<Vec<Item>>;

    /// Returns true if the item existed
    async fn delete(&self, namespace: &[&str], key: &str) -> Result<bool>;

    /// Namespaces holding at least one item under `prefix`, sorted
    async fn list_namespaces(&self, prefix: &[&str]) -> Result<Vec<Vec<String>>>;
}

/// Store of the graph running the current node, if one is attached
pub fn get_store() -> Option<Arc<dyn Store>> {
    NodeScope::current().ok().and_then(|scope| scope.store.clone())
}

/// Process-local store for development and tests
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<BTreeMap<Vec<String>, Vec<Item>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items across all namespaces
    pub fn len(&self) -> usize {
        self.data.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn namespace_of(segments: &[&str]) -> Result<Vec<String>> {
    let namespace: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
    if namespace.is_empty() || namespace.iter().any(String::is_empty) {
        return Err(StoreError::InvalidNamespace(namespace));
    }
    Ok(namespace)
}

fn has_prefix(namespace: &[String], prefix: &[&str]) -> bool {
    namespace.len() >= prefix.len() && namespace.iter().zip(prefix).all(|(a, b)| a == b)
}

fn matches_filter(value: &Value, filter: Option<&Value>) -> bool {
    match filter {
        Some(Value::Object(fields)) => fields.iter().all(|(k, v)| value.get(k) == Some(v)),
        _ => true,
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, namespace: &[&str], key: &str, value: Value) -> Result<()> {
        let namespace = namespace_of(namespace)?;
        let now = Utc::now();
        let mut data = self.data.write();
        let items = data.entry(namespace.clone()).or_default();
        match items.iter_mut().find(|item| item.key == key) {
            Some(item) => {
                item.value = value;
                item.updated_at = now;
            }
            None => items.push(Item {
                namespace,
                key: key.to_string(),
                value,
                created_at: now,
                updated_at: now,
            }),
        }
        Ok(())
    }

    async fn get(&self, namespace: &[&str], key: &str) -> Result<Option<Item>> {
        let namespace = namespace_of(namespace)?;
        let data = self.data.read();
        Ok(data
            .get(&namespace)
            .and_then(|items| items.iter().find(|item| item.key == key))
            .cloned())
    }

    async fn search(
        &self,
        prefix: &[&str],
        filter: Option<&Value>,
        limit: Option<usize>,
    ) -> Result<Vec<Item>> {
        let data = self.data.read();
        let found = data
            .iter()
            .filter(|(namespace, _)| has_prefix(namespace, prefix))
            .flat_map(|(_, items)| items.iter())
            .filter(|item| matches_filter(&item.value, filter))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(found)
    }

    async fn delete(&self, namespace: &[&str], key: &str) -> Result<bool> {
        let namespace = namespace_of(namespace)?;
        let mut data = self.data.write();
        let Some(items) = data.get_mut(&namespace) else {
            return Ok(false);
        };
        let before = items.len();
        items.retain(|item| item.key != key);
        let removed = items.len() < before;
        if items.is_empty() {
            data.remove(&namespace);
        }
        Ok(removed)
    }

    async fn list_namespaces(&self, prefix: &[&str]) -> Result<Vec<Vec<String>>> {
        let data = self.data.read();
        Ok(data
            .keys()
            .filter(|namespace| has_prefix(namespace, prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get() {
        let store = InMemoryStore::new();
        store
            .put(&["1", "memories"], "m-0", json!({"food_preference": "I like pizza"}))
            .await
            .unwrap();

        let item = store.get(&["1", "memories"], "m-0").await.unwrap().unwrap();
        assert_eq!(item.namespace, vec!["1", "memories"]);
        assert_eq!(item.value["food_preference"], json!("I like pizza"));
        assert!(store.get(&["2", "memories"], "m-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_in_place() {
        let store = InMemoryStore::new();
        store.put(&["u"], "a", json!(1)).await.unwrap();
        store.put(&["u"], "b", json!(2)).await.unwrap();
        store.put(&["u"], "a", json!(3)).await.unwrap();

        let items = store.search(&["u"], None, None).await.unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(items[0].value, json!(3));
        assert!(items[0].updated_at >= items[0].created_at);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_search_by_namespace_prefix() {
        let store = InMemoryStore::new();
        store.put(&["1", "memories"], "m-0", json!({"kind": "food"})).await.unwrap();
        store.put(&["1", "memories"], "m-1", json!({"kind": "city"})).await.unwrap();
        store.put(&["1", "settings"], "theme", json!({"kind": "ui"})).await.unwrap();
        store.put(&["2", "memories"], "m-0", json!({"kind": "food"})).await.unwrap();

        assert_eq!(store.search(&["1", "memories"], None, None).await.unwrap().len(), 2);
        assert_eq!(store.search(&["1"], None, None).await.unwrap().len(), 3);
        assert_eq!(store.search(&[], None, None).await.unwrap().len(), 4);
        assert_eq!(store.search(&["1"], None, Some(1)).await.unwrap().len(), 1);

        let food = store.search(&[], Some(&json!({"kind": "food"})), None).await.unwrap();
        let owners: Vec<&str> = food.iter().map(|i| i.namespace[0].as_str()).collect();
        assert_eq!(owners, vec!["1", "2"]);

        assert_eq!(
            store.list_namespaces(&["1"]).await.unwrap(),
            vec![vec!["1".to_string(), "memories".to_string()], vec!["1".to_string(), "settings".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.put(&["1", "memories"], "m-0", json!("x")).await.unwrap();

        assert!(store.delete(&["1", "memories"], "m-0").await.unwrap());
        assert!(!store.delete(&["1", "memories"], "m-0").await.unwrap());
        assert!(store.is_empty());
        assert!(store.list_namespaces(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_namespace() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.put(&[], "k", json!(1)).await,
            Err(StoreError::InvalidNamespace(_))
        ));
        assert!(matches!(
            store.get(&["1", ""], "k").await,
            Err(StoreError::InvalidNamespace(_))
        ));
    }

    #[test]
    fn test_no_store_outside_node() {
        assert!(get_store().is_none());
    }
}
