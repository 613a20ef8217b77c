//! State schema and reducers
//!
//! Node handlers return a **partial update**: a JSON object containing only the
//! keys they change. The [`StateSchema`] decides how each key is merged into the
//! shared state:
//!
//! ```text
//! state[k] = reducer[k](state.get(k), update[k])    for every k in update
//! ```
//!
//! Keys without an explicit reducer use the schema's default reducer, which is
//! replace-with-new unless configured otherwise. A strict schema without a default
//! reducer rejects unknown keys with [`StateError::ReducerMismatch`].
//!
//! # Example
//!
//! ```rust
//! use stategraph_core::state::{AppendReducer, StateSchema, SumReducer};
//! use serde_json::json;
//!
//! let schema = StateSchema::new()
//!     .with_reducer("messages", AppendReducer)
//!     .with_reducer("count", SumReducer);
//!
//! let mut state = json!({"messages": ["hi"], "count": 1, "mood": "ok"});
//! schema.apply(&mut state, &json!({"messages": ["hello"], "count": 2, "mood": "great"})).unwrap();
//!
//! assert_eq!(state, json!({"messages": ["hi", "hello"], "count": 3, "mood": "great"}));
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while merging updates into state
#[derive(Debug, Error)]
pub enum StateError {
    /// State or update is not a JSON object
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer encountered incompatible types
    #[error("Reducer error on '{key}': {message}")]
    ReducerError { key: String, message: String },

    /// Strict schema has no reducer for the key
    #[error("No reducer for key '{0}'")]
    ReducerMismatch(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Combines the current value of one state key with an incoming update
pub trait Reducer: Send + Sync {
    /// Merge `update` into `current`.
    ///
    /// `current` is `Value::Null` when the key is not yet present.
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String>;

    fn name(&self) -> &str;
}

/// Replace the old value with the new one
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Append to an ordered sequence.
///
/// Arrays are concatenated and scalars are pushed, so two nodes writing the
/// same key in one step produce their elements in merge order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut items = match current {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            other => return Err(format!("cannot append to non-array value {}", other)),
        };
        match update {
            Value::Array(more) => items.extend(more.iter().cloned()),
            single => items.push(single.clone()),
        }
        Ok(Value::Array(items))
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Add numbers; integers stay integers
#[derive(Debug, Clone, Copy, Default)]
pub struct SumReducer;

impl Reducer for SumReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        if current.is_null() {
            return Ok(update.clone());
        }
        if let (Some(a), Some(b)) = (current.as_i64(), update.as_i64()) {
            return Ok(Value::from(a + b));
        }
        match (current.as_f64(), update.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::from(a + b)),
            _ => Err(format!("cannot add {} and {}", current, update)),
        }
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// Shallow merge of objects, update keys win
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        match (current, update) {
            (Value::Null, Value::Object(_)) => Ok(update.clone()),
            (Value::Object(base), Value::Object(patch)) => {
                let mut merged = base.clone();
                for (k, v) in patch {
                    merged.insert(k.clone(), v.clone());
                }
                Ok(Value::Object(merged))
            }
            _ => Err("merge requires object values".to_string()),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Message-list reducer.
///
/// Appends messages like [`AppendReducer`], except that an incoming message whose
/// `id` matches an existing one replaces it in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddMessagesReducer;

impl Reducer for AddMessagesReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut messages = match current {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            other => return Err(format!("messages must be an array, got {}", other)),
        };
        let incoming = match update {
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        };

        for message in incoming {
            let existing = message
                .get("id")
                .filter(|id| !id.is_null())
                .and_then(|id| messages.iter().position(|m| m.get("id") == Some(id)));
            match existing {
                Some(pos) => messages[pos] = message,
                None => messages.push(message),
            }
        }
        Ok(Value::Array(messages))
    }

    fn name(&self) -> &str {
        "add_messages"
    }
}

/// Reducer backed by a closure
pub struct FnReducer<F> {
    name: String,
    func: F,
}

impl<F> FnReducer<F>
where
    F: Fn(&Value, &Value) -> Value + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Reducer for FnReducer<F>
where
    F: Fn(&Value, &Value) -> Value + Send + Sync,
{
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok((self.func)(current, update))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Per-key reducer registry for one graph's state
#[derive(Clone, Default)]
pub struct StateSchema {
    reducers: BTreeMap<String, Arc<dyn Reducer>>,
    default_reducer: Option<Arc<dyn Reducer>>,
    strict: bool,
}

impl StateSchema {
    /// Non-strict schema: unknown keys are replaced
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict schema: unknown keys are an error unless a default reducer is set
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Register a reducer for `key`
    pub fn with_reducer(mut self, key: impl Into<String>, reducer: impl Reducer + 'static) -> Self {
        self.reducers.insert(key.into(), Arc::new(reducer));
        self
    }

    /// Declare `key` with replace semantics
    pub fn with_field(self, key: impl Into<String>) -> Self {
        self.with_reducer(key, OverwriteReducer)
    }

    /// Reducer for keys that have none registered
    pub fn with_default_reducer(mut self, reducer: impl Reducer + 'static) -> Self {
        self.default_reducer = Some(Arc::new(reducer));
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Declared keys, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }

    fn reducer_for(&self, key: &str) -> Result<Option<&Arc<dyn Reducer>>> {
        match self.reducers.get(key).or(self.default_reducer.as_ref()) {
            Some(reducer) => Ok(Some(reducer)),
            None if self.strict => Err(StateError::ReducerMismatch(key.to_string())),
            None => Ok(None),
        }
    }

    /// Merge a partial update into `state`.
    ///
    /// A `null` update is a no-op. On error `state` is left unchanged.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let patch = match update {
            Value::Null => return Ok(()),
            Value::Object(patch) => patch,
            other => {
                return Err(StateError::InvalidState(format!(
                    "update must be an object, got {}",
                    other
                )))
            }
        };

        let mut merged = match state {
            Value::Null => Map::new(),
            Value::Object(current) => current.clone(),
            other => {
                return Err(StateError::InvalidState(format!(
                    "state must be an object, got {}",
                    other
                )))
            }
        };

        for (key, value) in patch {
            let next = match self.reducer_for(key)? {
                Some(reducer) => {
                    let current = merged.get(key).unwrap_or(&Value::Null);
                    reducer
                        .reduce(current, value)
                        .map_err(|message| StateError::ReducerError {
                            key: key.clone(),
                            message,
                        })?
                }
                None => value.clone(),
            };
            merged.insert(key.clone(), next);
        }

        *state = Value::Object(merged);
        Ok(())
    }

    /// Restrict `state` to the declared keys.
    ///
    /// A schema that declares no keys passes everything through.
    pub fn slice(&self, state: &Value) -> Value {
        match state {
            Value::Object(map) if !self.reducers.is_empty() => Value::Object(
                map.iter()
                    .filter(|(k, _)| self.reducers.contains_key(k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reducers: BTreeMap<&str, &str> = self
            .reducers
            .iter()
            .map(|(k, r)| (k.as_str(), r.name()))
            .collect();
        f.debug_struct("StateSchema")
            .field("reducers", &reducers)
            .field("default_reducer", &self.default_reducer.as_ref().map(|r| r.name()))
            .field("strict", &self.strict)
            .finish()
    }
}
