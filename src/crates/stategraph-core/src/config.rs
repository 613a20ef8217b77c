//! Per-run configuration
//!
//! ```yaml
//! thread_id: booking-42
//! recursion_limit: 50
//! timeout_ms: 30000
//! ```

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum number of supersteps per run
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}

/// Settings for one `invoke`, `stream` or `resume` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Thread whose checkpoint log the run reads and extends
    pub thread_id: String,

    /// Maximum supersteps before the run fails with `RecursionLimit`
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Deadline for the whole call, measured from its start
    #[serde(default, rename = "timeout_ms", with = "duration_ms", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl RunConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            timeout: None,
        }
    }

    pub fn with_recursion_limit(mut self, recursion_limit: usize) -> Self {
        self.recursion_limit = recursion_limit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Load from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| GraphError::Configuration(e.to_string()))?;
        if config.thread_id.is_empty() {
            return Err(GraphError::Configuration("thread_id must not be empty".to_string()));
        }
        Ok(config)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_u64(d.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Limits derived from a [`RunConfig`] when a call starts.
///
/// Nested graphs inherit the limits of the node that runs them, so a subgraph
/// shares its parent's deadline.
#[derive(Debug, Clone)]
pub(crate) struct RunLimits {
    pub recursion_limit: usize,
    pub timeout: Option<Duration>,
    pub deadline: Option<tokio::time::Instant>,
}

impl RunLimits {
    pub fn start(config: &RunConfig) -> Self {
        Self {
            recursion_limit: config.recursion_limit,
            timeout: config.timeout,
            deadline: config.timeout.map(|t| tokio::time::Instant::now() + t),
        }
    }
}
