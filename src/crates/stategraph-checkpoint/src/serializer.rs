//! Serialization protocol for checkpoint records

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

/// Protocol for serializing and deserializing checkpoint data
///
/// A storage backend stores whatever `dumps` produces and must hand the exact
/// bytes back to `loads`.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Decode a stored checkpoint record.
    ///
    /// Any decoding failure means the record no longer has the checkpoint shape,
    /// so it is reported as corruption of `thread_id` rather than a plain
    /// serialization error.
    fn load_checkpoint(&self, thread_id: &str, data: &[u8]) -> Result<Checkpoint> {
        self.loads(data).map_err(|e| CheckpointError::Corruption {
            thread_id: thread_id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointConfig, PendingInterrupt};
    use serde_json::json;

    #[test]
    fn test_checkpoint_record_round_trips() {
        let serializer = JsonSerializer::new();
        let config = CheckpointConfig::new("t1");
        let checkpoint = Checkpoint::new(&config, 4, json!({"messages": ["hi"], "count": 2}))
            .with_pending(vec![PendingInterrupt::new("ask", 1, json!({"question": "age?"}))
                .with_resume_values(vec![json!("not a number")])])
            .with_completed_nodes(vec!["fetch".to_string()])
            .with_next(vec!["ask".to_string()]);

        let bytes = serializer.dumps(&checkpoint).unwrap();
        let loaded = serializer.load_checkpoint("t1", &bytes).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_truncated_record_is_corruption() {
        let serializer = JsonSerializer::new();
        let bytes = serde_json::to_vec(&json!({"thread_id": "t1", "step_seq": 1})).unwrap();

        match serializer.load_checkpoint("t1", &bytes) {
            Err(CheckpointError::Corruption { thread_id, .. }) => assert_eq!(thread_id, "t1"),
            other => panic!("expected corruption, got {:?}", other),
        }
    }
}
