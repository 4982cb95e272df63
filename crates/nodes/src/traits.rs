//! The `ExecutableNode` trait — the contract every task operator must fulfil.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::NodeError;

/// Per-attempt context handed to a node.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Name of the graph the task belongs to.
    pub graph: String,
    /// ID of the current workflow run.
    pub run_id: Uuid,
    /// ID of the task inside its graph.
    pub task_id: String,
    /// Logical (scheduled or trigger) date of the run.
    pub logical_date: DateTime<Utc>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Task configuration from the graph definition.
    pub config: Value,
}

impl ExecutionContext {
    /// Decode the task configuration, falling back to `T::default()` when
    /// the task was declared without one.
    pub fn config_as<T: DeserializeOwned + Default>(&self) -> Result<T, NodeError> {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.config.clone()).map_err(|e| {
            NodeError::Fatal(format!("invalid config for task '{}': {e}", self.task_id))
        })
    }
}

/// The core node trait.
///
/// Implementations must be stateless across calls: the engine may invoke the
/// same node several times for retries and from concurrently running graphs.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node. `input` is the staged output of the declared
    /// upstream task (a JSON array when several are declared, the run
    /// `conf` for root tasks). Returns this node's JSON output.
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Cfg {
        #[serde(default)]
        limit: usize,
    }

    fn ctx(config: Value) -> ExecutionContext {
        ExecutionContext {
            graph: "g".into(),
            run_id: Uuid::new_v4(),
            task_id: "t".into(),
            logical_date: Utc::now(),
            attempt: 1,
            config,
        }
    }

    #[test]
    fn null_config_yields_default() {
        let cfg: Cfg = ctx(Value::Null).config_as().unwrap();
        assert_eq!(cfg, Cfg::default());
    }

    #[test]
    fn malformed_config_is_fatal() {
        let err = ctx(serde_json::json!({ "limit": "many" }))
            .config_as::<Cfg>()
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(msg) if msg.contains("task 't'")));
    }
}
