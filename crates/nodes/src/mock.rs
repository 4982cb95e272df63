//! `MockNode` — a test double for `ExecutableNode`.
//!
//! Used by the engine's scenario tests where real operators are irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecutableNode, ExecutionContext, NodeError};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with `Retryable` for the first `failures` calls, then return.
    Flaky { failures: usize, value: Value },
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
#[derive(Clone)]
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    behaviour: Arc<MockBehaviour>,
    delay: Duration,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour: Arc::new(behaviour),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Sleep this long before answering each call.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs seen so far, in call order.
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    // Merge the node's own value into `{ "node": name }` so tests can trace
    // the data flowing through the graph.
    fn output(&self, v: &Value) -> Value {
        let mut out = json!({ "node": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        out
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(input);
            calls.len()
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behaviour.as_ref() {
            MockBehaviour::ReturnValue(v) => Ok(self.output(v)),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if call_no <= *failures {
                    Err(NodeError::Retryable(format!("{} flaked (call {call_no})", self.name)))
                } else {
                    Ok(self.output(value))
                }
            }
        }
    }
}
