//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` — the attempt is repeated after the configured back-off,
///   as long as retries remain.
/// - `Fatal`     — the task instance is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the task.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn fatal(msg: impl std::fmt::Display) -> Self {
        Self::Fatal(msg.to_string())
    }

    pub fn retryable(msg: impl std::fmt::Display) -> Self {
        Self::Retryable(msg.to_string())
    }
}
