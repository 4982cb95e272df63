//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine (validation + execution + staging).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more tasks share the same ID.
    #[error("duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    /// An edge references a task ID that doesn't exist in the graph.
    #[error("edge references unknown task '{task_id}' ({side} side)")]
    UnknownTaskReference {
        task_id: String,
        side: &'static str,
    },

    /// A task consumes the output of a task that is not a direct upstream.
    #[error("task '{task_id}' reads '{input}' which is not a direct upstream")]
    InputNotUpstream { task_id: String, input: String },

    /// Topological sort detected a cycle.
    #[error("graph '{0}' contains a cycle")]
    CycleDetected(String),

    /// Two graphs registered under one name.
    #[error("duplicate graph name: '{0}'")]
    DuplicateGraph(String),

    /// A task names an operator nobody registered.
    #[error("task '{task_id}' uses unregistered operator '{operator}'")]
    UnknownOperator { task_id: String, operator: String },

    /// A trigger task or a run request names a graph nobody registered.
    #[error("unknown graph '{0}'")]
    UnknownGraph(String),

    /// A graph maps a lifecycle callback to an unregistered handler.
    #[error("graph '{graph}' uses unregistered callback handler '{handler}'")]
    UnknownHandler { graph: String, handler: String },

    /// Backfilling missed schedule periods is not supported.
    #[error("graph '{0}' enables catch-up, which is not supported")]
    CatchupUnsupported(String),

    /// The initializer was pointed at a graph without a periodic schedule.
    #[error("graph '{0}' has no periodic schedule")]
    NotScheduled(String),

    // ------ Staging errors ------

    /// A second write to a staged key within one run.
    #[error("output of task '{task_id}' in run {run_id} is already staged")]
    StageConflict { run_id: uuid::Uuid, task_id: String },

    /// A staged value does not have the expected shape.
    #[error("staged value for task '{task_id}' has an unexpected shape: {source}")]
    StageDecode {
        task_id: String,
        #[source]
        source: serde_json::Error,
    },
}
