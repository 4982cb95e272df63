//! In-flight and completed run state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::WorkflowGraph;
use crate::store::StageKey;

/// Why a run exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunType {
    Scheduled,
    Manual,
    /// Started by a trigger task of another graph.
    Triggered {
        parent_graph: String,
        parent_run: Uuid,
        parent_task: String,
    },
}

/// Run-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Task-instance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    /// Skipped because a required upstream did not succeed.
    UpstreamFailed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::UpstreamFailed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
        }
    }
}

/// One execution of a task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: String,
    pub state: TaskState,
    /// Number of times the task function was invoked.
    pub attempts: u32,
    pub error: Option<String>,
    pub output_key: Option<StageKey>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskInstance {
    fn pending(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_owned(),
            state: TaskState::Pending,
            attempts: 0,
            error: None,
            output_key: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// What to start: passed to the orchestrator.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_type: RunType,
    pub logical_date: DateTime<Utc>,
    /// Input handed to root tasks.
    pub conf: Value,
}

impl RunRequest {
    pub fn manual() -> Self {
        Self {
            run_type: RunType::Manual,
            logical_date: Utc::now(),
            conf: Value::Null,
        }
    }

    pub fn scheduled(logical_date: DateTime<Utc>) -> Self {
        Self {
            run_type: RunType::Scheduled,
            logical_date,
            conf: Value::Null,
        }
    }

    #[must_use]
    pub fn with_conf(mut self, conf: Value) -> Self {
        self.conf = conf;
        self
    }
}

/// One materialized execution of a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub graph: String,
    pub run_type: RunType,
    pub logical_date: DateTime<Utc>,
    pub conf: Value,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub tasks: BTreeMap<String, TaskInstance>,
}

impl WorkflowRun {
    pub fn new(graph: &WorkflowGraph, request: RunRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            graph: graph.name.clone(),
            run_type: request.run_type,
            logical_date: request.logical_date,
            conf: request.conf,
            start: Utc::now(),
            end: None,
            status: RunStatus::Running,
            tasks: graph
                .tasks
                .iter()
                .map(|t| (t.id.clone(), TaskInstance::pending(&t.id)))
                .collect(),
        }
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.get(task_id).map(|t| t.state)
    }

    /// Run duration in minutes, once the run has ended.
    pub fn duration_minutes(&self) -> Option<f64> {
        self.end.map(|end| duration_minutes(self.start, end))
    }
}

/// `(end - start)` in minutes, rounded to two decimals.
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let minutes = (end - start).num_milliseconds() as f64 / 60_000.0;
    (minutes * 100.0).round() / 100.0
}
