//! Core domain models for the workflow engine.
//!
//! A [`WorkflowGraph`] is static: it is built once at start-up, validated,
//! and shared by every run of that graph.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// TriggerRule
// ---------------------------------------------------------------------------

/// When a task becomes eligible relative to its direct upstream tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerRule {
    /// Run only if every upstream task succeeded.
    #[default]
    AllSuccess,
    /// Run once every upstream task is terminal, whatever the outcome.
    AllDone,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// How runs of a graph are started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Only manual runs and cross-graph triggers.
    #[default]
    None,
    /// Once per fixed period, counted from the graph's start date.
    Every {
        /// Period length in seconds.
        period_secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// What a task does when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Call a registered `ExecutableNode`.
    Operator {
        /// Maps to a registered node implementation.
        operator: String,
        /// Passed to the node at execution time.
        #[serde(default)]
        config: Value,
    },
    /// Start a new, independent run of another graph.
    TriggerGraph {
        target: String,
    },
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the graph (referenced by edges).
    pub id: String,
    pub kind: TaskKind,
    /// Upstream tasks whose staged outputs become this task's input, in order.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub trigger_rule: TriggerRule,
}

impl Task {
    pub fn operator(id: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Operator {
                operator: operator.into(),
                config: Value::Null,
            },
            inputs: Vec::new(),
            trigger_rule: TriggerRule::AllSuccess,
        }
    }

    /// A chaining task: fires once all upstream tasks are done.
    pub fn trigger_graph(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::TriggerGraph {
                target: target.into(),
            },
            inputs: Vec::new(),
            trigger_rule: TriggerRule::AllDone,
        }
    }

    /// Set the operator config. No effect on trigger tasks.
    #[must_use]
    pub fn with_config(mut self, value: Value) -> Self {
        if let TaskKind::Operator { config, .. } = &mut self.kind {
            *config = value;
        }
        self
    }

    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed ordering edge: `to` waits for `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle callbacks
// ---------------------------------------------------------------------------

/// Lifecycle hook points of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    OnSuccess,
    OnFailure,
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// A complete graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Backfill missed periods. Must stay `false`.
    #[serde(default)]
    pub catchup: bool,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Hook point → registered handler name.
    #[serde(default)]
    pub callbacks: HashMap<CallbackKind, String>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schedule: Schedule::None,
            start_date: None,
            catchup: false,
            tasks: Vec::new(),
            edges: Vec::new(),
            callbacks: HashMap::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Run once per `period`, starting at `start_date`.
    #[must_use]
    pub fn every(mut self, period: std::time::Duration, start_date: DateTime<Utc>) -> Self {
        self.schedule = Schedule::Every {
            period_secs: period.as_secs(),
        };
        self.start_date = Some(start_date);
        self
    }

    #[must_use]
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    #[must_use]
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// `ids[0] >> ids[1] >> … >> ids[n-1]`
    #[must_use]
    pub fn chain(mut self, ids: &[&str]) -> Self {
        self.edges
            .extend(ids.windows(2).map(|w| Edge::new(w[0], w[1])));
        self
    }

    /// `from >> [to, …]`
    #[must_use]
    pub fn fan_out(mut self, from: &str, to: &[&str]) -> Self {
        self.edges.extend(to.iter().map(|t| Edge::new(from, *t)));
        self
    }

    /// `[from, …] >> to`
    #[must_use]
    pub fn fan_in(mut self, from: &[&str], to: &str) -> Self {
        self.edges.extend(from.iter().map(|f| Edge::new(*f, to)));
        self
    }

    #[must_use]
    pub fn on(mut self, kind: CallbackKind, handler: impl Into<String>) -> Self {
        self.callbacks.insert(kind, handler.into());
        self
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Direct upstream task IDs of `id`, in edge order.
    pub fn upstream(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Direct downstream task IDs of `id`, in edge order.
    pub fn downstream(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Tasks with no incoming edges.
    pub fn roots(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| !self.edges.iter().any(|e| e.to == t.id))
            .map(|t| t.id.as_str())
            .collect()
    }
}
