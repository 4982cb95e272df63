//! Run-level execution logic.
//!
//! [`RunTracker`] is the pure state machine of a single run: it decides
//! which tasks become eligible when an upstream task reaches a terminal
//! state, and cascades `upstream_failed` through `ALL_SUCCESS` tasks.
//! [`execute_with_retry`] drives one task function through its attempts.
//! The orchestrator glues both to tokio.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use nodes::{ExecutableNode, ExecutionContext, NodeError};

use crate::models::{TriggerRule, WorkflowGraph};
use crate::run::{RunStatus, TaskState};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs shared by every task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// How many times a retryable task failure is retried.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// Node registry
// ---------------------------------------------------------------------------

/// Maps operator names to `ExecutableNode` implementations.
pub type NodeRegistry = HashMap<String, Arc<dyn ExecutableNode>>;

// ---------------------------------------------------------------------------
// Trigger rules
// ---------------------------------------------------------------------------

/// Outcome of evaluating a trigger rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Some upstream task has not finished yet.
    Waiting,
    /// The task may run now.
    Run,
    /// The task can never run in this run.
    UpstreamFailed,
}

/// Evaluate `rule` against the states of all direct upstream tasks.
pub fn evaluate(rule: TriggerRule, upstream: &[TaskState]) -> Readiness {
    if !upstream.iter().all(|s| s.is_terminal()) {
        return Readiness::Waiting;
    }
    match rule {
        TriggerRule::AllDone => Readiness::Run,
        TriggerRule::AllSuccess if upstream.iter().all(|s| *s == TaskState::Success) => {
            Readiness::Run
        }
        TriggerRule::AllSuccess => Readiness::UpstreamFailed,
    }
}

// ---------------------------------------------------------------------------
// RunTracker
// ---------------------------------------------------------------------------

/// Result of recording a terminal task state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advance {
    /// Tasks that just became eligible, now marked running.
    pub ready: Vec<String>,
    /// Tasks that were just marked `upstream_failed`.
    pub skipped: Vec<String>,
}

/// Task states of one run plus the graph topology needed to advance them.
#[derive(Debug, Clone)]
pub struct RunTracker {
    graph: Arc<WorkflowGraph>,
    states: HashMap<String, TaskState>,
}

impl RunTracker {
    pub fn new(graph: Arc<WorkflowGraph>) -> Self {
        let states = graph
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskState::Pending))
            .collect();
        Self { graph, states }
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).copied()
    }

    /// Root tasks, marked running. Call once when the run starts.
    pub fn start(&mut self) -> Vec<String> {
        let roots: Vec<String> = self.graph.roots().into_iter().map(str::to_owned).collect();
        for id in &roots {
            self.states.insert(id.clone(), TaskState::Running);
        }
        roots
    }

    /// Record the terminal `state` of `task_id`. Downstream tasks whose
    /// rule is now satisfied are marked running; tasks that can no longer
    /// run are marked `upstream_failed`, transitively.
    pub fn complete(&mut self, task_id: &str, state: TaskState) -> Advance {
        debug_assert!(state.is_terminal());
        self.states.insert(task_id.to_owned(), state);

        let mut advance = Advance::default();
        let mut finished = vec![task_id.to_owned()];

        while let Some(done) = finished.pop() {
            let graph = Arc::clone(&self.graph);
            for child in graph.downstream(&done) {
                if self.states.get(child) != Some(&TaskState::Pending) {
                    continue;
                }
                let Some(task) = graph.get_task(child) else {
                    continue;
                };
                let upstream: Vec<TaskState> = graph
                    .upstream(child)
                    .into_iter()
                    .filter_map(|id| self.states.get(id).copied())
                    .collect();

                match evaluate(task.trigger_rule, &upstream) {
                    Readiness::Waiting => {}
                    Readiness::Run => {
                        self.states.insert(child.to_owned(), TaskState::Running);
                        advance.ready.push(child.to_owned());
                    }
                    Readiness::UpstreamFailed => {
                        self.states
                            .insert(child.to_owned(), TaskState::UpstreamFailed);
                        advance.skipped.push(child.to_owned());
                        finished.push(child.to_owned());
                    }
                }
            }
        }

        advance
    }

    /// No task is pending or running.
    pub fn is_finished(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    /// Failed if any task failed or was skipped, otherwise success.
    pub fn status(&self) -> RunStatus {
        if !self.is_finished() {
            RunStatus::Running
        } else if self
            .states
            .values()
            .any(|s| matches!(s, TaskState::Failed | TaskState::UpstreamFailed))
        {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

const PANICKED: &str = "task panicked";

/// Invoke `node` until it succeeds, fails fatally, or `1 + retries`
/// attempts have been made. Returns the last result and the attempt count.
///
/// A panicking attempt counts as a retryable failure.
pub async fn execute_with_retry(
    node: &dyn ExecutableNode,
    input: Value,
    ctx: &ExecutionContext,
    config: &ExecutorConfig,
) -> (Result<Value, NodeError>, u32) {
    let max_attempts = config.retries.saturating_add(1);
    let mut ctx = ctx.clone();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        ctx.attempt = attempt;

        let result = AssertUnwindSafe(node.execute(input.clone(), &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(NodeError::Retryable(PANICKED.into())));

        match result {
            Ok(output) => return (Ok(output), attempt),

            Err(err @ NodeError::Fatal(_)) => return (Err(err), attempt),

            Err(NodeError::Retryable(msg)) => {
                if attempt >= max_attempts {
                    return (Err(NodeError::Retryable(msg)), attempt);
                }

                warn!(
                    task_id = %ctx.task_id,
                    attempt,
                    max_attempts,
                    delay = ?config.retry_delay,
                    error = %msg,
                    "task failed, retrying"
                );

                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use crate::run::TaskState::*;

    #[test]
    fn all_success_waits_for_every_upstream() {
        assert_eq!(evaluate(TriggerRule::AllSuccess, &[Success, Running]), Readiness::Waiting);
        assert_eq!(evaluate(TriggerRule::AllSuccess, &[Success, Success]), Readiness::Run);
        assert_eq!(
            evaluate(TriggerRule::AllSuccess, &[Success, Failed]),
            Readiness::UpstreamFailed
        );
        assert_eq!(
            evaluate(TriggerRule::AllSuccess, &[UpstreamFailed]),
            Readiness::UpstreamFailed
        );
    }

    #[test]
    fn all_done_runs_even_if_everything_failed() {
        assert_eq!(evaluate(TriggerRule::AllDone, &[Failed, Failed]), Readiness::Run);
        assert_eq!(evaluate(TriggerRule::AllDone, &[Failed, Pending]), Readiness::Waiting);
    }

    #[test]
    fn root_task_with_no_upstream_is_eligible() {
        assert_eq!(evaluate(TriggerRule::AllSuccess, &[]), Readiness::Run);
    }

    fn diamond() -> Arc<WorkflowGraph> {
        Arc::new(
            WorkflowGraph::new("d")
                .task(Task::operator("a", "op"))
                .task(Task::operator("b", "op"))
                .task(Task::operator("c", "op"))
                .task(Task::operator("d", "op"))
                .task(Task::operator("e", "op"))
                .task(Task::trigger_graph("t", "other"))
                .fan_out("a", &["b", "c"])
                .fan_in(&["b", "c"], "d")
                .chain(&["d", "e", "t"]),
        )
    }

    #[test]
    fn join_waits_for_both_branches() {
        let mut tracker = RunTracker::new(diamond());
        assert_eq!(tracker.start(), vec!["a"]);
        assert_eq!(tracker.complete("a", Success).ready, vec!["b", "c"]);
        assert!(tracker.complete("b", Success).ready.is_empty());
        assert_eq!(tracker.complete("c", Success).ready, vec!["d"]);
    }

    #[test]
    fn failure_cascades_to_all_done_task() {
        let mut tracker = RunTracker::new(diamond());
        tracker.start();
        tracker.complete("a", Success);
        assert_eq!(tracker.complete("b", Failed), Advance::default());

        // c finishing resolves the join: d and e are skipped, t fires.
        let advance = tracker.complete("c", Success);
        assert_eq!(advance.ready, vec!["t"]);
        assert_eq!(advance.skipped, vec!["d", "e"]);
        assert_eq!(tracker.state("d"), Some(UpstreamFailed));
        assert_eq!(tracker.state("e"), Some(UpstreamFailed));
        assert!(!tracker.is_finished());

        tracker.complete("t", Success);
        assert!(tracker.is_finished());
        assert_eq!(tracker.status(), RunStatus::Failed);
    }

    #[test]
    fn clean_run_is_successful() {
        let mut tracker = RunTracker::new(diamond());
        tracker.start();
        for id in ["a", "b", "c", "d", "e", "t"] {
            tracker.complete(id, Success);
        }
        assert_eq!(tracker.status(), RunStatus::Success);
    }
}
