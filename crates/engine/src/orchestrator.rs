//! Workflow orchestrator.
//!
//! `Orchestrator` is the central entry point:
//! 1. Holds every validated graph, the node registry, the staging store and
//!    the callback dispatcher.
//! 2. Executes a run: spawns eligible tasks concurrently, stages their
//!    outputs, and advances the [`RunTracker`] on every terminal transition.
//! 3. Starts chained runs fire-and-forget when a trigger task fires.
//! 4. Dispatches the lifecycle callback once the run is terminal, clears
//!    the run's staged outputs and records it in the history.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::{Id, JoinHandle, JoinSet};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use nodes::{ExecutableNode, ExecutionContext, NodeError};

use crate::callbacks::{CallbackDispatcher, LifecycleHandler, RunContext};
use crate::dag::validate_dag;
use crate::executor::{execute_with_retry, ExecutorConfig, NodeRegistry, RunTracker};
use crate::models::{Task, TaskKind, WorkflowGraph};
use crate::run::{RunRequest, RunType, TaskState, WorkflowRun};
use crate::store::{InMemoryStore, StageKey, StagingStore};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects graphs, nodes and handlers, then validates them as a whole.
pub struct OrchestratorBuilder {
    graphs: Vec<WorkflowGraph>,
    registry: NodeRegistry,
    dispatcher: CallbackDispatcher,
    store: Arc<dyn StagingStore>,
    config: ExecutorConfig,
    log_base_url: String,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            graphs: Vec::new(),
            registry: NodeRegistry::new(),
            dispatcher: CallbackDispatcher::new(),
            store: Arc::new(InMemoryStore::new()),
            config: ExecutorConfig::default(),
            log_base_url: "http://localhost:8080".to_owned(),
        }
    }
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn graph(mut self, graph: WorkflowGraph) -> Self {
        self.graphs.push(graph);
        self
    }

    #[must_use]
    pub fn node(mut self, operator: impl Into<String>, node: Arc<dyn ExecutableNode>) -> Self {
        self.registry.insert(operator.into(), node);
        self
    }

    #[must_use]
    pub fn nodes(mut self, registry: NodeRegistry) -> Self {
        self.registry.extend(registry);
        self
    }

    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.dispatcher.register(name, handler);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn StagingStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn log_base_url(mut self, url: impl Into<String>) -> Self {
        self.log_base_url = url.into();
        self
    }

    /// Validate every graph and cross-reference, then build.
    ///
    /// # Errors
    /// Any DAG validation error, plus [`EngineError::DuplicateGraph`],
    /// [`EngineError::UnknownOperator`], [`EngineError::UnknownGraph`],
    /// [`EngineError::UnknownHandler`] and [`EngineError::CatchupUnsupported`].
    pub fn build(self) -> Result<Orchestrator, EngineError> {
        let mut graphs: HashMap<String, Arc<WorkflowGraph>> = HashMap::new();
        for graph in self.graphs {
            validate_dag(&graph)?;
            if graph.catchup {
                return Err(EngineError::CatchupUnsupported(graph.name));
            }
            if graphs.contains_key(&graph.name) {
                return Err(EngineError::DuplicateGraph(graph.name));
            }
            graphs.insert(graph.name.clone(), Arc::new(graph));
        }

        for graph in graphs.values() {
            for task in &graph.tasks {
                match &task.kind {
                    TaskKind::Operator { operator, .. } if !self.registry.contains_key(operator) => {
                        return Err(EngineError::UnknownOperator {
                            task_id: task.id.clone(),
                            operator: operator.clone(),
                        });
                    }
                    TaskKind::TriggerGraph { target } if !graphs.contains_key(target) => {
                        return Err(EngineError::UnknownGraph(target.clone()));
                    }
                    _ => {}
                }
            }
            for handler in graph.callbacks.values() {
                if !self.dispatcher.contains(handler) {
                    return Err(EngineError::UnknownHandler {
                        graph: graph.name.clone(),
                        handler: handler.clone(),
                    });
                }
            }
        }

        info!(graphs = graphs.len(), operators = self.registry.len(), "orchestrator ready");

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                graphs,
                registry: self.registry,
                dispatcher: self.dispatcher,
                store: self.store,
                config: self.config,
                log_base_url: self.log_base_url,
                history: Mutex::new(Vec::new()),
                in_flight: Mutex::new(Vec::new()),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner {
    graphs: HashMap<String, Arc<WorkflowGraph>>,
    registry: NodeRegistry,
    dispatcher: CallbackDispatcher,
    store: Arc<dyn StagingStore>,
    config: ExecutorConfig,
    log_base_url: String,
    history: Mutex<Vec<WorkflowRun>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

/// Runs validated graphs. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn graph(&self, name: &str) -> Option<Arc<WorkflowGraph>> {
        self.inner.graphs.get(name).cloned()
    }

    /// Registered graph names, sorted.
    pub fn graph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.graphs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute one run of `graph` and wait for it (not for runs it chains).
    ///
    /// # Errors
    /// [`EngineError::UnknownGraph`] if no such graph is registered. Task
    /// failures are reported through the returned run's status.
    pub async fn run(&self, graph: &str, request: RunRequest) -> Result<WorkflowRun, EngineError> {
        let graph = self
            .graph(graph)
            .ok_or_else(|| EngineError::UnknownGraph(graph.to_owned()))?;
        let run = WorkflowRun::new(&graph, request);
        Ok(self.execute_run(graph, run).await)
    }

    /// Start a run of `graph` in the background and return its id as soon
    /// as it has been started.
    ///
    /// Concurrent runs of the same graph are allowed.
    pub fn trigger(&self, graph: &str, request: RunRequest) -> Result<Uuid, EngineError> {
        let graph = self
            .graph(graph)
            .ok_or_else(|| EngineError::UnknownGraph(graph.to_owned()))?;
        let run = WorkflowRun::new(&graph, request);
        let run_id = run.run_id;

        let handle = tokio::spawn(self.execute_run(graph, run).map(|_| ()));
        let mut in_flight = self.lock_in_flight();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
        Ok(run_id)
    }

    /// Wait until every background run, including runs started while
    /// waiting, has finished.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_in_flight());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "background run aborted");
                }
            }
        }
    }

    /// Completed runs, oldest first, optionally restricted to one graph.
    pub fn history(&self, graph: Option<&str>) -> Vec<WorkflowRun> {
        let history = match self.inner.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history
            .iter()
            .filter(|run| graph.map_or(true, |g| run.graph == g))
            .cloned()
            .collect()
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.inner.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // -----------------------------------------------------------------------
    // Run execution
    // -----------------------------------------------------------------------

    // Boxed so that trigger tasks can spawn further runs from inside a run.
    fn execute_run(&self, graph: Arc<WorkflowGraph>, mut run: WorkflowRun) -> BoxFuture<'static, WorkflowRun> {
        let this = self.clone();
        let span = info_span!("run", graph = %graph.name, run_id = %run.run_id);

        async move {
            info!(run_type = ?run.run_type, logical_date = %run.logical_date, "run started");

            let mut tracker = RunTracker::new(Arc::clone(&graph));
            let mut tasks = InFlightTasks::default();

            for task_id in tracker.start() {
                this.spawn_task(&mut tasks, &graph, &mut run, task_id);
            }

            while let Some((task_id, outcome)) = tasks.join_next().await {
                let state = outcome.state();
                if let Some(instance) = run.tasks.get_mut(&task_id) {
                    instance.state = state;
                    instance.attempts = outcome.attempts;
                    instance.finished_at = Some(Utc::now());
                    match &outcome.result {
                        Ok(key) => instance.output_key = Some(key.clone()),
                        Err(msg) => instance.error = Some(msg.clone()),
                    }
                }

                match &outcome.result {
                    Ok(_) => info!(task_id = %task_id, attempts = outcome.attempts, "task succeeded"),
                    Err(msg) => error!(task_id = %task_id, attempts = outcome.attempts, error = %msg, "task failed"),
                }

                let advance = tracker.complete(&task_id, state);
                for skipped in advance.skipped {
                    warn!(task_id = %skipped, "upstream failed, task skipped");
                    if let Some(instance) = run.tasks.get_mut(&skipped) {
                        instance.state = TaskState::UpstreamFailed;
                        instance.finished_at = Some(Utc::now());
                    }
                }
                for ready in advance.ready {
                    this.spawn_task(&mut tasks, &graph, &mut run, ready);
                }
            }

            run.status = tracker.status();
            run.end = Some(Utc::now());
            info!(status = %run.status, duration_minutes = ?run.duration_minutes(), "run finished");

            let ctx = RunContext::from_run(&run, &this.inner.log_base_url);
            this.inner.dispatcher.dispatch(&graph, &ctx).await;

            match this.inner.store.clear_run(run.run_id).await {
                Ok(cleared) => info!(cleared, "staged outputs cleared"),
                Err(e) => warn!(error = %e, "failed to clear staged outputs"),
            }

            match this.inner.history.lock() {
                Ok(mut history) => history.push(run.clone()),
                Err(poisoned) => poisoned.into_inner().push(run.clone()),
            }
            run
        }
        .instrument(span)
        .boxed()
    }

    fn spawn_task(
        &self,
        tasks: &mut InFlightTasks,
        graph: &Arc<WorkflowGraph>,
        run: &mut WorkflowRun,
        task_id: String,
    ) {
        if let Some(instance) = run.tasks.get_mut(&task_id) {
            instance.state = TaskState::Running;
            instance.started_at = Some(Utc::now());
        }

        let this = self.clone();
        let graph = Arc::clone(graph);
        let run_id = run.run_id;
        let logical_date = run.logical_date;
        let conf = run.conf.clone();
        let span = info_span!("task", task_id = %task_id);

        let id = task_id.clone();
        tasks.spawn(
            task_id,
            async move { this.run_task(&graph, run_id, logical_date, conf, &id).await }.instrument(span),
        );
    }

    async fn run_task(
        &self,
        graph: &WorkflowGraph,
        run_id: Uuid,
        logical_date: chrono::DateTime<Utc>,
        conf: Value,
        task_id: &str,
    ) -> TaskOutcome {
        let Some(task) = graph.get_task(task_id) else {
            return TaskOutcome::failed(0, format!("unknown task '{task_id}'"));
        };

        let input = match self.gather_input(graph, task, run_id, conf).await {
            Ok(input) => input,
            Err(e) => return TaskOutcome::failed(0, e.to_string()),
        };

        let (result, attempts) = match &task.kind {
            TaskKind::Operator { operator, config } => {
                let Some(node) = self.inner.registry.get(operator) else {
                    return TaskOutcome::failed(0, format!("operator '{operator}' is not registered"));
                };
                let ctx = ExecutionContext {
                    graph: graph.name.clone(),
                    run_id,
                    task_id: task.id.clone(),
                    logical_date,
                    attempt: 1,
                    config: config.clone(),
                };
                execute_with_retry(node.as_ref(), input, &ctx, &self.inner.config).await
            }

            TaskKind::TriggerGraph { target } => {
                let request = RunRequest {
                    run_type: RunType::Triggered {
                        parent_graph: graph.name.clone(),
                        parent_run: run_id,
                        parent_task: task.id.clone(),
                    },
                    logical_date: Utc::now(),
                    conf: input,
                };
                let result = self
                    .trigger(target, request)
                    .map(|child| {
                        info!(chained_graph = %target, child_run = %child, "chained run started");
                        json!({ "triggered_graph": target, "triggered_run_id": child })
                    })
                    .map_err(|e| NodeError::Fatal(e.to_string()));
                (result, 1)
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => return TaskOutcome::failed(attempts, e.to_string()),
        };

        let key = StageKey::new(run_id, task.id.clone());
        match self.inner.store.put(key.clone(), output).await {
            Ok(()) => TaskOutcome {
                attempts,
                result: Ok(key),
            },
            Err(e) => TaskOutcome::failed(attempts, e.to_string()),
        }
    }

    /// Root tasks receive the run `conf`; other tasks receive the staged
    /// outputs of their declared inputs (`null` for an input that produced
    /// nothing), unwrapped when there is exactly one.
    async fn gather_input(
        &self,
        graph: &WorkflowGraph,
        task: &Task,
        run_id: Uuid,
        conf: Value,
    ) -> Result<Value, EngineError> {
        if graph.upstream(&task.id).is_empty() {
            return Ok(conf);
        }

        let mut values = Vec::with_capacity(task.inputs.len());
        for input in &task.inputs {
            let staged = self
                .inner
                .store
                .get(&StageKey::new(run_id, input.clone()))
                .await?;
            values.push(staged.unwrap_or(Value::Null));
        }

        Ok(match values.len() {
            0 => Value::Null,
            1 => values.pop().unwrap_or(Value::Null),
            _ => Value::Array(values),
        })
    }
}

/// What a spawned task reports back to the run loop.
#[derive(Debug)]
struct TaskOutcome {
    attempts: u32,
    result: Result<StageKey, String>,
}

impl TaskOutcome {
    fn failed(attempts: u32, msg: impl Into<String>) -> Self {
        Self {
            attempts,
            result: Err(msg.into()),
        }
    }

    fn state(&self) -> TaskState {
        if self.result.is_ok() {
            TaskState::Success
        } else {
            TaskState::Failed
        }
    }
}

/// The spawned tasks of one run, keyed so a join failure can still be
/// attributed to its task.
#[derive(Default)]
struct InFlightTasks {
    set: JoinSet<TaskOutcome>,
    ids: HashMap<Id, String>,
}

impl InFlightTasks {
    fn spawn<F>(&mut self, task_id: String, task: F)
    where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        let handle = self.set.spawn(task);
        self.ids.insert(handle.id(), task_id);
    }

    /// Next finished task; one that panicked or was aborted comes back failed.
    async fn join_next(&mut self) -> Option<(String, TaskOutcome)> {
        loop {
            let (id, outcome) = match self.set.join_next_with_id().await? {
                Ok(done) => done,
                Err(e) => {
                    let outcome = TaskOutcome::failed(0, format!("task join failed: {e}"));
                    (e.id(), outcome)
                }
            };
            if let Some(task_id) = self.ids.remove(&id) {
                return Some((task_id, outcome));
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graphs", &self.graph_names())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
