//! `engine` crate — workflow graphs, DAG validation, and the run orchestrator.

pub mod callbacks;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod run;
pub mod scheduler;
pub mod store;

pub use callbacks::{CallbackDispatcher, LifecycleHandler, RunContext, WebhookAlertHandler};
pub use dag::validate_dag;
pub use error::EngineError;
pub use executor::{ExecutorConfig, NodeRegistry};
pub use models::{CallbackKind, Edge, Schedule, Task, TaskKind, TriggerRule, WorkflowGraph};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use run::{RunRequest, RunStatus, RunType, TaskState, WorkflowRun};
pub use scheduler::Initializer;
pub use store::{InMemoryStore, StageKey, StagingStore};
