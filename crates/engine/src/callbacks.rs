//! Lifecycle callback dispatch.
//!
//! Graphs map [`CallbackKind`]s to handler names; the dispatcher resolves
//! the name in its lookup table and awaits the handler once per run.
//! Handler failures are logged and never change the run's status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::NotificationChannel;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{CallbackKind, WorkflowGraph};
use crate::run::{RunStatus, WorkflowRun};

/// Everything a handler learns about the finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub graph: String,
    pub run_id: Uuid,
    pub logical_date: DateTime<Utc>,
    pub status: RunStatus,
    pub log_url: String,
    /// `(end - start)` of the run in minutes, two decimals.
    pub duration_minutes: f64,
}

impl RunContext {
    /// Build the context of a finished run. `log_base_url` is prefixed to
    /// `/runs/{graph}/{run_id}`.
    pub fn from_run(run: &WorkflowRun, log_base_url: &str) -> Self {
        Self {
            graph: run.graph.clone(),
            run_id: run.run_id,
            logical_date: run.logical_date,
            status: run.status,
            log_url: format!(
                "{}/runs/{}/{}",
                log_base_url.trim_end_matches('/'),
                run.graph,
                run.run_id
            ),
            duration_minutes: run.duration_minutes().unwrap_or_default(),
        }
    }

    /// Hook point matching the run's terminal status.
    pub fn kind(&self) -> Option<CallbackKind> {
        match self.status {
            RunStatus::Success => Some(CallbackKind::OnSuccess),
            RunStatus::Failed => Some(CallbackKind::OnFailure),
            RunStatus::Running => None,
        }
    }
}

/// A registered lifecycle hook.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn handle(&self, kind: CallbackKind, ctx: &RunContext) -> anyhow::Result<()>;
}

/// Lookup table of handlers by name.
#[derive(Clone, Default)]
pub struct CallbackDispatcher {
    handlers: HashMap<String, Arc<dyn LifecycleHandler>>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn LifecycleHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Invoke the handler the graph mapped to the run's terminal status.
    ///
    /// Returns `true` if a handler was invoked (whether or not it succeeded).
    pub async fn dispatch(&self, graph: &WorkflowGraph, ctx: &RunContext) -> bool {
        let Some(kind) = ctx.kind() else {
            return false;
        };
        let Some(name) = graph.callbacks.get(&kind) else {
            return false;
        };
        let Some(handler) = self.handlers.get(name) else {
            warn!(graph = %graph.name, handler = %name, "callback handler not registered");
            return false;
        };

        match handler.handle(kind, ctx).await {
            Ok(()) => info!(graph = %graph.name, run_id = %ctx.run_id, ?kind, "callback delivered"),
            Err(e) => warn!(
                graph = %graph.name,
                run_id = %ctx.run_id,
                ?kind,
                error = %e,
                "callback failed; run status unchanged"
            ),
        }
        true
    }
}

/// Posts success / failure alerts to the notification channel.
pub struct WebhookAlertHandler {
    channel: NotificationChannel,
}

impl WebhookAlertHandler {
    pub fn new(channel: NotificationChannel) -> Self {
        Self { channel }
    }
}

/// Alert text for a finished run.
pub fn format_alert(kind: CallbackKind, ctx: &RunContext) -> String {
    let headline = match kind {
        CallbackKind::OnSuccess => ":large_green_circle: DAG Success Alert",
        CallbackKind::OnFailure => ":red_circle: DAG Failure Alert",
    };
    format!(
        "{headline}\n\
         *DAG Name*: {}\n\
         *Execution Date*: {}\n\
         *Execution Time*: {}\n\
         *Duration*: {} minutes\n\
         *Log URL*: {}",
        ctx.graph,
        ctx.logical_date.format("%Y-%m-%d"),
        ctx.logical_date.format("%H:%M:%S"),
        ctx.duration_minutes,
        ctx.log_url,
    )
}

#[async_trait]
impl LifecycleHandler for WebhookAlertHandler {
    async fn handle(&self, kind: CallbackKind, ctx: &RunContext) -> anyhow::Result<()> {
        self.channel.send(format_alert(kind, ctx)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use notify::NotifyConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx(status: RunStatus) -> RunContext {
        RunContext {
            graph: "Data_Validation_Pipeline".into(),
            run_id: Uuid::nil(),
            logical_date: Utc.with_ymd_and_hms(2024, 10, 17, 6, 30, 5).unwrap(),
            status,
            log_url: "http://logs/runs/x".into(),
            duration_minutes: 2.08,
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl LifecycleHandler for Counting {
        async fn handle(&self, _: CallbackKind, _: &RunContext) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("handler exploded")
        }
    }

    #[test]
    fn alert_contains_run_facts() {
        let text = format_alert(CallbackKind::OnFailure, &ctx(RunStatus::Failed));
        assert!(text.starts_with(":red_circle: DAG Failure Alert"));
        assert!(text.contains("*DAG Name*: Data_Validation_Pipeline"));
        assert!(text.contains("*Execution Date*: 2024-10-17"));
        assert!(text.contains("*Execution Time*: 06:30:05"));
        assert!(text.contains("*Duration*: 2.08 minutes"));
        assert!(text.ends_with("*Log URL*: http://logs/runs/x"));
    }

    #[tokio::test]
    async fn dispatch_picks_handler_by_status_and_survives_errors() {
        let success = Arc::new(Counting(AtomicUsize::new(0)));
        let failure = Arc::new(Counting(AtomicUsize::new(0)));
        let mut dispatcher = CallbackDispatcher::new();
        dispatcher.register("ok", success.clone());
        dispatcher.register("ko", failure.clone());

        let graph = WorkflowGraph::new("g")
            .on(CallbackKind::OnSuccess, "ok")
            .on(CallbackKind::OnFailure, "ko");

        assert!(dispatcher.dispatch(&graph, &ctx(RunStatus::Failed)).await);
        assert_eq!(failure.0.load(Ordering::SeqCst), 1);
        assert_eq!(success.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn graph_without_mapping_dispatches_nothing() {
        let dispatcher = CallbackDispatcher::new();
        let graph = WorkflowGraph::new("g");
        assert!(!dispatcher.dispatch(&graph, &ctx(RunStatus::Success)).await);
    }

    #[tokio::test]
    async fn webhook_handler_surfaces_delivery_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let channel = NotificationChannel::new(NotifyConfig::new(server.uri())).unwrap();

        let result = WebhookAlertHandler::new(channel)
            .handle(CallbackKind::OnSuccess, &ctx(RunStatus::Success))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn log_url_joins_base_graph_and_run() {
        let graph = WorkflowGraph::new("g");
        let mut run = WorkflowRun::new(&graph, crate::run::RunRequest::manual());
        run.end = Some(run.start);
        run.status = RunStatus::Success;

        let ctx = RunContext::from_run(&run, "http://logs.local:8080/");
        assert_eq!(ctx.log_url, format!("http://logs.local:8080/runs/g/{}", run.run_id));
        assert_eq!(ctx.kind(), Some(CallbackKind::OnSuccess));
        assert_eq!(ctx.duration_minutes, 0.0);
    }
}
