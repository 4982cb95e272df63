//! Periodic entry point.
//!
//! The [`Initializer`] starts one run of a scheduled graph per period. It
//! never backfills: after downtime only the most recent period boundary is
//! fired.

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::Schedule;
use crate::orchestrator::Orchestrator;
use crate::run::RunRequest;
use crate::EngineError;

/// Latest `start + n * period` that is `<= now`, or `None` before `start`.
pub fn latest_boundary(
    start: DateTime<Utc>,
    period: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if now < start || period <= Duration::zero() {
        return None;
    }
    let period_secs = period.num_seconds().max(1);
    let periods = (now - start).num_seconds() / period_secs;
    Some(start + Duration::seconds(periods * period_secs))
}

/// First boundary strictly after `now`.
pub fn next_boundary(start: DateTime<Utc>, period: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    match latest_boundary(start, period, now) {
        Some(latest) => latest + period,
        None => start,
    }
}

/// Fires a graph once per schedule period.
#[derive(Debug)]
pub struct Initializer {
    orchestrator: Orchestrator,
    graph: String,
    start: DateTime<Utc>,
    period: Duration,
    last_fired: Option<DateTime<Utc>>,
}

impl Initializer {
    /// # Errors
    /// [`EngineError::UnknownGraph`] or [`EngineError::NotScheduled`] if the
    /// graph has no `Every` schedule with a start date.
    pub fn for_graph(orchestrator: Orchestrator, graph: &str) -> Result<Self, EngineError> {
        let definition = orchestrator
            .graph(graph)
            .ok_or_else(|| EngineError::UnknownGraph(graph.to_owned()))?;

        let (Schedule::Every { period_secs }, Some(start)) = (&definition.schedule, definition.start_date) else {
            return Err(EngineError::NotScheduled(graph.to_owned()));
        };
        let period = i64::try_from(*period_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .ok_or_else(|| EngineError::NotScheduled(graph.to_owned()))?;

        Ok(Self {
            orchestrator,
            graph: graph.to_owned(),
            start,
            period,
            last_fired: None,
        })
    }

    /// Fire the latest boundary at or before `now` unless it already fired.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<Uuid>, EngineError> {
        let Some(boundary) = latest_boundary(self.start, self.period, now) else {
            return Ok(None);
        };
        if self.last_fired.is_some_and(|fired| fired >= boundary) {
            return Ok(None);
        }

        let run_id = self
            .orchestrator
            .trigger(&self.graph, RunRequest::scheduled(boundary))?;
        self.last_fired = Some(boundary);
        info!(graph = %self.graph, logical_date = %boundary, %run_id, "scheduled run started");
        Ok(Some(run_id))
    }

    /// Tick now, then at every following boundary, until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(graph = %self.graph, period = %self.period, start = %self.start, "initializer started");

        loop {
            if let Err(e) = self.tick(Utc::now()) {
                error!(graph = %self.graph, error = %e, "failed to start scheduled run");
            }

            let wait = (next_boundary(self.start, self.period, Utc::now()) - Utc::now())
                .to_std()
                .unwrap_or_default();

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(graph = %self.graph, "shutdown requested, stopping initializer");
                    break;
                }

                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Task, WorkflowGraph};
    use chrono::TimeZone;
    use nodes::mock::MockNode;
    use std::sync::Arc;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, d, h, 0, 0).unwrap()
    }

    #[test]
    fn boundaries_follow_the_period() {
        let start = at(17, 0);
        let day = Duration::days(1);

        assert_eq!(latest_boundary(start, day, at(16, 23)), None);
        assert_eq!(latest_boundary(start, day, start), Some(start));
        assert_eq!(latest_boundary(start, day, at(19, 7)), Some(at(19, 0)));
        assert_eq!(next_boundary(start, day, at(19, 7)), at(20, 0));
        assert_eq!(next_boundary(start, day, at(1, 0)), start);
    }

    fn orchestrator(scheduled: bool) -> Orchestrator {
        let mut graph = WorkflowGraph::new("init").task(Task::operator("only", "noop"));
        if scheduled {
            graph = graph.every(std::time::Duration::from_secs(86_400), at(17, 0));
        }
        Orchestrator::builder()
            .graph(graph)
            .node("noop", Arc::new(MockNode::returning("noop", serde_json::json!({}))))
            .build()
            .unwrap()
    }

    #[test]
    fn unscheduled_graph_is_rejected() {
        let err = Initializer::for_graph(orchestrator(false), "init").unwrap_err();
        assert!(matches!(err, EngineError::NotScheduled(_)));
    }

    #[tokio::test]
    async fn missed_periods_fire_once_without_backfill() {
        let orch = orchestrator(true);
        let mut init = Initializer::for_graph(orch.clone(), "init").unwrap();

        // Three days of downtime, one run.
        assert!(init.tick(at(20, 9)).unwrap().is_some());
        assert!(init.tick(at(20, 10)).unwrap().is_none());
        assert!(init.tick(at(21, 0)).unwrap().is_some());

        orch.wait_idle().await;
        let dates: Vec<_> = orch.history(Some("init")).iter().map(|r| r.logical_date).collect();
        assert_eq!(dates.len(), 2);
        assert!(dates.contains(&at(20, 0)));
        assert!(dates.contains(&at(21, 0)));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let init = Initializer::for_graph(orchestrator(true), "init").unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(init.run(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
