//! The three preprocessing graphs and the orchestrator that runs them.
//!
//! `Data_Preprocessing_INIT` fires daily and chains into
//! `Data_Validation_Pipeline`, which chains into `Data_Cleaning_Pipeline`.
//! Both chain tasks use `ALL_DONE`, so the next graph starts even when data
//! tasks failed.

use std::sync::Arc;

use serde_json::json;

use engine::{
    CallbackKind, EngineError, ExecutorConfig, Orchestrator, Task, WebhookAlertHandler,
    WorkflowGraph,
};
use nodes::builtin::{
    self, AGGREGATE_FILTERED, ANONYMIZE_SENSITIVE_DATA, CLEAN_RECORDS, FILTER_BY_LANGUAGE,
    FILTER_BY_WORD_COUNT_AND_DATE, INSERT_TO_WAREHOUSE, LOAD_DATA, REMOVE_ABUSIVE_DATA,
    SEND_SUCCESS_NOTIFICATION, VALIDATE_DATA_QUALITY,
};
use notify::NotificationChannel;

use crate::config::PipelineConfig;

pub const INIT_GRAPH: &str = "Data_Preprocessing_INIT";
pub const VALIDATION_GRAPH: &str = "Data_Validation_Pipeline";
pub const CLEANING_GRAPH: &str = "Data_Cleaning_Pipeline";

/// Lifecycle handler posting run alerts to the webhook.
pub const ALERTS_HANDLER: &str = "alerts";

fn with_alerts(graph: WorkflowGraph) -> WorkflowGraph {
    graph
        .on(CallbackKind::OnSuccess, ALERTS_HANDLER)
        .on(CallbackKind::OnFailure, ALERTS_HANDLER)
}

pub fn init_graph(config: &PipelineConfig) -> WorkflowGraph {
    with_alerts(
        WorkflowGraph::new(INIT_GRAPH)
            .description("DAG to start Data Preprocessing pipeline")
            .every(config.schedule.period(), config.schedule.start_date)
            .task(Task::trigger_graph("data_validation_trigger", VALIDATION_GRAPH)),
    )
}

pub fn validation_graph(config: &PipelineConfig) -> WorkflowGraph {
    let data = &config.data;
    let filter_by_length = "remove_records_with_minimum_words_and_outdated_records";

    with_alerts(
        WorkflowGraph::new(VALIDATION_GRAPH)
            .description("DAG for Data Validation")
            .task(Task::operator("load_data", LOAD_DATA).with_config(json!({ "path": data.input_path })))
            .task(
                Task::operator("validate_data", VALIDATE_DATA_QUALITY)
                    .with_inputs(["load_data"])
                    .with_config(json!({ "max_invalid_ratio": data.max_invalid_ratio })),
            )
            .task(
                Task::operator(filter_by_length, FILTER_BY_WORD_COUNT_AND_DATE)
                    .with_inputs(["validate_data"])
                    .with_config(json!({
                        "min_words": data.min_words,
                        "min_date": data.min_date,
                        "max_date": data.max_date,
                    })),
            )
            .task(
                Task::operator("detect_language", FILTER_BY_LANGUAGE)
                    .with_inputs(["validate_data"])
                    .with_config(json!({
                        "languages": data.languages,
                        "min_confidence": data.min_language_confidence,
                    })),
            )
            .task(
                Task::operator("validation_aggregation", AGGREGATE_FILTERED)
                    .with_inputs([filter_by_length, "detect_language"]),
            )
            .task(
                Task::trigger_graph("data_cleaning_trigger", CLEANING_GRAPH)
                    .with_inputs(["validation_aggregation"]),
            )
            .chain(&["load_data", "validate_data"])
            .fan_out("validate_data", &[filter_by_length, "detect_language"])
            .fan_in(&[filter_by_length, "detect_language"], "validation_aggregation")
            .chain(&["validation_aggregation", "data_cleaning_trigger"]),
    )
}

pub fn cleaning_graph(config: &PipelineConfig) -> WorkflowGraph {
    with_alerts(
        WorkflowGraph::new(CLEANING_GRAPH)
            .description("DAG for Data Preprocessing")
            .task(Task::operator("datacleaning_process", CLEAN_RECORDS))
            .task(
                Task::operator("anonymize_sensitive_data_task", ANONYMIZE_SENSITIVE_DATA)
                    .with_inputs(["datacleaning_process"]),
            )
            .task(
                Task::operator("remove_abusive_data_task", REMOVE_ABUSIVE_DATA)
                    .with_inputs(["anonymize_sensitive_data_task"])
                    .with_config(json!({ "blocklist": config.data.blocklist })),
            )
            .task(
                Task::operator("insert_to_bigquery_task", INSERT_TO_WAREHOUSE)
                    .with_inputs(["remove_abusive_data_task"])
                    .with_config(json!({ "table_dir": config.data.warehouse_path })),
            )
            .task(
                Task::operator("send_success_email_task", SEND_SUCCESS_NOTIFICATION)
                    .with_inputs(["remove_abusive_data_task"]),
            )
            .chain(&[
                "datacleaning_process",
                "anonymize_sensitive_data_task",
                "remove_abusive_data_task",
            ])
            .fan_out(
                "remove_abusive_data_task",
                &["insert_to_bigquery_task", "send_success_email_task"],
            ),
    )
}

/// Build and validate the orchestrator for all three graphs.
pub fn orchestrator(
    config: &PipelineConfig,
    channel: NotificationChannel,
) -> Result<Orchestrator, EngineError> {
    Orchestrator::builder()
        .graph(init_graph(config))
        .graph(validation_graph(config))
        .graph(cleaning_graph(config))
        .nodes(builtin::registry(channel.clone()))
        .node(prep::PREPARE_DATA, Arc::new(prep::PrepareDataNode::new(channel.clone())))
        .handler(ALERTS_HANDLER, Arc::new(WebhookAlertHandler::new(channel)))
        .config(ExecutorConfig::from(&config.executor))
        .log_base_url(config.logs.base_url.clone())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{validate_dag, RunRequest, RunStatus, TaskState, TriggerRule};

    fn channel() -> NotificationChannel {
        NotificationChannel::disabled().unwrap()
    }

    #[test]
    fn all_graphs_validate() {
        let orch = orchestrator(&PipelineConfig::default(), channel()).unwrap();
        assert_eq!(orch.graph_names(), vec![CLEANING_GRAPH, INIT_GRAPH, VALIDATION_GRAPH]);
    }

    #[test]
    fn validation_order_runs_filters_between_validate_and_aggregate() {
        let order = validate_dag(&validation_graph(&PipelineConfig::default())).unwrap();
        assert_eq!(
            order,
            vec![
                "load_data",
                "validate_data",
                "remove_records_with_minimum_words_and_outdated_records",
                "detect_language",
                "validation_aggregation",
                "data_cleaning_trigger",
            ]
        );
    }

    #[test]
    fn chain_tasks_fire_on_all_done() {
        let config = PipelineConfig::default();
        let init = init_graph(&config);
        let validation = validation_graph(&config);

        for task in [
            init.get_task("data_validation_trigger").unwrap(),
            validation.get_task("data_cleaning_trigger").unwrap(),
        ] {
            assert_eq!(task.trigger_rule, TriggerRule::AllDone);
        }
        assert_eq!(init.start_date, Some(config.schedule.start_date));
        assert!(!init.catchup);
    }

    #[test]
    fn cleaning_graph_fans_out_to_sinks() {
        let graph = cleaning_graph(&PipelineConfig::default());
        assert_eq!(
            graph.downstream("remove_abusive_data_task"),
            vec!["insert_to_bigquery_task", "send_success_email_task"]
        );
    }

    #[tokio::test]
    async fn daily_init_runs_all_three_graphs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.jsonl");
        std::fs::write(
            &input,
            concat!(
                "{\"id\": \"1\", \"text\": \"Mail me at jane@example.com about the release notes\"}\n",
                "{\"id\": \"2\", \"text\": \"too short\"}\n",
                "{\"id\": \"3\", \"text\": \"Это предложение написано кириллицей целиком\"}\n",
                "{\"id\": \"4\", \"text\": \"A perfectly ordinary sentence with enough words\"}\n",
            ),
        )
        .unwrap();

        let mut config = PipelineConfig::default();
        config.data.input_path = Some(input);
        config.data.warehouse_path = dir.path().join("warehouse");
        config.data.max_invalid_ratio = 1.0;

        let orch = orchestrator(&config, channel()).unwrap();
        let run = orch.run(INIT_GRAPH, RunRequest::manual()).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        orch.wait_idle().await;

        let validation = orch.history(Some(VALIDATION_GRAPH));
        assert_eq!(validation.len(), 1);
        assert_eq!(validation[0].status, RunStatus::Success);

        let cleaning = orch.history(Some(CLEANING_GRAPH));
        assert_eq!(cleaning.len(), 1);
        assert_eq!(cleaning[0].state_of("insert_to_bigquery_task"), Some(TaskState::Success));

        let written = std::fs::read_to_string(
            config
                .data
                .warehouse_path
                .join(format!("{}.jsonl", cleaning[0].run_id)),
        )
        .unwrap();
        let ids: Vec<String> = written
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert!(written.contains("[EMAIL]"));
    }
}
