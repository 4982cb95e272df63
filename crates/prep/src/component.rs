//! The data-preparation step.
//!
//! Loads records, maps string labels to ids, tokenizes the feature text to
//! fixed-length sequences and writes `{output_dir}/{dataset_name}.tfrecord`.
//! Start, failure and success are reported as component alerts; any data
//! error fails the step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use nodes::{ExecutableNode, ExecutionContext, NodeError};
use notify::{ComponentAlert, NotificationChannel};

use crate::example::training_example;
use crate::tfrecord::TfRecordWriter;
use crate::tokenizer::{fixed_length, HfTokenizer, TextTokenizer};
use crate::PrepError;

/// Operator name of [`PrepareDataNode`].
pub const PREPARE_DATA: &str = "prepare_data";

const COMPONENT_NAME: &str = "Prepare Data Component";

/// Parameters of one data-preparation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareDataConfig {
    /// JSON-lines input. When absent the records come from the task input.
    #[serde(default)]
    pub input_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub dataset_name: String,
    #[serde(default = "default_feature_name")]
    pub feature_name: String,
    #[serde(default = "default_label_name")]
    pub label_name: String,
    pub label_map: BTreeMap<String, i64>,
    /// Local `tokenizer.json`. When absent the tokenizer of `model_name` is
    /// fetched from the Hugging Face Hub.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
    /// Pretrained model whose tokenizer is used.
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

fn default_feature_name() -> String {
    "text".into()
}

fn default_label_name() -> String {
    "label".into()
}

fn default_max_sequence_length() -> usize {
    128
}

fn default_model_name() -> String {
    "bert-base-multilingual-cased".into()
}

impl PrepareDataConfig {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.tfrecord", self.dataset_name))
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepSummary {
    pub path: PathBuf,
    pub records: usize,
}

/// Run the step. `input` is only read when `config.input_path` is unset.
pub async fn prepare_data(
    config: &PrepareDataConfig,
    input: Value,
    tokenizer: &dyn TextTokenizer,
    channel: &NotificationChannel,
) -> Result<PrepSummary, PrepError> {
    let started = Utc::now();
    let label = format!(
        "{COMPONENT_NAME} | Dataset: {} & Model: {}",
        config.dataset_name, config.model_name
    );

    channel
        .send_component_alert(&alert(&label, "Started", started, true))
        .await;

    match build_dataset(config, input, tokenizer).await {
        Ok(summary) => {
            info!(
                dataset = %config.dataset_name,
                records = summary.records,
                path = %summary.path.display(),
                "dataset written"
            );
            channel
                .send_component_alert(&alert(&label, "Success", started, true))
                .await;
            Ok(summary)
        }
        Err(e) => {
            error!(dataset = %config.dataset_name, model = %config.model_name, error = %e, "dataset creation failed");
            channel
                .send_component_alert(&alert(&label, &format!("Failed | {e}"), started, false))
                .await;
            Err(e)
        }
    }
}

fn alert(label: &str, outcome: &str, started: DateTime<Utc>, success: bool) -> ComponentAlert {
    let minutes = (Utc::now() - started).num_milliseconds() as f64 / 60_000.0;
    ComponentAlert {
        component: COMPONENT_NAME.to_owned(),
        message: format!("{label} {outcome}"),
        execution_date: started.format("%Y-%m-%d").to_string(),
        execution_time: started.format("%H:%M:%S").to_string(),
        duration_minutes: (minutes * 100.0).round() / 100.0,
        success,
    }
}

async fn build_dataset(
    config: &PrepareDataConfig,
    input: Value,
    tokenizer: &dyn TextTokenizer,
) -> Result<PrepSummary, PrepError> {
    let rows = match &config.input_path {
        Some(path) => read_rows(path).await?,
        None => rows_from_value(input)?,
    };
    if rows.is_empty() {
        return Err(PrepError::EmptyDataset);
    }

    let mut writer = TfRecordWriter::new(Vec::new());
    for (line, row) in rows {
        let text = field(&row, &config.feature_name, line)?
            .as_str()
            .ok_or_else(|| PrepError::InvalidRecord {
                line,
                reason: format!("'{}' is not a string", config.feature_name),
            })?;
        let label = label_id(field(&row, &config.label_name, line)?, &config.label_map, line)?;

        let ids = fixed_length(
            tokenizer.encode(text)?,
            config.max_sequence_length,
            tokenizer.pad_id(),
        );
        writer
            .write_record(&training_example(ids, label).encode_to_vec())
            .map_err(|e| PrepError::io(config.output_path(), e))?;
    }

    let records = writer.count();
    let bytes = writer
        .into_inner()
        .map_err(|e| PrepError::io(config.output_path(), e))?;

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|e| PrepError::io(&config.output_dir, e))?;
    let path = config.output_path();
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| PrepError::io(&path, e))?;

    Ok(PrepSummary { path, records })
}

/// Numbered (1-based) JSON objects of a JSON-lines file, blank lines skipped.
async fn read_rows(path: &Path) -> Result<Vec<(usize, Value)>, PrepError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PrepError::io(path, e))?;

    let mut rows = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|e| PrepError::InvalidRecord {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        rows.push((idx + 1, row));
    }
    Ok(rows)
}

fn rows_from_value(input: Value) -> Result<Vec<(usize, Value)>, PrepError> {
    match input {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.into_iter().enumerate().map(|(i, v)| (i + 1, v)).collect()),
        other => Err(PrepError::InvalidRecord {
            line: 0,
            reason: format!("expected a list of records, got {other}"),
        }),
    }
}

fn field<'a>(row: &'a Value, name: &str, line: usize) -> Result<&'a Value, PrepError> {
    row.get(name).ok_or_else(|| PrepError::MissingField {
        line,
        field: name.to_owned(),
    })
}

fn label_id(value: &Value, label_map: &BTreeMap<String, i64>, line: usize) -> Result<i64, PrepError> {
    let key = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    label_map
        .get(&key)
        .copied()
        .ok_or(PrepError::UnknownLabel { line, label: key })
}

/// [`prepare_data`] as a graph operator. The task config is a
/// [`PrepareDataConfig`]; the output is a [`PrepSummary`].
pub struct PrepareDataNode {
    channel: NotificationChannel,
}

impl PrepareDataNode {
    pub fn new(channel: NotificationChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ExecutableNode for PrepareDataNode {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: PrepareDataConfig = serde_json::from_value(ctx.config.clone())
            .map_err(|e| NodeError::fatal(format!("invalid config for task '{}': {e}", ctx.task_id)))?;
        let tokenizer = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || HfTokenizer::for_config(&config))
                .await
                .map_err(NodeError::fatal)?
                .map_err(NodeError::fatal)?
        };

        let summary = prepare_data(&config, input, &tokenizer, &self.channel)
            .await
            .map_err(|e| match e {
                PrepError::Io { .. } => NodeError::retryable(e),
                other => NodeError::fatal(other),
            })?;
        serde_json::to_value(summary).map_err(NodeError::fatal)
    }
}
