//! Loading and quality validation of raw records.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::records::{self, Record};
use crate::{ExecutableNode, ExecutionContext, NodeError};

/// Config of [`LoadData`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadConfig {
    /// JSON-lines file with one record per line.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Reads raw records from a JSON-lines file.
///
/// When the task has no `path` configured, the input (a record list passed
/// as run `conf`) is used instead.
pub struct LoadData;

#[async_trait]
impl ExecutableNode for LoadData {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: LoadConfig = ctx.config_as()?;

        let Some(path) = config.path else {
            let records = records::decode(&input)?;
            info!(count = records.len(), "loaded records from run conf");
            return records::encode(&records);
        };

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            NodeError::retryable(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line).map_err(|e| {
                NodeError::fatal(format!("{}:{}: {e}", path.display(), line_no + 1))
            })?;
            records.push(record);
        }

        info!(count = records.len(), path = %path.display(), "loaded records");
        records::encode(&records)
    }
}

/// Config of [`ValidateDataQuality`].
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateConfig {
    /// Largest tolerated share of invalid records before the task fails.
    #[serde(default = "default_max_invalid_ratio")]
    pub max_invalid_ratio: f64,
}

fn default_max_invalid_ratio() -> f64 {
    0.2
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            max_invalid_ratio: default_max_invalid_ratio(),
        }
    }
}

/// Drops records with an empty id, empty text or a duplicate id, and fails
/// the task when too many had to be dropped.
pub struct ValidateDataQuality;

#[async_trait]
impl ExecutableNode for ValidateDataQuality {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: ValidateConfig = ctx.config_as()?;
        let records = records::decode(&input)?;
        let total = records.len();
        if total == 0 {
            return Err(NodeError::fatal("dataset is empty"));
        }

        let mut seen = HashSet::new();
        let valid: Vec<Record> = records
            .into_iter()
            .filter(|r| {
                !r.id.trim().is_empty() && !r.text.trim().is_empty() && seen.insert(r.id.clone())
            })
            .collect();

        let invalid = total - valid.len();
        let ratio = invalid as f64 / total as f64;
        if ratio > config.max_invalid_ratio {
            return Err(NodeError::fatal(format!(
                "{invalid}/{total} records failed validation (max ratio {})",
                config.max_invalid_ratio
            )));
        }
        if invalid > 0 {
            warn!(invalid, total, "dropped invalid records");
        }

        records::encode(&valid)
    }
}
