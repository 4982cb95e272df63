//! Terminal tasks of the cleaning graph.

use std::path::PathBuf;

use async_trait::async_trait;
use notify::NotificationChannel;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::records;
use crate::{ExecutableNode, ExecutionContext, NodeError};

/// Config of [`InsertToWarehouse`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarehouseConfig {
    /// Directory standing in for the warehouse table.
    #[serde(default)]
    pub table_dir: Option<PathBuf>,
}

/// Writes the final records to the warehouse directory, one JSON-lines
/// file per run, replacing any file an earlier attempt left behind.
pub struct InsertToWarehouse;

#[async_trait]
impl ExecutableNode for InsertToWarehouse {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: WarehouseConfig = ctx.config_as()?;
        let dir = config
            .table_dir
            .ok_or_else(|| NodeError::fatal("insert_to_warehouse requires `table_dir`"))?;
        let records = records::decode(&input)?;

        let mut body = String::new();
        for record in &records {
            body.push_str(&serde_json::to_string(record).map_err(NodeError::fatal)?);
            body.push('\n');
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| NodeError::retryable(format!("cannot create {}: {e}", dir.display())))?;
        let path = dir.join(format!("{}.jsonl", ctx.run_id));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| NodeError::retryable(format!("cannot write {}: {e}", path.display())))?;

        info!(inserted = records.len(), path = %path.display(), "records inserted");
        Ok(json!({ "inserted": records.len(), "path": path }))
    }
}

/// Posts a plain-text completion message for the run.
pub struct SendSuccessNotification {
    channel: NotificationChannel,
}

impl SendSuccessNotification {
    pub fn new(channel: NotificationChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ExecutableNode for SendSuccessNotification {
    async fn execute(&self, _input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let message = format!(
            ":white_check_mark: {} finished processing data for {}",
            ctx.graph,
            ctx.logical_date.format("%Y-%m-%d")
        );
        self.channel
            .send(message.clone())
            .await
            .map_err(NodeError::retryable)?;
        Ok(json!({ "sent": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx;
    use notify::NotifyConfig;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn insert_writes_one_file_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = json!([{ "id": "1", "text": "a" }, { "id": "2", "text": "b" }]);
        let ctx = ctx("insert_to_bigquery_task", json!({ "table_dir": dir.path() }));

        // Second attempt must overwrite, not append.
        InsertToWarehouse.execute(input.clone(), &ctx).await.unwrap();
        let out = InsertToWarehouse.execute(input, &ctx).await.unwrap();
        assert_eq!(out["inserted"], 2);

        let written =
            std::fs::read_to_string(dir.path().join(format!("{}.jsonl", ctx.run_id))).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[tokio::test]
    async fn insert_without_table_dir_is_fatal() {
        let err = InsertToWarehouse
            .execute(json!([]), &ctx("insert", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn failed_notification_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let channel = NotificationChannel::new(NotifyConfig::new(server.uri())).unwrap();

        let err = SendSuccessNotification::new(channel)
            .execute(Value::Null, &ctx("send_success_email_task", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Retryable(_)));
    }
}
