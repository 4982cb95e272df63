//! The text record flowing through the preprocessing graphs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::NodeError;

/// One textual training record.
///
/// Unknown fields are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            label: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Decode a staged list of records.
///
/// # Errors
/// `Fatal` when nothing was staged (`null`) or the value is not a record list.
pub fn decode(input: &Value) -> Result<Vec<Record>, NodeError> {
    if input.is_null() {
        return Err(NodeError::fatal("no records were staged for this task"));
    }
    serde_json::from_value(input.clone())
        .map_err(|e| NodeError::fatal(format!("staged value is not a record list: {e}")))
}

/// Encode records for staging.
pub fn encode(records: &[Record]) -> Result<Value, NodeError> {
    serde_json::to_value(records).map_err(NodeError::fatal)
}
