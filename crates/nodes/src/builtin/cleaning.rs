//! Text cleaning, de-identification and abuse removal.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::records::{self, Record};
use crate::{ExecutableNode, ExecutionContext, NodeError};

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+|www\.\S+").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").unwrap());
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

/// Strip URLs and markup and collapse whitespace.
pub fn clean_text(text: &str) -> String {
    let text = URL.replace_all(text, " ");
    let text = HTML_TAG.replace_all(&text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_owned()
}

/// Mask e-mail addresses, IPv4 addresses and phone numbers.
pub fn anonymize_text(text: &str) -> String {
    let text = EMAIL.replace_all(text, "[EMAIL]");
    let text = IPV4.replace_all(&text, "[IP]");
    PHONE.replace_all(&text, "[PHONE]").into_owned()
}

/// Cleans record text, then drops empty records and case-insensitive
/// duplicates (first occurrence wins).
pub struct CleanRecords;

#[async_trait]
impl ExecutableNode for CleanRecords {
    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let records = records::decode(&input)?;
        let before = records.len();

        let mut seen = HashSet::new();
        let cleaned: Vec<Record> = records
            .into_iter()
            .filter_map(|mut r| {
                r.text = clean_text(&r.text);
                let fresh = !r.text.is_empty() && seen.insert(r.text.to_lowercase());
                fresh.then_some(r)
            })
            .collect();

        info!(before, after = cleaned.len(), "records cleaned");
        records::encode(&cleaned)
    }
}

/// Replaces personal data in record text with placeholders.
pub struct AnonymizeSensitiveData;

#[async_trait]
impl ExecutableNode for AnonymizeSensitiveData {
    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let mut records = records::decode(&input)?;
        for record in &mut records {
            record.text = anonymize_text(&record.text);
        }
        records::encode(&records)
    }
}

/// Config of [`RemoveAbusiveData`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbuseConfig {
    /// Words (matched case-insensitively, whole word) that mark a record as abusive.
    #[serde(default)]
    pub blocklist: Vec<String>,
}

/// Drops records containing a blocklisted word.
pub struct RemoveAbusiveData;

#[async_trait]
impl ExecutableNode for RemoveAbusiveData {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: AbuseConfig = ctx.config_as()?;
        let records = records::decode(&input)?;
        if config.blocklist.is_empty() {
            return records::encode(&records);
        }

        let blocked: HashSet<String> = config
            .blocklist
            .iter()
            .map(|w| w.to_lowercase())
            .collect();

        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| {
                !r.text
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|w| !w.is_empty() && blocked.contains(&w.to_lowercase()))
            })
            .collect();

        info!(before, after = kept.len(), "abusive records removed");
        records::encode(&kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx;
    use serde_json::json;

    #[test]
    fn clean_text_strips_urls_and_tags() {
        assert_eq!(
            clean_text("<p>see   https://example.com/x now</p>\n"),
            "see now"
        );
    }

    #[test]
    fn anonymize_masks_contact_details() {
        let text = "mail jane.doe@example.org or call +1 (555) 123-4567 from 10.0.0.1";
        assert_eq!(
            anonymize_text(text),
            "mail [EMAIL] or call [PHONE] from [IP]"
        );
    }

    #[tokio::test]
    async fn clean_dedupes_case_insensitively() {
        let input = json!([
            { "id": "1", "text": "Hello   World" },
            { "id": "2", "text": "hello world" },
            { "id": "3", "text": "<br>" },
        ]);
        let out = CleanRecords
            .execute(input, &ctx("datacleaning_process", Value::Null))
            .await
            .unwrap();
        let records = records::decode(&out).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "Hello World");
    }

    #[tokio::test]
    async fn blocklisted_words_remove_records() {
        let input = json!([
            { "id": "1", "text": "you are a Jerk!" },
            { "id": "2", "text": "jerky is a snack" },
        ]);
        let out = RemoveAbusiveData
            .execute(input, &ctx("remove_abusive", json!({ "blocklist": ["jerk"] })))
            .await
            .unwrap();
        let ids: Vec<String> = records::decode(&out).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["2"]);
    }
}
