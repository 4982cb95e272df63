//! The parallel filter branches of the validation graph and their join.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use whatlang::{Info, Lang};

use crate::records::{self, Record};
use crate::{ExecutableNode, ExecutionContext, NodeError};

/// Minimum number of words a record must contain.
pub const MIN_WORDS: usize = 5;

/// Config of [`FilterByWordCountAndDate`].
#[derive(Debug, Clone, Deserialize)]
pub struct WordCountDateConfig {
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    /// Records created before this instant are outdated.
    #[serde(default)]
    pub min_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_date: Option<DateTime<Utc>>,
}

fn default_min_words() -> usize {
    MIN_WORDS
}

impl Default for WordCountDateConfig {
    fn default() -> Self {
        Self {
            min_words: MIN_WORDS,
            min_date: None,
            max_date: None,
        }
    }
}

impl WordCountDateConfig {
    fn keeps(&self, record: &Record) -> bool {
        if record.word_count() < self.min_words {
            return false;
        }
        if self.min_date.is_none() && self.max_date.is_none() {
            return true;
        }
        // An undated record cannot be shown to be inside the window.
        let Some(created) = record.created_at else {
            return false;
        };
        self.min_date.map_or(true, |min| created >= min)
            && self.max_date.map_or(true, |max| created <= max)
    }
}

/// Removes short records and records outside the configured date window.
pub struct FilterByWordCountAndDate;

#[async_trait]
impl ExecutableNode for FilterByWordCountAndDate {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: WordCountDateConfig = ctx.config_as()?;
        let records = records::decode(&input)?;
        let before = records.len();
        let kept: Vec<Record> = records.into_iter().filter(|r| config.keeps(r)).collect();
        info!(before, after = kept.len(), "word count / date filter applied");
        records::encode(&kept)
    }
}

/// Config of [`FilterByLanguage`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// ISO 639-3 codes of the languages to keep.
    pub languages: Vec<String>,
    /// Detections below this confidence are treated as unrecognised.
    pub min_confidence: Option<f64>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            min_confidence: None,
        }
    }
}

/// English and Hindi.
pub fn default_languages() -> Vec<String> {
    vec!["eng".into(), "hin".into()]
}

impl LanguageConfig {
    fn allowed(&self) -> Result<HashSet<Lang>, NodeError> {
        self.languages
            .iter()
            .map(|code| {
                Lang::from_code(code)
                    .ok_or_else(|| NodeError::fatal(format!("unknown language code '{code}'")))
            })
            .collect()
    }
}

/// Detected language of `text`, if `whatlang` recognises one.
pub fn detect_language(text: &str) -> Option<Info> {
    whatlang::detect(text)
}

/// Drops records whose language is unrecognised or not in the allowlist.
pub struct FilterByLanguage;

#[async_trait]
impl ExecutableNode for FilterByLanguage {
    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let config: LanguageConfig = ctx.config_as()?;
        let allowed = config.allowed()?;
        let records = records::decode(&input)?;
        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| match detect_language(&r.text) {
                Some(info) => {
                    allowed.contains(&info.lang())
                        && config.min_confidence.map_or(true, |min| info.confidence() >= min)
                }
                None => false,
            })
            .collect();
        info!(before, after = kept.len(), "language filter applied");
        records::encode(&kept)
    }
}

/// Joins the filter branches: keeps the records of the first branch whose
/// id survived every other branch.
pub struct AggregateFiltered;

#[async_trait]
impl ExecutableNode for AggregateFiltered {
    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let Value::Array(branches) = input else {
            return Err(NodeError::fatal("aggregation expects one input per branch"));
        };
        let mut branches = branches.iter().map(records::decode);

        let Some(first) = branches.next() else {
            return Err(NodeError::fatal("aggregation received no branches"));
        };
        let mut kept = first?;

        for branch in branches {
            let ids: HashSet<String> = branch?.into_iter().map(|r| r.id).collect();
            kept.retain(|r| ids.contains(&r.id));
        }

        info!(count = kept.len(), "filter branches aggregated");
        records::encode(&kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx;
    use serde_json::json;

    #[tokio::test]
    async fn short_records_are_removed() {
        let input = json!([
            { "id": "1", "text": "one two three four five" },
            { "id": "2", "text": "too short" },
        ]);
        let out = FilterByWordCountAndDate
            .execute(input, &ctx("filter", Value::Null))
            .await
            .unwrap();
        let records = records::decode(&out).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
    }

    #[tokio::test]
    async fn outdated_and_undated_records_are_removed_when_window_set() {
        let input = json!([
            { "id": "old", "text": "a b c d e", "created_at": "2020-01-01T00:00:00Z" },
            { "id": "new", "text": "a b c d e", "created_at": "2024-06-01T00:00:00Z" },
            { "id": "undated", "text": "a b c d e" },
        ]);
        let config = json!({ "min_date": "2023-01-01T00:00:00Z" });
        let out = FilterByWordCountAndDate
            .execute(input, &ctx("filter", config))
            .await
            .unwrap();
        let ids: Vec<String> = records::decode(&out).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new"]);
    }

    #[test]
    fn detects_english_and_hindi() {
        let en = detect_language("My order has not arrived yet, please help me track it").unwrap();
        assert_eq!(en.lang(), Lang::Eng);
        let hi = detect_language("मेरा ऑर्डर अभी तक नहीं आया है कृपया मदद करें").unwrap();
        assert_eq!(hi.lang(), Lang::Hin);
        assert!(detect_language("12345 !!").is_none());
    }

    #[tokio::test]
    async fn records_outside_allowlist_are_removed() {
        let input = json!([
            { "id": "en", "text": "My order has not arrived yet, please help me track it" },
            { "id": "hi", "text": "मेरा ऑर्डर अभी तक नहीं आया है कृपया मदद करें" },
            { "id": "ru", "text": "Мой заказ до сих пор не пришёл, пожалуйста, помогите мне" },
            { "id": "digits", "text": "12345 !!" },
        ]);
        let out = FilterByLanguage
            .execute(input, &ctx("detect_language", Value::Null))
            .await
            .unwrap();
        let ids: Vec<String> = records::decode(&out).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["en", "hi"]);
    }

    #[tokio::test]
    async fn allowlist_comes_from_config() {
        let input = json!([
            { "id": "en", "text": "My order has not arrived yet, please help me track it" },
            { "id": "hi", "text": "मेरा ऑर्डर अभी तक नहीं आया है कृपया मदद करें" },
        ]);
        let config = json!({ "languages": ["hin"] });
        let out = FilterByLanguage
            .execute(input, &ctx("detect_language", config))
            .await
            .unwrap();
        let ids: Vec<String> = records::decode(&out).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["hi"]);
    }

    #[tokio::test]
    async fn unknown_language_code_is_fatal() {
        let err = FilterByLanguage
            .execute(json!([]), &ctx("detect_language", json!({ "languages": ["xx"] })))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn low_confidence_detections_are_removed() {
        let input = json!([{ "id": "en", "text": "My order has not arrived yet, please help me track it" }]);
        let config = json!({ "languages": ["eng"], "min_confidence": 1.01 });
        let out = FilterByLanguage
            .execute(input, &ctx("detect_language", config))
            .await
            .unwrap();
        assert!(records::decode(&out).unwrap().is_empty());
    }

    #[tokio::test]
    async fn aggregate_keeps_intersection_in_first_branch_order() {
        let input = json!([
            [{ "id": "a", "text": "x" }, { "id": "b", "text": "y" }, { "id": "c", "text": "z" }],
            [{ "id": "c", "text": "z" }, { "id": "a", "text": "x" }],
        ]);
        let out = AggregateFiltered
            .execute(input, &ctx("validation_aggregation", Value::Null))
            .await
            .unwrap();
        let ids: Vec<String> = records::decode(&out).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn aggregate_rejects_single_value() {
        let err = AggregateFiltered
            .execute(json!({ "id": "a" }), &ctx("validation_aggregation", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
