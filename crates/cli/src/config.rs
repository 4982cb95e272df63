//! `textflow.toml` — every section is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use engine::ExecutorConfig;
use nodes::builtin::filtering::{default_languages, MIN_WORDS};
use notify::NotifyConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub notify: NotifyConfig,
    pub executor: ExecutorSection,
    pub schedule: ScheduleSection,
    pub logs: LogsSection,
    pub data: DataSection,
}

impl PipelineConfig {
    /// Read and parse `path`, or use the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay_secs: 120,
        }
    }
}

impl From<&ExecutorSection> for ExecutorConfig {
    fn from(section: &ExecutorSection) -> Self {
        ExecutorConfig {
            retries: section.retries,
            retry_delay: Duration::from_secs(section.retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub start_date: DateTime<Utc>,
    pub period_hours: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            start_date: Utc
                .with_ymd_and_hms(2024, 10, 17, 0, 0, 0)
                .single()
                .unwrap_or_default(),
            period_hours: 24,
        }
    }
}

impl ScheduleSection {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    /// Prefix of the log links in run alerts.
    pub base_url: String,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// Raw JSON-lines records. Unset: records come from the run conf.
    pub input_path: Option<PathBuf>,
    pub warehouse_path: PathBuf,
    pub min_words: usize,
    pub min_date: Option<DateTime<Utc>>,
    pub max_date: Option<DateTime<Utc>>,
    /// ISO 639-3 codes kept by the language filter.
    pub languages: Vec<String>,
    pub min_language_confidence: Option<f64>,
    pub max_invalid_ratio: f64,
    pub blocklist: Vec<String>,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            input_path: None,
            warehouse_path: PathBuf::from("data/warehouse"),
            min_words: MIN_WORDS,
            min_date: None,
            max_date: None,
            languages: default_languages(),
            min_language_confidence: None,
            max_invalid_ratio: 0.2,
            blocklist: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.executor.retries, 1);
        assert_eq!(config.executor.retry_delay_secs, 120);
        assert_eq!(config.schedule.period(), Duration::from_secs(86_400));
        assert_eq!(config.schedule.start_date.to_rfc3339(), "2024-10-17T00:00:00+00:00");
        assert_eq!(config.data.min_words, 5);
        assert_eq!(config.data.languages, vec!["eng", "hin"]);
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [notify]
            webhook_url = "https://hooks.example.com/T000"

            [executor]
            retry_delay_secs = 5

            [data]
            input_path = "raw.jsonl"
            min_date = "2024-01-01T00:00:00Z"
            blocklist = ["badword"]
            languages = ["eng"]
            "#,
        )
        .unwrap();

        assert_eq!(config.notify.webhook_url.as_deref(), Some("https://hooks.example.com/T000"));
        assert_eq!(config.notify.timeout_secs, 30);
        let executor = ExecutorConfig::from(&config.executor);
        assert_eq!(executor.retries, 1);
        assert_eq!(executor.retry_delay, Duration::from_secs(5));
        assert_eq!(config.data.input_path, Some(PathBuf::from("raw.jsonl")));
        assert_eq!(config.data.blocklist, vec!["badword"]);
        assert_eq!(config.data.languages, vec!["eng"]);
        assert!(config.data.min_date.is_some());
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = PipelineConfig::load(Some(Path::new("/nonexistent/textflow.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/textflow.toml"));
    }
}
