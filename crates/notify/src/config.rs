//! Notification channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for webhook requests: 30 seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where and how status messages are posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Incoming-webhook URL. `None` disables delivery entirely.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header to send with requests.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_timeout_secs(),
            user_agent: None,
        }
    }
}

impl NotifyConfig {
    /// Configuration posting to the given webhook URL.
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: Some(webhook_url.into()),
            ..Self::default()
        }
    }

    /// Returns the effective timeout, using the default if zero.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    /// Returns the effective user agent, using the crate default if not set.
    pub fn effective_user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("textflow/{}", env!("CARGO_PKG_VERSION")))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}
