//! Reqwest-backed webhook channel.

use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, warn};

use crate::{ComponentAlert, NotifyConfig, NotifyError, Payload, TRACING_TARGET};

/// What a caller wants to happen when a delivery fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Return the error to the caller.
    Strict,
    /// Log the error and carry on.
    BestEffort,
}

struct ChannelInner {
    http: Client,
    config: NotifyConfig,
}

/// Posts [`Payload`]s to the configured webhook.
///
/// Cheap to clone; clones share one HTTP connection pool.
#[derive(Clone)]
pub struct NotificationChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl NotificationChannel {
    /// Build a channel from configuration.
    ///
    /// # Errors
    /// [`NotifyError::Config`] if the HTTP client cannot be constructed.
    pub fn new(config: NotifyConfig) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(config.effective_timeout())
            .user_agent(config.effective_user_agent())
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;

        debug!(
            target: TRACING_TARGET,
            enabled = config.webhook_url.is_some(),
            "notification channel created"
        );

        Ok(Self {
            inner: Arc::new(ChannelInner { http, config }),
        })
    }

    /// A channel with no endpoint; every delivery is a no-op.
    pub fn disabled() -> Result<Self, NotifyError> {
        Self::new(NotifyConfig::default())
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.inner.config
    }

    /// POST `payload` to the webhook.
    ///
    /// # Errors
    /// [`NotifyError::Transport`] when the request fails, and
    /// [`NotifyError::Status`] for any non-2xx answer. Nothing is retried.
    pub async fn deliver(&self, payload: &Payload) -> Result<(), NotifyError> {
        let Some(url) = self.inner.config.webhook_url.as_deref() else {
            debug!(target: TRACING_TARGET, "no webhook configured, dropping message");
            return Ok(());
        };

        let body = serde_json::to_vec(payload)?;
        let response = self
            .inner
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(target: TRACING_TARGET, status = status.as_u16(), "webhook delivered");
        Ok(())
    }

    /// Deliver `payload`, applying `policy` to any failure. Only a strict
    /// delivery can return an error.
    pub async fn dispatch(
        &self,
        payload: &Payload,
        policy: DeliveryPolicy,
    ) -> Result<(), NotifyError> {
        match policy {
            DeliveryPolicy::Strict => self.deliver(payload).await,
            DeliveryPolicy::BestEffort => {
                self.deliver_best_effort(payload).await;
                Ok(())
            }
        }
    }

    async fn deliver_best_effort(&self, payload: &Payload) {
        if let Err(e) = self.deliver(payload).await {
            warn!(target: TRACING_TARGET, error = %e, "notification dropped");
        }
    }

    /// Send a simple `{text}` alert. Failures are returned to the caller.
    pub async fn send(&self, message: impl Into<String>) -> Result<(), NotifyError> {
        self.dispatch(&Payload::text(message), DeliveryPolicy::Strict)
            .await
    }

    /// Send an attachment-style component alert. Failures are only logged.
    pub async fn send_component_alert(&self, alert: &ComponentAlert) {
        self.deliver_best_effort(&alert.to_payload()).await;
    }
}
