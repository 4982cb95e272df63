//! Notification error type.

use thiserror::Error;

/// Errors raised while delivering a status message.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP request could not be sent or no response arrived.
    #[error("webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("webhook returned an error {status}, the response is: {body}")]
    Status { status: u16, body: String },

    /// The payload could not be encoded.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP client could not be built from the configuration.
    #[error("invalid notification config: {0}")]
    Config(String),
}
