//! `notify` crate — posts pipeline status messages to a messaging webhook.
//!
//! The webhook endpoint is never global: build a [`NotificationChannel`]
//! from a [`NotifyConfig`] and hand it to whoever needs to report status.

pub mod channel;
pub mod config;
pub mod error;
pub mod payload;

pub use channel::{DeliveryPolicy, NotificationChannel};
pub use config::NotifyConfig;
pub use error::NotifyError;
pub use payload::{Attachment, AttachmentField, ComponentAlert, Payload};

/// Tracing target shared by everything in this crate.
pub const TRACING_TARGET: &str = "notify";
