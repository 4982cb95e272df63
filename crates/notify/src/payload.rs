//! JSON bodies accepted by the messaging webhook.

use serde::{Deserialize, Serialize};

/// Colour of a successful component alert.
pub const SUCCESS_COLOR: &str = "#36a64f";
/// Colour of a failed component alert.
pub const FAILURE_COLOR: &str = "FF0000";

/// Body posted to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// `{"text": ...}` simple alert.
    Text { text: String },
    /// `{"attachments": [...]}` component-level alert.
    Attachments { attachments: Vec<Attachment> },
}

impl Payload {
    pub fn text(message: impl Into<String>) -> Self {
        Self::Text {
            text: message.into(),
        }
    }
}

/// One attachment block of a component alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub color: String,
    pub pretext: String,
    pub fields: Vec<AttachmentField>,
}

/// A title/value pair rendered inside an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl AttachmentField {
    pub fn short(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
            short: true,
        }
    }
}

/// Status report of a single pipeline component (e.g. the data-prep step).
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentAlert {
    pub component: String,
    pub message: String,
    pub execution_date: String,
    pub execution_time: String,
    pub duration_minutes: f64,
    pub success: bool,
}

impl ComponentAlert {
    /// Render into the attachment-style webhook body.
    pub fn to_payload(&self) -> Payload {
        let (color, marker) = if self.success {
            (SUCCESS_COLOR, ":large_green_circle:")
        } else {
            (FAILURE_COLOR, ":large_red_circle:")
        };

        Payload::Attachments {
            attachments: vec![Attachment {
                color: color.to_owned(),
                pretext: format!("{marker} {}", self.message),
                fields: vec![
                    AttachmentField::short("Component Name", &self.component),
                    AttachmentField::short("Execution Date", &self.execution_date),
                    AttachmentField::short("Execution Time", &self.execution_time),
                    AttachmentField::short(
                        "Duration",
                        format!("{} minutes", self.duration_minutes),
                    ),
                ],
            }],
        }
    }
}
