use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::MessageId;

/// Maximum message length, counted in UTF-16 code units.
pub const MAX_TEXT_LEN: usize = 1000;

/// Color used when a sender doesn't pick one.
pub const DEFAULT_SENDER_COLOR: &str = "#128c7e";

/// A persisted chat message as clients see it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: String,
    pub sender_color: String,
    pub edited: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload of a send action, before the store assigns id and timestamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub text: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_color: Option<String>,
}

impl NewMessage {
    pub fn new(text: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: sender.into(),
            sender_color: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.sender_color = Some(color.into());
        self
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        validate_text(&self.text)?;
        if self.sender.is_empty() {
            return Err(RelayError::Validation("sender is required".into()));
        }
        Ok(())
    }

    /// The color to persist: the client's choice, or the default when unset or blank.
    pub fn sender_color_or_default(&self) -> &str {
        self.sender_color
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_SENDER_COLOR)
    }
}

/// Check a message body against the non-empty and length bounds.
pub fn validate_text(text: &str) -> Result<(), RelayError> {
    if text.is_empty() {
        return Err(RelayError::Validation("text is required".into()));
    }
    let len = text_len(text);
    if len > MAX_TEXT_LEN {
        return Err(RelayError::Validation(format!(
            "text is {len} units long, limit is {MAX_TEXT_LEN}"
        )));
    }
    Ok(())
}

/// Length in UTF-16 code units, the unit browsers count in.
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}
