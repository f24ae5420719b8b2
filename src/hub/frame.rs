//! Wire envelope exchanged over the real-time channel.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};

/// Serialized frame as queued for delivery. Cheap to clone.
pub type Payload = Utf8Bytes;

/// Author id used for model replies.
pub const ASSISTANT_ID: &str = "assistant";

/// Kind of frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// A chat turn (user or assistant).
    Message,
    /// Presence and lifecycle notifications.
    Status,
    /// A failed turn.
    Error,
}

/// Envelope `{type, content, user_id?, session_id?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: FrameKind,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Author id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Frame {
    fn new(kind: FrameKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            user_id: None,
            session_id: None,
        }
    }

    /// A `message` frame without author.
    #[must_use]
    pub fn message(content: impl Into<String>) -> Self {
        Self::new(FrameKind::Message, content)
    }

    /// A `message` frame authored by the assistant.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            user_id: Some(ASSISTANT_ID.to_string()),
            ..Self::new(FrameKind::Message, content)
        }
    }

    /// A `status` frame.
    #[must_use]
    pub fn status(content: impl Into<String>) -> Self {
        Self::new(FrameKind::Status, content)
    }

    /// An `error` frame.
    #[must_use]
    pub fn error(content: impl Into<String>) -> Self {
        Self::new(FrameKind::Error, content)
    }

    /// Parse a frame from JSON text.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Overwrite author and session with the connection's own identifiers.
    #[must_use]
    pub fn stamped(mut self, client_id: &str, session_id: &str) -> Self {
        self.user_id = Some(client_id.to_string());
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Attach a session id.
    #[must_use]
    pub fn in_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Serialize for delivery.
    pub fn to_payload(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}
