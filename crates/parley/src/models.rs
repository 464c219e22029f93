//! Conversation data models.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Unknown message role: {}", s)),
        }
    }
}

impl MessageRole {
    /// Label used when rendering continuity context for the model.
    pub fn context_label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// A named thread of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque identifier assigned by the log.
    pub id: String,
    /// Display title (mutable).
    pub title: String,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// Whether the conversation is pinned in listings.
    #[serde(default)]
    pub pinned: bool,
}

/// A reference to an uploaded binary file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Retrievable URL for the stored object.
    pub url: String,
    /// Original filename.
    pub name: String,
    /// Declared media type.
    pub media_type: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// One turn's content within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque identifier. Durable messages get theirs from the log; the
    /// transient streaming placeholder carries a synthetic `temp-` id.
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Set when the content was edited in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Marks the client-local streaming placeholder. Never persisted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl Message {
    /// Render this message as one continuity-context line.
    pub fn context_line(&self) -> String {
        format!("{}: {}", self.role.context_label(), self.content)
    }
}

/// Input for appending a message to the log. The log assigns the
/// identifier and creation timestamp on commit.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Partial update applied to a durable message.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    /// Replacement content.
    pub content: Option<String>,
}

impl MessagePatch {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
        }
    }
}

/// Synthesize an identifier for the transient streaming placeholder.
///
/// The `temp-` prefix keeps placeholder ids disjoint from durable
/// UUID-assigned ids, so a merge can tell them apart.
pub fn temp_message_id() -> String {
    format!("temp-{}", Uuid::new_v4())
}

/// Derive a conversation title from the first message text.
///
/// Takes the first `limit` characters (not bytes, so multi-byte text
/// truncates cleanly) and appends an ellipsis when truncated.
pub fn derive_title(text: &str, limit: usize) -> String {
    let mut title: String = text.chars().take(limit).collect();
    if text.chars().count() > limit {
        title.push_str("...");
    }
    title
}
