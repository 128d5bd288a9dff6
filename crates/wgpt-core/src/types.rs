use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to a conversation before its first message.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Generate an opaque identifier such as `msg_3f2a...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

// =============================================================================
// Enums
// =============================================================================

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Parse the persisted role name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

// =============================================================================
// Domain structs
// =============================================================================

/// Attachment as recorded on a sent user message.
///
/// `url` is an ephemeral display reference; it stops resolving once the
/// owning handle is released.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub url: String,
    pub name: String,
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    /// Persisted under `images` to stay readable by older clients.
    #[serde(rename = "images", default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

impl Message {
    /// Create a user message stamped with the current time.
    pub fn user(content: impl Into<String>, attachments: Vec<AttachmentRef>) -> Self {
        Self {
            id: new_id("msg"),
            content: content.into(),
            role: Role::User,
            timestamp: Utc::now(),
            attachments,
        }
    }

    /// Create an assistant message stamped with the current time.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: new_id("msg"),
            content: content.into(),
            role: Role::Assistant,
            timestamp: Utc::now(),
            attachments: Vec::new(),
        }
    }
}

/// A conversation: ordered messages plus metadata.
///
/// Message order is insertion order and is exactly the history sent to the
/// completion service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation titled "New Chat".
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_id("conv"),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Position of a message by id.
    pub fn position_of(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Locally stored identity of the signed-in user.
///
/// Owned by the authentication flow; the chat client only reads it for
/// display and clears it on logout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub email: String,
}
