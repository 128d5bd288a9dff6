//! Conversation store: the single owner of conversations and messages.
//!
//! Every mutation rewrites the full list to the local store. Writes are best
//! effort: a failed write is logged and the in-memory state stays
//! authoritative. Operations on unknown ids are silent no-ops.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use wgpt_core::types::{Conversation, Message};
use wgpt_storage::{keys, LocalStore};

use crate::error::ChatError;
use crate::persistence;

/// Longest auto-derived title, in characters, before the ellipsis.
pub const TITLE_MAX_CHARS: usize = 50;

/// Title for a conversation whose first message is `content`.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

/// Fields to merge into a conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub messages: Option<Vec<Message>>,
    pub title: Option<String>,
}

pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active_id: Option<String>,
    backend: Arc<dyn LocalStore>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations.len())
            .field("active_id", &self.active_id)
            .finish()
    }
}

impl ConversationStore {
    /// Restore conversations from `backend`. The most recent conversation
    /// becomes active.
    pub fn load(backend: Arc<dyn LocalStore>) -> Self {
        let conversations = match backend.get(keys::CONVERSATIONS) {
            Ok(Some(raw)) => persistence::decode(&raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored conversations; starting empty");
                Vec::new()
            }
        };
        let active_id = conversations.first().map(|c| c.id.clone());
        info!(count = conversations.len(), "Conversations loaded");

        Self {
            conversations,
            active_id,
            backend,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Most recently created first.
    pub fn list_conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    /// Case-insensitive substring match on titles, whitespace included. An
    /// empty query matches everything.
    pub fn search_conversations(&self, query: &str) -> Vec<&Conversation> {
        let needle = query.to_lowercase();
        self.conversations
            .iter()
            .filter(|c| c.title.to_lowercase().contains(&needle))
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Make `id` the active conversation.
    pub fn select_conversation(&mut self, id: &str) -> Result<(), ChatError> {
        if self.get(id).is_none() {
            return Err(ChatError::conversation_not_found(id));
        }
        self.active_id = Some(id.to_string());
        Ok(())
    }

    /// Prepend an empty conversation and make it active.
    pub fn create_conversation(&mut self) -> &Conversation {
        let conv = Conversation::new();
        info!(conversation_id = %conv.id, "Conversation created");
        self.active_id = Some(conv.id.clone());
        self.conversations.insert(0, conv);
        self.persist();
        &self.conversations[0]
    }

    /// Remove a conversation. If it was active, the new head of the list
    /// becomes active.
    pub fn delete_conversation(&mut self, id: &str) -> Option<Conversation> {
        let Some(pos) = self.conversations.iter().position(|c| c.id == id) else {
            debug!(conversation_id = %id, "Delete ignored: unknown conversation");
            return None;
        };
        let removed = self.conversations.remove(pos);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.conversations.first().map(|c| c.id.clone());
        }
        info!(conversation_id = %id, "Conversation deleted");
        self.persist();
        Some(removed)
    }

    /// Merge `update` into a conversation and refresh `updated_at`.
    pub fn update_conversation(&mut self, id: &str, update: ConversationUpdate) {
        if self.with_conversation(id, |conv| {
            if let Some(messages) = update.messages {
                conv.messages = messages;
            }
            if let Some(title) = update.title {
                conv.title = title;
            }
        }) {
            self.persist();
        }
    }

    /// Append one message. The title is derived from it when the
    /// conversation was still empty.
    pub fn append_message(&mut self, id: &str, message: Message) {
        let message_id = message.id.clone();
        if self.with_conversation(id, |conv| {
            if conv.messages.is_empty() {
                conv.title = derive_title(&message.content);
            }
            conv.messages.push(message);
        }) {
            debug!(conversation_id = %id, message_id = %message_id, "Message appended");
            self.persist();
        }
    }

    pub fn rename_conversation(&mut self, id: &str, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        self.update_conversation(
            id,
            ConversationUpdate {
                title: Some(title.to_string()),
                ..Default::default()
            },
        );
    }

    /// Replace a message's content and drop every message after it.
    ///
    /// The edited message keeps its id and timestamp. Returns the dropped
    /// messages, or `None` when either id is unknown.
    pub fn edit_message(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        new_content: &str,
    ) -> Option<Vec<Message>> {
        let Some(conv) = self.conversations.iter_mut().find(|c| c.id == conversation_id) else {
            debug!(conversation_id = %conversation_id, "Edit ignored: unknown conversation");
            return None;
        };
        let Some(pos) = conv.position_of(message_id) else {
            debug!(message_id = %message_id, "Edit ignored: unknown message");
            return None;
        };

        let removed = conv.messages.split_off(pos + 1);
        conv.messages[pos].content = new_content.to_string();
        conv.updated_at = Utc::now();
        info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            removed = removed.len(),
            "Message edited"
        );
        self.persist();
        Some(removed)
    }

    /// Drop every conversation and the stored copy.
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.active_id = None;
        if let Err(e) = self.backend.remove(keys::CONVERSATIONS) {
            warn!(error = %e, "Failed to remove stored conversations");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply `f` to conversation `id` and stamp `updated_at`. Returns whether
    /// the conversation exists.
    fn with_conversation<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Conversation),
    {
        match self.conversations.iter_mut().find(|c| c.id == id) {
            Some(conv) => {
                f(conv);
                conv.updated_at = Utc::now();
                true
            }
            None => {
                debug!(conversation_id = %id, "Update ignored: unknown conversation");
                false
            }
        }
    }

    fn persist(&self) {
        let result = persistence::encode(&self.conversations)
            .and_then(|raw| self.backend.set(keys::CONVERSATIONS, &raw));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist conversations");
        }
    }
}
