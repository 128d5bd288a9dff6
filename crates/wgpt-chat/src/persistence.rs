//! Serialized form of the conversation list.
//!
//! Writing uses the derived serde representation. Reading is lenient: the
//! stored text may come from an older client or have been hand-edited, so
//! each conversation and message is rebuilt field by field and anything
//! unusable is skipped rather than failing the whole load.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use wgpt_core::error::WgptError;
use wgpt_core::types::{new_id, AttachmentRef, Conversation, Message, Role, DEFAULT_TITLE};

/// Serialize conversations with instants as RFC 3339 strings.
pub fn encode(conversations: &[Conversation]) -> Result<String, WgptError> {
    Ok(serde_json::to_string(conversations)?)
}

/// Rebuild conversations from stored text.
///
/// Text that is not a JSON array yields an empty list.
pub fn decode(raw: &str) -> Vec<Conversation> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Stored conversations are not valid JSON; starting empty");
            return Vec::new();
        }
    };
    let Some(items) = value.as_array() else {
        warn!("Stored conversations are not a list; starting empty");
        return Vec::new();
    };

    let conversations: Vec<Conversation> = items.iter().filter_map(decode_conversation).collect();
    if conversations.len() != items.len() {
        warn!(
            stored = items.len(),
            restored = conversations.len(),
            "Skipped malformed conversations"
        );
    }
    conversations
}

fn decode_conversation(value: &Value) -> Option<Conversation> {
    let id = non_empty_str(value.get("id")?)?.to_string();
    let now = Utc::now();
    let created_at = value.get("createdAt").and_then(parse_instant).unwrap_or(now);
    let updated_at = value
        .get("updatedAt")
        .and_then(parse_instant)
        .unwrap_or(created_at);
    let title = value
        .get("title")
        .and_then(non_empty_str)
        .unwrap_or(DEFAULT_TITLE)
        .to_string();
    let messages = value
        .get("messages")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| decode_message(m, updated_at))
                .collect()
        })
        .unwrap_or_default();

    Some(Conversation {
        id,
        title,
        messages,
        created_at,
        updated_at,
    })
}

fn decode_message(value: &Value, fallback_time: DateTime<Utc>) -> Option<Message> {
    let role = Role::parse(value.get("role")?.as_str()?)?;
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let id = value
        .get("id")
        .and_then(non_empty_str)
        .map(str::to_string)
        .unwrap_or_else(|| new_id("msg"));
    let timestamp = value
        .get("timestamp")
        .and_then(parse_instant)
        .unwrap_or(fallback_time);
    let attachments = value
        .get("images")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(decode_attachment).collect())
        .unwrap_or_default();

    Some(Message {
        id,
        content,
        role,
        timestamp,
        attachments,
    })
}

fn decode_attachment(value: &Value) -> Option<AttachmentRef> {
    Some(AttachmentRef {
        id: value.get("id")?.as_str()?.to_string(),
        url: value
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.trim().is_empty())
}
