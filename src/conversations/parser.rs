// src/conversations/parser.rs
// Parses chat session payloads into user-prompt/assistant-response
// exchanges. Filtering rules mirror what assistants actually emit: tool
// results and injected system context are not conversation.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Truncation cap for prompts and responses.
pub const MAX_FIELD_CHARS: usize = 2000;

/// Marker used by wrappers that embed the real user text in a larger
/// scaffold message. The suffix after the LAST occurrence is the prompt.
const USER_MESSAGE_MARKER: &str = "\nUser message: ";

/// A user-prompt/assistant-response pair derived from a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    /// "{sessionId}-{messageIndex}"
    pub id: String,
    pub session_id: String,
    pub project: String,
    pub user_prompt: String,
    pub assistant_response: String,
    /// RFC3339
    pub timestamp: String,
    pub message_index: usize,
}

/// Raw session payload as pushed by sync clients.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSession {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(alias = "type")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Deterministic 32-bit rolling hash over the payload bytes. Used for
/// change detection only.
pub fn session_hash(payload: &str) -> String {
    let mut hash: u32 = 0;
    for byte in payload.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }
    format!("{hash:08x}")
}

/// Walk the message list in order and emit an exchange for every eligible
/// user message that is followed by an assistant message.
pub fn parse_exchanges(session: &RawSession, session_id: &str) -> Vec<Exchange> {
    let project = session.project.as_deref().unwrap_or("unknown");
    let mut exchanges = Vec::new();

    for (index, message) in session.messages.iter().enumerate() {
        if message.role.as_deref() != Some("user") {
            continue;
        }
        let Some(content) = message.content.as_str() else {
            continue;
        };
        if !is_eligible_user_content(content) {
            continue;
        }

        let user_prompt = extract_user_text(content);

        // The response is the next assistant message, if any.
        let Some(assistant) = session.messages[index + 1..]
            .iter()
            .find(|m| m.role.as_deref() == Some("assistant"))
        else {
            continue;
        };
        let assistant_response = assistant_text(&assistant.content);

        let timestamp = message
            .timestamp
            .clone()
            .or_else(|| session.created_at.clone())
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        exchanges.push(Exchange {
            id: format!("{session_id}-{index}"),
            session_id: session_id.to_string(),
            project: project.to_string(),
            user_prompt: truncate_chars(user_prompt, MAX_FIELD_CHARS),
            assistant_response: truncate_chars(&assistant_response, MAX_FIELD_CHARS),
            timestamp,
            message_index: index,
        });
    }

    exchanges
}

/// A user message is conversation when it is neither a tool result nor
/// injected system context, and long enough to mean something.
fn is_eligible_user_content(content: &str) -> bool {
    if content.len() < 5 {
        return false;
    }
    let is_tool_result = content.contains("<tool_result>")
        || content.contains("tool_use_id")
        || content.starts_with("{\"type\":\"tool_result\"");
    if is_tool_result {
        return false;
    }
    let is_system_context = content.starts_with("<current_time>")
        || content.starts_with("<system-reminder>")
        || content.starts_with("# Agent Context")
        || content.contains("<state_files>")
        || content.contains("<context_status>");
    !is_system_context
}

/// Take the suffix after the last wrapper marker, or the content verbatim.
fn extract_user_text(content: &str) -> &str {
    match content.rfind(USER_MESSAGE_MARKER) {
        Some(pos) => &content[pos + USER_MESSAGE_MARKER.len()..],
        None => content,
    }
}

/// Assistant content is either a plain string or a block array; use the
/// first text block.
fn assistant_text(content: &serde_json::Value) -> String {
    if let Some(text) = content.as_str() {
        return text.to_string();
    }
    if let Some(blocks) = content.as_array() {
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    return text.to_string();
                }
            }
        }
    }
    String::new()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
