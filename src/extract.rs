//! Locating the textual payload in provider replies.
//!
//! Replies present text under several alternate shapes depending on the
//! provider and API version: a direct `output_text`/`text` field, a nested
//! `message`/`content`/`parts` array, or a bare string entry. The helpers
//! here return the first non-empty text found, in a fixed shape order.

use serde_json::Value;

/// Fields that may hold text directly on a reply or output item.
const TEXT_FIELDS: [&str; 2] = ["output_text", "text"];

/// Fields that may nest further text-bearing values.
const NESTED_FIELDS: [&str; 4] = ["message", "content", "parts", "output"];

/// First non-empty textual payload of a single output item.
pub fn item_text(item: &Value) -> Option<String> {
    match item {
        Value::String(text) => non_empty(text),
        Value::Array(entries) => entries.iter().find_map(item_text),
        Value::Object(map) => TEXT_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(item_text)
            .or_else(|| {
                NESTED_FIELDS
                    .iter()
                    .filter_map(|field| map.get(*field))
                    .find_map(item_text)
            }),
        _ => None,
    }
}

/// First non-empty textual payload of a whole reply body.
///
/// Function-call items are skipped so argument strings are never mistaken
/// for text. Gemini `candidates` and chat-completions `choices` are covered
/// alongside the Responses API shapes.
pub fn reply_text(reply: &Value) -> Option<String> {
    if let Some(text) = reply.get("output_text").and_then(item_text) {
        return Some(text);
    }

    for container in ["output", "candidates", "choices"] {
        if let Some(Value::Array(items)) = reply.get(container) {
            if let Some(text) = items.iter().filter(|item| !is_function_call(item)).find_map(item_text) {
                return Some(text);
            }
        }
    }

    match reply {
        Value::String(_) | Value::Array(_) => item_text(reply),
        _ => reply.get("text").and_then(item_text),
    }
}

fn is_function_call(item: &Value) -> bool {
    matches!(
        item.get("type").and_then(Value::as_str),
        Some("function_call") | Some("tool_call")
    ) || item.get("functionCall").is_some()
}

fn non_empty(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
