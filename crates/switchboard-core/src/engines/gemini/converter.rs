//! Gemini event converter.
//!
//! Stateless: every event stands on its own. Streaming deltas are forwarded
//! one by one, flagged with `engine_metadata.delta = true` so the UI can
//! append them to the message it is already rendering.

use serde_json::{json, Value};

use super::types::{GeminiEvent, GeminiToolCall};
use crate::engines::{Engine, EngineConverter};
use crate::message::{CanonicalMessage, ContentBlock, MessageType};
use crate::usage::Usage;

#[derive(Debug, Default)]
pub struct GeminiConverter;

impl GeminiConverter {
    pub fn new() -> Self {
        Self
    }

    fn translate(&self, event: GeminiEvent) -> Option<CanonicalMessage> {
        let timestamp = event.timestamp.clone();
        let session_id = event.session_id.clone();
        let event_type = event.event_type.clone();

        let message = match event_type.as_str() {
            // ---- stream events ----
            "init" => {
                let mut msg = CanonicalMessage::new(MessageType::System).subtype("init");
                if let Some(model) = event.model {
                    msg.set_meta("model", Value::String(model));
                }
                Some(msg)
            }
            "message" => {
                let kind = match event.role.as_deref() {
                    Some("user") => MessageType::User,
                    Some("assistant") => MessageType::Assistant,
                    _ => return None,
                };
                let text = content_text(event.content.as_ref())?;
                let msg = CanonicalMessage::with_text(kind, text);
                if event.delta == Some(true) {
                    Some(msg.meta("delta", Value::Bool(true)))
                } else {
                    Some(msg)
                }
            }
            "tool_use" => {
                let tool_name = event.tool_name?;
                Some(
                    CanonicalMessage::new(MessageType::ToolUse).block(ContentBlock::ToolUse {
                        id: event.tool_id.unwrap_or_default(),
                        name: normalize_tool_name(&tool_name),
                        input: event.parameters.unwrap_or_else(|| json!({})),
                    }),
                )
            }
            "tool_result" => {
                let is_error = event.status.as_deref() == Some("error");
                let content = if is_error {
                    error_text(event.error.as_ref()).unwrap_or_default()
                } else {
                    event.output.unwrap_or_default()
                };
                Some(
                    CanonicalMessage::new(MessageType::User).block(ContentBlock::ToolResult {
                        tool_use_id: event.tool_id.unwrap_or_default(),
                        content,
                        is_error,
                    }),
                )
            }
            "error" => {
                let text = event
                    .message
                    .or_else(|| error_text(event.error.as_ref()))
                    .or_else(|| content_text(event.content.as_ref()))
                    .unwrap_or_default();
                Some(CanonicalMessage::with_text(MessageType::System, text).subtype("error"))
            }
            "result" => {
                let subtype = match event.status.as_deref() {
                    Some("error") => "error",
                    _ => "success",
                };
                let mut msg = CanonicalMessage::new(MessageType::Result)
                    .subtype(subtype)
                    .usage(event.stats.as_ref().and_then(Usage::from_value));
                if let Some(stats) = event.stats {
                    msg.set_meta("stats", stats);
                }
                Some(msg)
            }

            // ---- saved chat records ----
            "user" => {
                let text = content_text(event.content.as_ref())?;
                Some(CanonicalMessage::with_text(MessageType::User, text))
            }
            "gemini" => Some(saved_turn(event)),
            "info" => {
                let text = content_text(event.content.as_ref()).unwrap_or_default();
                Some(CanonicalMessage::with_text(MessageType::System, text).subtype("info"))
            }

            other => {
                log::debug!("[gemini] skipping event type {other}");
                None
            }
        };

        message.map(|m| m.session(session_id).at(timestamp))
    }
}

impl EngineConverter for GeminiConverter {
    fn engine(&self) -> Engine {
        Engine::Gemini
    }

    fn convert_value(&mut self, value: &Value) -> Option<CanonicalMessage> {
        let event: GeminiEvent = match serde_json::from_value(value.clone()) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[gemini] skipping unreadable event: {e}");
                return None;
            }
        };
        self.translate(event)
    }
}

/// A saved model turn. Thoughts alone make a thinking message; otherwise the
/// text and tool calls are combined and thoughts go to metadata.
fn saved_turn(event: GeminiEvent) -> CanonicalMessage {
    let text = content_text(event.content.as_ref()).unwrap_or_default();
    let tool_calls = event.tool_calls.unwrap_or_default();
    let thoughts = event.thoughts.unwrap_or_default();

    if text.is_empty() && tool_calls.is_empty() && !thoughts.is_empty() {
        let joined = thoughts
            .iter()
            .map(|t| format!("{}: {}", t.subject, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        return CanonicalMessage::with_text(MessageType::Thinking, joined);
    }

    let mut msg = CanonicalMessage::new(MessageType::Assistant);
    if !text.is_empty() {
        msg = msg.block(ContentBlock::text(text));
    }
    for call in &tool_calls {
        msg = msg.block(tool_call_block(call));
    }
    if !thoughts.is_empty() {
        let subjects: Vec<Value> = thoughts.iter().map(|t| json!(t.subject)).collect();
        msg.set_meta("thoughts", Value::Array(subjects));
    }
    if let Some(tokens) = event.tokens {
        msg.set_meta("tokens", tokens);
    }
    if let Some(model) = event.model {
        msg.set_meta("model", Value::String(model));
    }
    msg
}

fn tool_call_block(call: &GeminiToolCall) -> ContentBlock {
    ContentBlock::ToolUse {
        id: call.id.clone(),
        name: normalize_tool_name(&call.name),
        input: call.args.clone().unwrap_or_else(|| json!({})),
    }
}

/// Content is a plain string on stream events and a part list in newer
/// saved chats.
fn content_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("");
            Some(text)
        }
        _ => None,
    }
}

fn error_text(error: Option<&Value>) -> Option<String> {
    match error? {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Map Gemini tool names onto the names the other engines use.
fn normalize_tool_name(gemini_name: &str) -> String {
    match gemini_name.to_lowercase().as_str() {
        "shell" | "run_shell_command" => "Bash".to_string(),
        "write_file" => "Write".to_string(),
        "edit_file" | "replace" => "Edit".to_string(),
        "read_file" | "read_many_files" => "Read".to_string(),
        "search" | "grep" | "search_file_content" => "Grep".to_string(),
        "glob" => "Glob".to_string(),
        "fetch" | "web_fetch" => "WebFetch".to_string(),
        "google_web_search" => "WebSearch".to_string(),
        "list_directory" => "ListDir".to_string(),
        _ => {
            let mut chars = gemini_name.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        }
    }
}
