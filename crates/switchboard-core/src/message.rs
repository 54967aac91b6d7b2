//! Canonical message shape shared by every engine.
//!
//! Converters, the history loader and the live connection all produce
//! `CanonicalMessage` values. The UI layer only ever sees this type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::usage::Usage;

/// Errors raised while building a canonical message from raw JSON.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// The closed set of message types the UI understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
    Result,
    Summary,
    Thinking,
    ToolUse,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
            MessageType::Result => "result",
            MessageType::Summary => "summary",
            MessageType::Thinking => "thinking",
            MessageType::ToolUse => "tool_use",
        }
    }
}

impl FromStr for MessageType {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageType::User),
            "assistant" => Ok(MessageType::Assistant),
            "system" => Ok(MessageType::System),
            "result" => Ok(MessageType::Result),
            "summary" => Ok(MessageType::Summary),
            "thinking" => Ok(MessageType::Thinking),
            "tool_use" => Ok(MessageType::ToolUse),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Parse a single raw block.
    ///
    /// Returns `None` for block types outside text / tool_use / tool_result
    /// (images, thinking, etc.). Thinking is handled by the caller.
    fn from_value(value: &Value) -> Option<Self> {
        let block_type = value.get("type").and_then(Value::as_str)?;
        match block_type {
            "text" => Some(ContentBlock::Text {
                text: str_field(value, "text").unwrap_or_default(),
            }),
            "tool_use" => Some(ContentBlock::ToolUse {
                id: str_field(value, "id").unwrap_or_default(),
                name: str_field(value, "name").unwrap_or_else(|| "Unknown".to_string()),
                input: value.get("input").cloned().unwrap_or(Value::Null),
            }),
            "tool_result" => Some(ContentBlock::ToolResult {
                tool_use_id: str_field(value, "tool_use_id").unwrap_or_default(),
                content: flatten_tool_result(value.get("content")),
                is_error: value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            _ => None,
        }
    }
}

/// Tool results arrive either as a plain string or as a list of text blocks.
fn flatten_tool_result(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// The `message` body of a canonical message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// Engine-agnostic message consumed by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    #[serde(default)]
    pub message: MessageBody,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Engine-specific leftovers (rate limits, cost, raw token buckets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_metadata: Option<Map<String, Value>>,

    /// Terminal textual result, only meaningful for `result` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl CanonicalMessage {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            subtype: None,
            message: MessageBody::default(),
            usage: None,
            engine_metadata: None,
            result: None,
            session_id: None,
            timestamp: None,
            uuid: None,
        }
    }

    /// A message with a single text block.
    pub fn with_text(kind: MessageType, text: impl Into<String>) -> Self {
        Self::new(kind).block(ContentBlock::text(text))
    }

    pub fn subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn block(mut self, block: ContentBlock) -> Self {
        self.message.content.push(block);
        self
    }

    pub fn usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn result_text(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn at(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Insert one engine metadata entry, creating the bag on first use.
    pub fn meta(mut self, key: &str, value: Value) -> Self {
        self.set_meta(key, value);
        self
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.engine_metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
    }

    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.engine_metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Remove a metadata entry, dropping the bag once it is empty.
    pub fn take_meta(&mut self, key: &str) -> Option<Value> {
        let bag = self.engine_metadata.as_mut()?;
        let value = bag.remove(key);
        if bag.is_empty() {
            self.engine_metadata = None;
        }
        value
    }

    /// All text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build a message from a record that is already in (roughly) canonical
    /// shape, as Claude transcripts and stream-json lines are.
    ///
    /// Unknown `type` values are rejected with [`MessageError::UnknownType`];
    /// the record is never partially stored.
    pub fn from_value(value: &Value) -> Result<Self, MessageError> {
        let obj = value
            .as_object()
            .ok_or_else(|| MessageError::Malformed("record is not an object".to_string()))?;
        let raw_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::Malformed("missing type".to_string()))?;
        let mut kind: MessageType = raw_type.parse()?;

        let body = obj.get("message");
        let raw_content = body
            .and_then(|m| m.get("content"))
            .or_else(|| obj.get("content"));

        let mut message = Self::new(kind);
        let mut thinking = Vec::new();
        match raw_content {
            Some(Value::String(text)) => message.message.content.push(ContentBlock::text(text)),
            Some(Value::Array(blocks)) => {
                for raw in blocks {
                    if raw.get("type").and_then(Value::as_str) == Some("thinking") {
                        if let Some(t) = raw.get("thinking").and_then(Value::as_str) {
                            thinking.push(t.to_string());
                        }
                        continue;
                    }
                    if let Some(block) = ContentBlock::from_value(raw) {
                        message.message.content.push(block);
                    }
                }
            }
            _ => {}
        }

        // A message carrying nothing but reasoning is surfaced as thinking.
        if message.message.content.is_empty() && !thinking.is_empty() {
            kind = MessageType::Thinking;
            message.kind = kind;
            message.message.content = thinking.into_iter().map(ContentBlock::text).collect();
        }

        if kind == MessageType::Summary && message.message.content.is_empty() {
            if let Some(summary) = obj.get("summary").and_then(Value::as_str) {
                message.message.content.push(ContentBlock::text(summary));
            }
        }

        message.subtype = str_field(value, "subtype");
        message.result = str_field(value, "result");
        message.session_id = str_field(value, "session_id").or_else(|| str_field(value, "sessionId"));
        message.timestamp = str_field(value, "timestamp");
        message.uuid = str_field(value, "uuid");
        message.usage = obj
            .get("usage")
            .or_else(|| body.and_then(|m| m.get("usage")))
            .and_then(Usage::from_value);

        if let Some(Value::Object(meta)) = obj.get("engine_metadata") {
            message.engine_metadata = Some(meta.clone());
        }
        for key in ["total_cost_usd", "duration_ms", "num_turns", "is_error", "model"] {
            if let Some(v) = obj.get(key) {
                message.set_meta(key, v.clone());
            }
        }

        Ok(message)
    }
}
