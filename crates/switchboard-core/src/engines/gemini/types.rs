//! Gemini-specific JSON types.
//!
//! # Stream Events
//!
//! - `init`: session start with session_id and model
//! - `message`: text from user or assistant (streaming delta or complete)
//! - `tool_use`: tool invocation with parameters
//! - `tool_result`: tool output (success or error)
//! - `error`: error message
//! - `result`: final event with session stats
//!
//! # Saved Chat Records
//!
//! - `user`: a prompt
//! - `gemini`: a model turn, optionally with `toolCalls`, `thoughts`, `tokens`
//! - `info` / `error`: bookkeeping shown in the transcript
//!
//! Both share the `type` discriminator, so one flat struct covers them.
//! A flat struct with optional fields tolerates new event types better than
//! a tagged enum would.

use serde::Deserialize;
use serde_json::Value;

/// A Gemini stream event or saved chat record.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// "assistant" or "user" on `message` events.
    #[serde(default)]
    pub role: Option<String>,

    /// A string on stream events; a string or a part list in saved chats.
    #[serde(default)]
    pub content: Option<Value>,

    #[serde(default)]
    pub delta: Option<bool>,

    #[serde(default)]
    pub tool_name: Option<String>,

    #[serde(default)]
    pub tool_id: Option<String>,

    #[serde(default)]
    pub parameters: Option<Value>,

    /// "success" or "error" on `tool_result` and `result`.
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub error: Option<Value>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub stats: Option<Value>,

    #[serde(default, rename = "toolCalls")]
    pub tool_calls: Option<Vec<GeminiToolCall>>,

    #[serde(default)]
    pub thoughts: Option<Vec<GeminiThought>>,

    #[serde(default)]
    pub tokens: Option<Value>,
}

/// A tool call recorded in a saved `gemini` turn.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "resultDisplay")]
    pub result_display: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiThought {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
}
