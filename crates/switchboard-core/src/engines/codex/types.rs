//! Codex-specific JSON types.
//!
//! # Two Formats
//!
//! Live events from `codex exec --json` are flat objects tagged by `type`:
//!
//! ```json
//! {"type":"thread.started","thread_id":"t-1"}
//! {"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"Done"}}
//! {"type":"turn.completed","usage":{"input_tokens":10,"cached_input_tokens":2,"output_tokens":5}}
//! ```
//!
//! Rollout transcripts wrap everything in a `payload`:
//!
//! ```json
//! {"timestamp":"...","type":"response_item","payload":{"type":"message","role":"user","content":[...]}}
//! {"timestamp":"...","type":"event_msg","payload":{"type":"token_count","rate_limits":{...}}}
//! ```
//!
//! Both are decoded into [`CodexEvent`]; unused fields stay `None`.

use serde::Deserialize;
use serde_json::Value;

use crate::usage::RateLimitWindow;

/// Any Codex record, live or rollout.
#[derive(Debug, Clone, Deserialize)]
pub struct CodexEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub timestamp: Option<String>,

    /// Set on `thread.started`.
    #[serde(default)]
    pub thread_id: Option<String>,

    /// Set on `item.*` events.
    #[serde(default)]
    pub item: Option<CodexItem>,

    /// Set on `turn.completed`.
    #[serde(default)]
    pub usage: Option<Value>,

    /// Set on `turn.failed`.
    #[serde(default)]
    pub error: Option<CodexErrorInfo>,

    /// Set on top-level `error` events.
    #[serde(default)]
    pub message: Option<String>,

    /// Rollout records carry their body here.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Some builds emit `token_count` at the top level instead of in a payload.
    #[serde(default)]
    pub rate_limits: Option<CodexRateLimits>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodexErrorInfo {
    #[serde(default)]
    pub message: String,
}

/// A thread item (agent message, command, file change, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct CodexItem {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", alias = "item_type")]
    pub item_type: String,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub aggregated_output: Option<String>,

    #[serde(default)]
    pub exit_code: Option<i64>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub changes: Option<Value>,

    #[serde(default)]
    pub server: Option<String>,

    #[serde(default)]
    pub tool: Option<String>,

    #[serde(default)]
    pub arguments: Option<Value>,

    #[serde(default)]
    pub query: Option<String>,

    #[serde(default)]
    pub items: Option<Vec<TodoItem>>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TodoItem {
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// Rate-limit block of a `token_count` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodexRateLimits {
    #[serde(default)]
    pub primary: Option<RateLimitWindow>,
    #[serde(default)]
    pub secondary: Option<RateLimitWindow>,
}
