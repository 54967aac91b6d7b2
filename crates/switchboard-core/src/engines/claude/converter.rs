//! Claude stream-json converter.
//!
//! Claude emits one JSON object per line:
//!
//! ```json
//! {"type":"system","subtype":"init","session_id":"abc","model":"claude-sonnet-4"}
//! {"type":"assistant","message":{"content":[{"type":"text","text":"Hi"}]}}
//! {"type":"result","subtype":"success","result":"Hi","usage":{...}}
//! ```
//!
//! The same shape is stored in transcript files, plus a few bookkeeping
//! record types (`file-history-snapshot`, `queue-operation`) that have no
//! canonical counterpart and are skipped.

use serde_json::Value;

use crate::engines::{Engine, EngineConverter};
use crate::message::{CanonicalMessage, MessageError};

/// Metadata keys copied verbatim from the raw record when present.
const PASSTHROUGH_KEYS: &[&str] = &["parent_tool_use_id", "isSidechain", "cwd", "gitBranch"];

/// Stateless converter for Claude events.
#[derive(Debug, Default)]
pub struct ClaudeConverter;

impl ClaudeConverter {
    pub fn new() -> Self {
        Self
    }
}

impl EngineConverter for ClaudeConverter {
    fn engine(&self) -> Engine {
        Engine::Claude
    }

    fn convert_value(&mut self, value: &Value) -> Option<CanonicalMessage> {
        let mut message = match CanonicalMessage::from_value(value) {
            Ok(m) => m,
            Err(MessageError::UnknownType(t)) => {
                log::debug!("[claude] skipping event type {t}");
                return None;
            }
            Err(e) => {
                log::warn!("[claude] skipping unreadable event: {e}");
                return None;
            }
        };

        // The model lives on the inner message for assistant turns and at
        // the top level for the init event.
        if let Some(model) = value
            .get("message")
            .and_then(|m| m.get("model"))
            .and_then(Value::as_str)
        {
            message.set_meta("model", Value::String(model.to_string()));
        }
        for key in PASSTHROUGH_KEYS {
            if let Some(v) = value.get(*key).filter(|v| !v.is_null()) {
                message.set_meta(key, v.clone());
            }
        }

        Some(message)
    }
}
