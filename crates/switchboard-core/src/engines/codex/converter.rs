//! Codex event converter.
//!
//! # State
//!
//! Unlike the Claude and Gemini converters this one remembers things
//! between calls:
//!
//! - the thread id from `thread.started` / `session_meta`, stamped onto
//!   every later message
//! - the last agent message text, reused as the `result` of `turn.completed`
//! - a rolling [`RateLimitSummary`] merged from every `token_count` event
//!
//! `token_count` events themselves produce no message. Their data reaches
//! the UI through [`EngineConverter::rate_limits`] and through the
//! `rate_limits` metadata entry on the next turn result.

use serde_json::{json, Value};

use super::types::{CodexEvent, CodexItem, CodexRateLimits};
use crate::engines::{Engine, EngineConverter};
use crate::message::{CanonicalMessage, ContentBlock, MessageType};
use crate::usage::{RateLimitSummary, Usage};

/// Converter state for one Codex conversation.
#[derive(Debug, Default)]
pub struct CodexConverter {
    thread_id: Option<String>,
    last_agent_message: Option<String>,
    rate_limits: RateLimitSummary,
}

impl CodexConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    fn translate(&mut self, event: CodexEvent) -> Option<CanonicalMessage> {
        let timestamp = event.timestamp.clone();
        let message = match event.event_type.as_str() {
            // ================================================
            // Live `exec --json` events
            // ================================================
            "thread.started" => {
                self.thread_id = event.thread_id.clone();
                Some(CanonicalMessage::new(MessageType::System).subtype("init"))
            }
            "turn.started" => None,
            "item.started" => event.item.and_then(|item| self.item_started(item)),
            "item.updated" => None,
            "item.completed" => event.item.and_then(|item| self.item_completed(item)),
            "turn.completed" => Some(self.turn_completed(event.usage.as_ref())),
            "turn.failed" => {
                let text = event.error.map(|e| e.message).unwrap_or_default();
                Some(
                    CanonicalMessage::new(MessageType::Result)
                        .subtype("error")
                        .result_text(text)
                        .meta("is_error", Value::Bool(true)),
                )
            }
            "error" => Some(
                CanonicalMessage::with_text(MessageType::System, event.message.unwrap_or_default())
                    .subtype("error"),
            ),
            "token_count" => {
                self.absorb_token_count(event.rate_limits.as_ref(), None);
                None
            }

            // ================================================
            // Rollout transcript records
            // ================================================
            "session_meta" => event.payload.as_ref().map(|p| self.session_meta(p)),
            "response_item" => event.payload.as_ref().and_then(response_item),
            "event_msg" => {
                if let Some(payload) = event.payload.as_ref() {
                    self.event_msg(payload);
                }
                None
            }
            "turn_context" | "compacted" => None,

            other => {
                log::debug!("[codex] skipping event type {other}");
                None
            }
        };

        message.map(|m| m.session(self.thread_id.clone()).at(timestamp))
    }

    fn item_started(&mut self, item: CodexItem) -> Option<CanonicalMessage> {
        // Commands are announced when they start so the UI can show them
        // running; everything else waits for completion.
        if item.item_type != "command_execution" {
            return None;
        }
        Some(tool_use(
            &item.id,
            "Bash",
            json!({ "command": item.command.unwrap_or_default() }),
        ))
    }

    fn item_completed(&mut self, item: CodexItem) -> Option<CanonicalMessage> {
        match item.item_type.as_str() {
            "agent_message" => {
                let text = item.text.unwrap_or_default();
                self.last_agent_message = Some(text.clone());
                Some(CanonicalMessage::with_text(MessageType::Assistant, text))
            }
            "reasoning" => {
                let text = item.text.unwrap_or_default();
                if text.trim().is_empty() {
                    return None;
                }
                Some(CanonicalMessage::with_text(MessageType::Thinking, text))
            }
            "command_execution" => {
                let failed = item.exit_code.is_some_and(|code| code != 0)
                    || item.status.as_deref() == Some("failed");
                Some(
                    CanonicalMessage::new(MessageType::User)
                        .block(ContentBlock::ToolResult {
                            tool_use_id: item.id,
                            content: item.aggregated_output.unwrap_or_default(),
                            is_error: failed,
                        })
                        .meta("exit_code", json!(item.exit_code)),
                )
            }
            "file_change" => Some(tool_use(
                &item.id,
                "Edit",
                json!({ "changes": item.changes.unwrap_or(Value::Null) }),
            )),
            "mcp_tool_call" => {
                let name = match (item.server.as_deref(), item.tool.as_deref()) {
                    (Some(server), Some(tool)) => format!("{server}.{tool}"),
                    (None, Some(tool)) => tool.to_string(),
                    _ => "McpTool".to_string(),
                };
                Some(tool_use(&item.id, &name, item.arguments.unwrap_or(Value::Null)))
            }
            "web_search" => Some(tool_use(
                &item.id,
                "WebSearch",
                json!({ "query": item.query.unwrap_or_default() }),
            )),
            "todo_list" => {
                let lines: Vec<String> = item
                    .items
                    .unwrap_or_default()
                    .into_iter()
                    .map(|todo| {
                        let mark = if todo.completed { "x" } else { " " };
                        format!("- [{mark}] {}", todo.text)
                    })
                    .collect();
                Some(CanonicalMessage::with_text(MessageType::Assistant, lines.join("\n")))
            }
            "error" => Some(
                CanonicalMessage::with_text(MessageType::System, item.message.unwrap_or_default())
                    .subtype("error"),
            ),
            other => {
                log::debug!("[codex] skipping item type {other}");
                None
            }
        }
    }

    fn turn_completed(&mut self, usage: Option<&Value>) -> CanonicalMessage {
        let mut message = CanonicalMessage::new(MessageType::Result)
            .subtype("success")
            .usage(usage.and_then(Usage::from_value));
        if let Some(text) = self.last_agent_message.take() {
            message = message.result_text(text);
        }
        if !self.rate_limits.is_empty() {
            if let Ok(snapshot) = serde_json::to_value(&self.rate_limits) {
                message.set_meta("rate_limits", snapshot);
            }
        }
        message
    }

    fn session_meta(&mut self, payload: &Value) -> CanonicalMessage {
        if let Some(id) = payload.get("id").and_then(Value::as_str) {
            self.thread_id = Some(id.to_string());
        }
        let mut message = CanonicalMessage::new(MessageType::System).subtype("init");
        for key in ["cwd", "cli_version", "originator"] {
            if let Some(v) = payload.get(key) {
                message.set_meta(key, v.clone());
            }
        }
        message
    }

    fn event_msg(&mut self, payload: &Value) {
        // agent_message / user_message / agent_reasoning duplicate the
        // response_item records and are ignored.
        if payload.get("type").and_then(Value::as_str) != Some("token_count") {
            return;
        }
        let limits = payload
            .get("rate_limits")
            .and_then(|v| serde_json::from_value::<CodexRateLimits>(v.clone()).ok());
        let last_usage = payload
            .get("info")
            .and_then(|info| info.get("last_token_usage"))
            .and_then(Usage::from_value);
        self.absorb_token_count(limits.as_ref(), last_usage);
    }

    /// Merge one `token_count` event into the rolling summary. Windows the
    /// event leaves out keep their previous values.
    fn absorb_token_count(&mut self, limits: Option<&CodexRateLimits>, last_usage: Option<Usage>) {
        if let Some(limits) = limits {
            if let Some(primary) = &limits.primary {
                self.rate_limits
                    .primary
                    .get_or_insert_with(Default::default)
                    .merge(primary);
            }
            if let Some(secondary) = &limits.secondary {
                self.rate_limits
                    .secondary
                    .get_or_insert_with(Default::default)
                    .merge(secondary);
            }
        }
        if last_usage.is_some() {
            self.rate_limits.last_usage = last_usage;
        }
    }
}

impl EngineConverter for CodexConverter {
    fn engine(&self) -> Engine {
        Engine::Codex
    }

    fn convert_value(&mut self, value: &Value) -> Option<CanonicalMessage> {
        let event: CodexEvent = match serde_json::from_value(value.clone()) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("[codex] skipping unreadable event: {e}");
                return None;
            }
        };
        self.translate(event)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn rate_limits(&self) -> Option<&RateLimitSummary> {
        if self.rate_limits.is_empty() {
            None
        } else {
            Some(&self.rate_limits)
        }
    }
}

fn tool_use(id: &str, name: &str, input: Value) -> CanonicalMessage {
    CanonicalMessage::new(MessageType::ToolUse).block(ContentBlock::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input,
    })
}

/// Translate a rollout `response_item` payload.
fn response_item(payload: &Value) -> Option<CanonicalMessage> {
    let item_type = payload.get("type").and_then(Value::as_str)?;
    match item_type {
        "message" => {
            let kind = match payload.get("role").and_then(Value::as_str)? {
                "user" => MessageType::User,
                "assistant" => MessageType::Assistant,
                // developer/system prompts are not part of the visible transcript
                _ => return None,
            };
            let text = payload
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            if text.is_empty() {
                return None;
            }
            Some(CanonicalMessage::with_text(kind, text))
        }
        "reasoning" => {
            let text = payload
                .get("summary")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            if text.is_empty() {
                return None;
            }
            Some(CanonicalMessage::with_text(MessageType::Thinking, text))
        }
        "function_call" | "custom_tool_call" => {
            let call_id = payload.get("call_id").and_then(Value::as_str).unwrap_or_default();
            let name = payload.get("name").and_then(Value::as_str).unwrap_or("Unknown");
            // Arguments are a JSON document encoded as a string.
            let input = match payload.get("arguments").or_else(|| payload.get("input")) {
                Some(Value::String(s)) => {
                    serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
                }
                Some(other) => other.clone(),
                None => Value::Null,
            };
            Some(tool_use(call_id, name, input))
        }
        "function_call_output" | "custom_tool_call_output" => {
            let call_id = payload.get("call_id").and_then(Value::as_str).unwrap_or_default();
            let output = match payload.get("output") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Object(o)) => o
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            Some(CanonicalMessage::new(MessageType::User).block(ContentBlock::ToolResult {
                tool_use_id: call_id.to_string(),
                content: output,
                is_error: false,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(converter: &mut CodexConverter, value: Value) -> Option<CanonicalMessage> {
        converter.convert_value(&value)
    }

    mod live_events {
        use super::*;

        #[test]
        fn thread_started_sets_session_on_later_messages() {
            let mut c = CodexConverter::new();
            let init = feed(&mut c, json!({"type": "thread.started", "thread_id": "t-1"})).unwrap();
            assert_eq!(init.subtype.as_deref(), Some("init"));
            assert_eq!(init.session_id.as_deref(), Some("t-1"));

            let msg = feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "i0", "type": "agent_message", "text": "hello"}}),
            )
            .unwrap();
            assert_eq!(msg.session_id.as_deref(), Some("t-1"));
            assert_eq!(c.thread_id(), Some("t-1"));
        }

        #[test]
        fn turn_started_and_updates_are_skipped() {
            let mut c = CodexConverter::new();
            assert!(feed(&mut c, json!({"type": "turn.started"})).is_none());
            assert!(feed(
                &mut c,
                json!({"type": "item.updated", "item": {"id": "i", "type": "todo_list", "items": []}})
            )
            .is_none());
        }

        #[test]
        fn command_lifecycle() {
            let mut c = CodexConverter::new();
            let started = feed(
                &mut c,
                json!({"type": "item.started", "item": {"id": "c1", "type": "command_execution", "command": "cargo fmt", "status": "in_progress"}}),
            )
            .unwrap();
            assert_eq!(started.kind, MessageType::ToolUse);
            assert!(matches!(
                &started.message.content[0],
                ContentBlock::ToolUse { name, input, .. } if name == "Bash" && input["command"] == "cargo fmt"
            ));

            let done = feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "c1", "type": "command_execution", "aggregated_output": "oops", "exit_code": 1, "status": "failed"}}),
            )
            .unwrap();
            assert_eq!(done.kind, MessageType::User);
            assert_eq!(
                done.message.content[0],
                ContentBlock::ToolResult {
                    tool_use_id: "c1".to_string(),
                    content: "oops".to_string(),
                    is_error: true,
                }
            );
        }

        #[test]
        fn reasoning_becomes_thinking() {
            let mut c = CodexConverter::new();
            let msg = feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "r", "type": "reasoning", "text": "**Planning**"}}),
            )
            .unwrap();
            assert_eq!(msg.kind, MessageType::Thinking);
        }

        #[test]
        fn mcp_and_search_items() {
            let mut c = CodexConverter::new();
            let mcp = feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "m", "type": "mcp_tool_call", "server": "docs", "tool": "search", "arguments": {"q": "x"}}}),
            )
            .unwrap();
            assert!(matches!(&mcp.message.content[0], ContentBlock::ToolUse { name, .. } if name == "docs.search"));

            let web = feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "w", "type": "web_search", "query": "rust"}}),
            )
            .unwrap();
            assert!(matches!(&web.message.content[0], ContentBlock::ToolUse { name, .. } if name == "WebSearch"));
        }

        #[test]
        fn todo_list_renders_checklist() {
            let mut c = CodexConverter::new();
            let msg = feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "t", "type": "todo_list", "items": [
                    {"text": "write code", "completed": true},
                    {"text": "test", "completed": false}
                ]}}),
            )
            .unwrap();
            assert_eq!(msg.text(), "- [x] write code\n- [ ] test");
        }

        #[test]
        fn turn_completed_carries_result_usage_and_limits() {
            let mut c = CodexConverter::new();
            feed(
                &mut c,
                json!({"type": "item.completed", "item": {"id": "a", "type": "agent_message", "text": "All done"}}),
            );
            feed(
                &mut c,
                json!({"type": "token_count", "rate_limits": {"primary": {"used_percent": 12.0}}}),
            );
            let result = feed(
                &mut c,
                json!({"type": "turn.completed", "usage": {"input_tokens": 100, "cached_input_tokens": 40, "output_tokens": 7}}),
            )
            .unwrap();

            assert_eq!(result.kind, MessageType::Result);
            assert_eq!(result.result.as_deref(), Some("All done"));
            let usage = result.usage.unwrap();
            assert_eq!(usage.input_tokens, 100);
            assert_eq!(usage.cache_read_tokens, 40);
            assert_eq!(
                result.get_meta("rate_limits").unwrap()["primary"]["used_percent"],
                json!(12.0)
            );
        }

        #[test]
        fn turn_failed_and_error() {
            let mut c = CodexConverter::new();
            let failed = feed(&mut c, json!({"type": "turn.failed", "error": {"message": "quota"}})).unwrap();
            assert_eq!(failed.subtype.as_deref(), Some("error"));
            assert_eq!(failed.result.as_deref(), Some("quota"));

            let err = feed(&mut c, json!({"type": "error", "message": "reconnecting"})).unwrap();
            assert_eq!(err.kind, MessageType::System);
            assert_eq!(err.text(), "reconnecting");
        }

        #[test]
        fn non_string_type_is_skipped() {
            let mut c = CodexConverter::new();
            assert!(feed(&mut c, json!({"type": 5})).is_none());
            assert!(feed(&mut c, json!(null)).is_none());
        }
    }

    mod rollout_records {
        use super::*;

        #[test]
        fn session_meta_sets_thread() {
            let mut c = CodexConverter::new();
            let msg = feed(
                &mut c,
                json!({"timestamp": "2025-05-01T10:00:00Z", "type": "session_meta", "payload": {"id": "rollout-1", "cwd": "/repo"}}),
            )
            .unwrap();
            assert_eq!(msg.session_id.as_deref(), Some("rollout-1"));
            assert_eq!(msg.timestamp.as_deref(), Some("2025-05-01T10:00:00Z"));
            assert_eq!(msg.get_meta("cwd"), Some(&json!("/repo")));
        }

        #[test]
        fn messages_by_role() {
            let mut c = CodexConverter::new();
            let user = feed(
                &mut c,
                json!({"type": "response_item", "payload": {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "fix it"}]}}),
            )
            .unwrap();
            assert_eq!(user.kind, MessageType::User);
            assert_eq!(user.text(), "fix it");

            assert!(feed(
                &mut c,
                json!({"type": "response_item", "payload": {"type": "message", "role": "developer", "content": [{"type": "input_text", "text": "rules"}]}}),
            )
            .is_none());
        }

        #[test]
        fn function_call_arguments_are_decoded() {
            let mut c = CodexConverter::new();
            let call = feed(
                &mut c,
                json!({"type": "response_item", "payload": {"type": "function_call", "name": "shell", "call_id": "call_1", "arguments": "{\"command\":[\"ls\"]}"}}),
            )
            .unwrap();
            match &call.message.content[0] {
                ContentBlock::ToolUse { id, name, input } => {
                    assert_eq!(id, "call_1");
                    assert_eq!(name, "shell");
                    assert_eq!(input["command"][0], "ls");
                }
                other => panic!("Expected tool use, got {other:?}"),
            }

            let output = feed(
                &mut c,
                json!({"type": "response_item", "payload": {"type": "function_call_output", "call_id": "call_1", "output": "file.txt"}}),
            )
            .unwrap();
            assert!(matches!(
                &output.message.content[0],
                ContentBlock::ToolResult { content, .. } if content == "file.txt"
            ));
        }

        #[test]
        fn duplicate_event_msgs_are_skipped() {
            let mut c = CodexConverter::new();
            assert!(feed(
                &mut c,
                json!({"type": "event_msg", "payload": {"type": "agent_message", "message": "dup"}})
            )
            .is_none());
        }
    }

    mod rate_limits {
        use super::*;

        fn token_count(limits: Value) -> Value {
            json!({"type": "event_msg", "payload": {"type": "token_count", "info": null, "rate_limits": limits}})
        }

        #[test]
        fn merges_partial_updates() {
            let mut c = CodexConverter::new();
            feed(
                &mut c,
                token_count(json!({"primary": {"used_percent": 10.0, "window_minutes": 300}})),
            );
            feed(
                &mut c,
                token_count(json!({"secondary": {"used_percent": 3.0, "window_minutes": 10080}})),
            );
            feed(&mut c, token_count(json!({"primary": {"used_percent": 11.5}})));

            let summary = c.rate_limits().unwrap();
            let primary = summary.primary.as_ref().unwrap();
            assert_eq!(primary.used_percent, Some(11.5));
            assert_eq!(primary.window_minutes, Some(300));
            assert_eq!(summary.secondary.as_ref().unwrap().window_minutes, Some(10080));
        }

        #[test]
        fn records_last_usage() {
            let mut c = CodexConverter::new();
            feed(
                &mut c,
                json!({"type": "event_msg", "payload": {"type": "token_count", "info": {
                    "last_token_usage": {"input_tokens": 9, "output_tokens": 1}
                }}}),
            );
            assert_eq!(c.rate_limits().unwrap().last_usage.unwrap().input_tokens, 9);
        }

        #[test]
        fn reset_clears_everything() {
            let mut c = CodexConverter::new();
            feed(&mut c, json!({"type": "thread.started", "thread_id": "t"}));
            feed(&mut c, token_count(json!({"primary": {"used_percent": 1.0}})));

            c.reset();

            assert!(c.rate_limits().is_none());
            assert!(c.thread_id().is_none());
        }
    }
}
