//! Slash-command bookkeeping detection.
//!
//! Transcripts record local slash commands as ordinary user turns wrapped in
//! marker tags. These are moved to `system` so they render apart from what
//! the user actually typed.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::message::{CanonicalMessage, MessageType};

pub const SUBTYPE_COMMAND_OUTPUT: &str = "command-output";
pub const SUBTYPE_COMMAND_META: &str = "command-meta";
pub const SUBTYPE_COMMAND_ERROR: &str = "command-error";

const LOCAL_STDOUT_MARKER: &str = "<local-command-stdout>";
const COMMAND_NAME_MARKER: &str = "<command-name>";
const COMMAND_MESSAGE_MARKER: &str = "<command-message>";
const UNKNOWN_COMMAND_MARKER: &str = "Unknown slash command:";

static COMMAND_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<command-name>\s*(.*?)\s*</command-name>").unwrap());

/// Subtype a user message should be moved to, if any.
pub fn classify(text: &str) -> Option<&'static str> {
    if text.contains(LOCAL_STDOUT_MARKER) {
        Some(SUBTYPE_COMMAND_OUTPUT)
    } else if text.contains(COMMAND_NAME_MARKER) || text.contains(COMMAND_MESSAGE_MARKER) {
        Some(SUBTYPE_COMMAND_META)
    } else if text.contains(UNKNOWN_COMMAND_MARKER) {
        Some(SUBTYPE_COMMAND_ERROR)
    } else {
        None
    }
}

/// The slash command named in a `<command-name>` tag.
pub fn command_name(text: &str) -> Option<String> {
    COMMAND_NAME_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| !name.is_empty())
}

/// Rewrite a `user` message into `system` when it is command bookkeeping.
/// Every other message is returned untouched.
pub fn reclassify(mut message: CanonicalMessage) -> CanonicalMessage {
    if message.kind != MessageType::User {
        return message;
    }

    let text = message.text();
    let Some(subtype) = classify(&text) else {
        return message;
    };

    message.kind = MessageType::System;
    message.subtype = Some(subtype.to_string());
    if subtype == SUBTYPE_COMMAND_META {
        if let Some(name) = command_name(&text) {
            message.set_meta("command", Value::String(name));
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> CanonicalMessage {
        CanonicalMessage::with_text(MessageType::User, text)
    }

    #[test]
    fn local_stdout_becomes_command_output() {
        let msg = reclassify(user("<local-command-stdout>Set model to opus</local-command-stdout>"));
        assert_eq!(msg.kind, MessageType::System);
        assert_eq!(msg.subtype.as_deref(), Some("command-output"));
        assert!(msg.text().contains("Set model to opus"));
    }

    #[test]
    fn command_name_becomes_command_meta() {
        let msg = reclassify(user(
            "<command-message>model</command-message>\n<command-name>/model</command-name>",
        ));
        assert_eq!(msg.kind, MessageType::System);
        assert_eq!(msg.subtype.as_deref(), Some("command-meta"));
        assert_eq!(msg.get_meta("command"), Some(&Value::String("/model".to_string())));
    }

    #[test]
    fn command_message_alone_is_meta_without_name() {
        let msg = reclassify(user("<command-message>compact</command-message>"));
        assert_eq!(msg.subtype.as_deref(), Some("command-meta"));
        assert!(msg.engine_metadata.is_none());
    }

    #[test]
    fn unknown_slash_command_becomes_command_error() {
        let msg = reclassify(user("Unknown slash command: frobnicate"));
        assert_eq!(msg.kind, MessageType::System);
        assert_eq!(msg.subtype.as_deref(), Some("command-error"));
    }

    #[test]
    fn plain_user_text_is_untouched() {
        let original = user("please fix the failing test");
        assert_eq!(reclassify(original.clone()), original);
    }

    #[test]
    fn only_user_messages_are_considered() {
        let assistant = CanonicalMessage::with_text(
            MessageType::Assistant,
            "<local-command-stdout>echo</local-command-stdout>",
        );
        assert_eq!(reclassify(assistant.clone()), assistant);
    }

    #[test]
    fn command_name_trims_whitespace() {
        assert_eq!(
            command_name("<command-name>\n  /clear \n</command-name>").as_deref(),
            Some("/clear")
        );
        assert_eq!(command_name("<command-name></command-name>"), None);
        assert_eq!(command_name("no tags"), None);
    }
}
