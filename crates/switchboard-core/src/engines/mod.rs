//! Engine identity and per-engine converters.
//!
//! Each supported backend gets its own converter that turns one raw event
//! (a JSON line from the live feed, or a decoded transcript record) into a
//! [`CanonicalMessage`](crate::message::CanonicalMessage).
//!
//! | Engine | Live format | Transcript format | Stateful |
//! |--------|-------------|-------------------|----------|
//! | Claude | stream-json | JSONL, already canonical | no |
//! | Codex  | `exec --json` events | rollout JSONL | yes (rate limits) |
//! | Gemini | NDJSON stream | saved chat JSON | no |

pub mod claude;
pub mod codex;
pub mod gemini;
mod registry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::CanonicalMessage;
use crate::usage::RateLimitSummary;

pub use registry::{fresh_converter, ConvertedLine, ConverterRegistry};

#[derive(Debug, Error)]
#[error("Unknown engine: {0}")]
pub struct UnknownEngine(pub String);

/// One of the three supported assistant backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Claude,
    Codex,
    Gemini,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Claude, Engine::Codex, Engine::Gemini];

    /// Tag used as the event-channel prefix.
    pub fn channel_prefix(&self) -> &'static str {
        match self {
            Engine::Claude => "claude",
            Engine::Codex => "codex",
            Engine::Gemini => "gemini",
        }
    }

    pub fn output_channel(&self, session_id: &str) -> String {
        format!("{}-output:{}", self.channel_prefix(), session_id)
    }

    pub fn error_channel(&self, session_id: &str) -> String {
        format!("{}-error:{}", self.channel_prefix(), session_id)
    }

    pub fn complete_channel(&self, session_id: &str) -> String {
        format!("{}-complete:{}", self.channel_prefix(), session_id)
    }

    /// Whether the backend can list its currently running sessions.
    pub fn supports_live_discovery(&self) -> bool {
        matches!(self, Engine::Claude)
    }

    /// Whether a live feed can be re-attached mid-session.
    ///
    /// Gemini spawns a process per prompt, so a loaded Gemini session is
    /// always finished history.
    pub fn supports_reattach(&self) -> bool {
        !matches!(self, Engine::Gemini)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel_prefix())
    }
}

impl FromStr for Engine {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Engine::Claude),
            "codex" => Ok(Engine::Codex),
            "gemini" => Ok(Engine::Gemini),
            _ => Err(UnknownEngine(s.to_string())),
        }
    }
}

/// Common interface of the per-engine converters.
///
/// Converters never fail: anything they cannot translate yields `None`.
pub trait EngineConverter: Send {
    fn engine(&self) -> Engine;

    /// Translate one decoded record.
    fn convert_value(&mut self, value: &Value) -> Option<CanonicalMessage>;

    /// Drop accumulated state. Called once per new session load.
    fn reset(&mut self) {}

    /// Rolling rate-limit summary, for converters that track one.
    fn rate_limits(&self) -> Option<&RateLimitSummary> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_follow_prefix() {
        assert_eq!(Engine::Claude.output_channel("s1"), "claude-output:s1");
        assert_eq!(Engine::Codex.error_channel("s1"), "codex-error:s1");
        assert_eq!(Engine::Gemini.complete_channel("s1"), "gemini-complete:s1");
    }

    #[test]
    fn parse_and_display_roundtrip() {
        for engine in Engine::ALL {
            let parsed: Engine = engine.to_string().parse().unwrap();
            assert_eq!(parsed, engine);
        }
        assert_eq!(" Claude ".parse::<Engine>().unwrap(), Engine::Claude);
        assert!("copilot".parse::<Engine>().is_err());
    }

    #[test]
    fn capabilities() {
        assert!(Engine::Claude.supports_live_discovery());
        assert!(!Engine::Codex.supports_live_discovery());
        assert!(!Engine::Gemini.supports_reattach());
        assert!(Engine::Codex.supports_reattach());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Engine::Codex).unwrap(), "\"codex\"");
    }
}
