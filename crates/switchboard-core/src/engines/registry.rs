//! Converter lookup keyed by engine.

use serde_json::Value;

use super::claude::ClaudeConverter;
use super::codex::CodexConverter;
use super::gemini::GeminiConverter;
use super::{Engine, EngineConverter};
use crate::message::CanonicalMessage;
use crate::usage::{self, RateLimitSummary};

/// Outcome of converting one raw line. `None` means "skip this line".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedLine {
    pub message: Option<CanonicalMessage>,
}

/// A converter with no accumulated state, for one-off passes such as a
/// history load.
pub fn fresh_converter(engine: Engine) -> Box<dyn EngineConverter> {
    match engine {
        Engine::Claude => Box::new(ClaudeConverter::new()),
        Engine::Codex => Box::new(CodexConverter::new()),
        Engine::Gemini => Box::new(GeminiConverter::new()),
    }
}

/// Holds one long-lived converter per engine for the live feed.
#[derive(Debug, Default)]
pub struct ConverterRegistry {
    claude: ClaudeConverter,
    codex: CodexConverter,
    gemini: GeminiConverter,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn converter_mut(&mut self, engine: Engine) -> &mut dyn EngineConverter {
        match engine {
            Engine::Claude => &mut self.claude,
            Engine::Codex => &mut self.codex,
            Engine::Gemini => &mut self.gemini,
        }
    }

    fn converter(&self, engine: Engine) -> &dyn EngineConverter {
        match engine {
            Engine::Claude => &self.claude,
            Engine::Codex => &self.codex,
            Engine::Gemini => &self.gemini,
        }
    }

    /// Convert one raw payload. Never panics; malformed input is logged and
    /// yields an empty result.
    pub fn convert_line(&mut self, raw: &str, engine: Engine) -> ConvertedLine {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ConvertedLine::default();
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[{engine}] dropping malformed event line: {e}");
                return ConvertedLine::default();
            }
        };

        let message = self.converter_mut(engine).convert_value(&value).map(|mut msg| {
            usage::normalize_message(&mut msg);
            msg
        });
        ConvertedLine { message }
    }

    pub fn reset(&mut self, engine: Engine) {
        self.converter_mut(engine).reset();
    }

    pub fn rate_limits(&self, engine: Engine) -> Option<RateLimitSummary> {
        self.converter(engine).rate_limits().cloned()
    }
}
