//! Token accounting and rate-limit summaries.
//!
//! Every engine spells its usage counters differently. `Usage::from_value`
//! folds all known spellings into one numeric schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::CanonicalMessage;

const INPUT_KEYS: &[&str] = &[
    "input_tokens",
    "inputTokens",
    "prompt_tokens",
    "promptTokenCount",
    "input",
];
const OUTPUT_KEYS: &[&str] = &[
    "output_tokens",
    "outputTokens",
    "completion_tokens",
    "candidatesTokenCount",
    "output",
];
const CACHE_CREATION_KEYS: &[&str] = &[
    "cache_creation_input_tokens",
    "cache_creation_tokens",
    "cacheCreationInputTokens",
    "cacheCreationTokens",
];
const CACHE_READ_KEYS: &[&str] = &[
    "cache_read_input_tokens",
    "cache_read_tokens",
    "cached_input_tokens",
    "cacheReadInputTokens",
    "cachedInputTokens",
    "cached",
];

/// Metadata keys that may hold a raw, engine-shaped usage object.
const METADATA_USAGE_KEYS: &[&str] = &["usage", "tokens", "token_usage"];

/// Canonical token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl Usage {
    /// Normalize a raw usage object. Returns `None` when the value is not an
    /// object or carries none of the known counters.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let pick = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(as_count));

        let input = pick(INPUT_KEYS);
        let output = pick(OUTPUT_KEYS);
        let cache_creation = pick(CACHE_CREATION_KEYS);
        let cache_read = pick(CACHE_READ_KEYS);

        if input.is_none() && output.is_none() && cache_creation.is_none() && cache_read.is_none() {
            return None;
        }

        Some(Self {
            input_tokens: input.unwrap_or(0),
            output_tokens: output.unwrap_or(0),
            cache_creation_tokens: cache_creation.unwrap_or(0),
            cache_read_tokens: cache_read.unwrap_or(0),
        })
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// Counters show up as integers, floats, or numeric strings depending on the engine.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Hoist usage that a converter left in the engine metadata bag into the
/// canonical `usage` field. A message that already has usage is left alone.
pub fn normalize_message(message: &mut CanonicalMessage) {
    if message.usage.is_some() {
        return;
    }
    for key in METADATA_USAGE_KEYS {
        let parsed = message.get_meta(key).and_then(Usage::from_value);
        if let Some(usage) = parsed {
            message.take_meta(key);
            message.usage = Some(usage);
            return;
        }
    }
}

/// One rate-limit window as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_in_seconds: Option<u64>,
}

impl RateLimitWindow {
    /// Overlay the fields present in `other`; absent fields keep their old value.
    pub fn merge(&mut self, other: &RateLimitWindow) {
        if other.used_percent.is_some() {
            self.used_percent = other.used_percent;
        }
        if other.window_minutes.is_some() {
            self.window_minutes = other.window_minutes;
        }
        if other.resets_in_seconds.is_some() {
            self.resets_in_seconds = other.resets_in_seconds;
        }
    }
}

/// Rolling rate-limit state assembled across many events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<RateLimitWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<RateLimitWindow>,
    /// Most recent per-turn usage reported alongside the limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_usage: Option<Usage>,
}

impl RateLimitSummary {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none() && self.last_usage.is_none()
    }
}
