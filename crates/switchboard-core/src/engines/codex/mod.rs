//! Codex converter.
//!
//! Handles both the live `codex exec --json` event stream and rollout
//! transcript records, and keeps a rolling rate-limit summary built from
//! `token_count` events.

mod converter;
mod types;

pub use converter::CodexConverter;
pub use types::*;
