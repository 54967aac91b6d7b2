//! Gemini converter.
//!
//! Gemini spawns one process per prompt and streams NDJSON events. Saved
//! chats use a different record layout (`user` / `gemini` / `info` records),
//! which this converter also understands.

mod converter;
mod types;

pub use converter::GeminiConverter;
pub use types::*;
