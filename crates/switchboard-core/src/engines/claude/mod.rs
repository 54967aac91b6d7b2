//! Claude converter.
//!
//! Claude's stream-json output and its transcript files share the canonical
//! record shape, so conversion is mostly validation.

mod converter;

pub use converter::ClaudeConverter;
